use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use freshcart_api::{
    config::AppConfig,
    db,
    entities::{discount, product, store},
    events::{self, EventSender},
    handlers::AppServices,
    services::notifications::{NotificationChannel, NotificationKind},
    services::payments::{GatewayError, PaymentGateway, PaymentIntent},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Gateway stub: hands out intent ids unless told to decline.
pub struct TestGateway {
    pub decline: AtomicBool,
    pub created_intents: Mutex<Vec<String>>,
    pub refunds: Mutex<Vec<(String, Option<Decimal>)>>,
}

impl TestGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            decline: AtomicBool::new(false),
            created_intents: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PaymentGateway for TestGateway {
    async fn create_intent(
        &self,
        _amount: Decimal,
        _currency: &str,
        _metadata: Value,
    ) -> Result<PaymentIntent, GatewayError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(GatewayError::Card("card declined".to_string()));
        }
        let intent_id = format!("pi_{}", Uuid::new_v4().simple());
        self.created_intents
            .lock()
            .unwrap()
            .push(intent_id.clone());
        Ok(PaymentIntent {
            client_secret: format!("{}_secret", intent_id),
            intent_id,
        })
    }

    async fn confirm_intent(&self, _intent_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        self.refunds
            .lock()
            .unwrap()
            .push((intent_id.to_string(), amount));
        Ok(())
    }
}

/// Notification channel that records every delivery.
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(Uuid, NotificationKind)>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k)| *k == kind)
            .count()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn deliver(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        _payload: Value,
    ) -> Result<(), String> {
        self.sent.lock().unwrap().push((user_id, kind));
        Ok(())
    }
}

/// Helper harness spinning up application state backed by a throwaway
/// SQLite database with the embedded migrations applied.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<TestGateway>,
    pub notifications: Arc<RecordingChannel>,
    _event_task: tokio::task::JoinHandle<()>,
    db_file: String,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file = format!(
            "{}/freshcart_test_{}.db",
            std::env::temp_dir().display(),
            Uuid::new_v4().simple()
        );
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{db_file}?mode=rwc"),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_timeout_minutes = 30;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let db_arc = Arc::new(pool);
        let config = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = TestGateway::new();
        let notifications = RecordingChannel::new();

        let services = AppServices::with_collaborators(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            config.clone(),
            gateway.clone(),
            notifications.clone(),
        );

        let state = AppState {
            db: db_arc,
            config,
            event_sender,
            services,
        };

        Self {
            state,
            gateway,
            notifications,
            _event_task: event_task,
            db_file,
        }
    }

    /// Insert a store with the given delivery fee.
    pub async fn seed_store(&self, delivery_fee: Decimal) -> Uuid {
        let store_id = Uuid::new_v4();
        let model = store::ActiveModel {
            id: Set(store_id),
            name: Set(format!("Store {}", &store_id.to_string()[..8])),
            delivery_fee: Set(delivery_fee),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("failed to seed store");
        store_id
    }

    /// Insert an active product with price and stock.
    pub async fn seed_product(&self, store_id: Uuid, price: Decimal, stock: i32) -> Uuid {
        let product_id = Uuid::new_v4();
        let model = product::ActiveModel {
            id: Set(product_id),
            store_id: Set(store_id),
            category_id: Set(Uuid::new_v4()),
            name: Set(format!("Product {}", &product_id.to_string()[..8])),
            price: Set(price),
            stock_quantity: Set(stock),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("failed to seed product");
        product_id
    }

    /// Insert an active discount code.
    pub async fn seed_discount(
        &self,
        code: &str,
        kind: discount::DiscountKind,
        value: Decimal,
    ) -> Uuid {
        let discount_id = Uuid::new_v4();
        let model = discount::ActiveModel {
            id: Set(discount_id),
            code: Set(code.to_string()),
            name: Set(format!("{} promotion", code)),
            kind: Set(kind),
            value: Set(value),
            min_order_amount: Set(None),
            max_discount_amount: Set(None),
            usage_limit: Set(None),
            usage_count: Set(0),
            per_user_limit: Set(None),
            auto_apply: Set(false),
            starts_at: Set(Utc::now() - chrono::Duration::days(1)),
            ends_at: Set(Utc::now() + chrono::Duration::days(30)),
            status: Set(discount::DiscountStatus::Active),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        model
            .insert(&*self.state.db)
            .await
            .expect("failed to seed discount");
        discount_id
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_file);
    }
}
