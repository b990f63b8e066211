pub mod addresses;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartService,
    checkout::CheckoutService,
    discounts::DiscountService,
    geocoding::GeocodingService,
    notifications::{LogChannel, NotificationChannel, NotificationService},
    orders::OrderService,
    payments::{HttpPaymentGateway, PaymentGateway, PaymentService, ReconciliationService},
    pricing::PricingService,
};
use axum::{routing::post, Router};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub pricing: Arc<PricingService>,
    pub discounts: Arc<DiscountService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub notifications: Arc<NotificationService>,
    pub geocoding: Arc<GeocodingService>,
}

impl AppServices {
    /// Builds the service container with the default gateway and
    /// notification channel.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        let gateway = HttpPaymentGateway::from_config(config.clone());
        let channel: Arc<dyn NotificationChannel> = Arc::new(LogChannel);
        Self::with_collaborators(db_pool, event_sender, config, gateway, channel)
    }

    /// Full wiring with injectable external collaborators; the test
    /// harness swaps in mocks here.
    pub fn with_collaborators(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        notification_channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        let notifications = Arc::new(NotificationService::new(notification_channel));
        let discounts = Arc::new(DiscountService::new());
        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let pricing = Arc::new(PricingService::new(discounts.clone(), config.clone()));
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
            notifications.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            db_pool.clone(),
            event_sender.clone(),
            notifications.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            cart.clone(),
            pricing.clone(),
            discounts.clone(),
            payments.clone(),
            config.clone(),
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let geocoding = Arc::new(GeocodingService::new(config.clone()));

        Self {
            cart,
            pricing,
            discounts,
            checkout,
            orders,
            payments,
            reconciliation,
            notifications,
            geocoding,
        }
    }
}

/// Assembles the versioned API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/cart", carts::carts_routes())
        .nest("/checkout", checkout::checkout_routes())
        .nest("/orders", orders::orders_routes())
        .nest("/addresses", addresses::addresses_routes())
        .route("/payments/webhook", post(payment_webhooks::payment_webhook))
}
