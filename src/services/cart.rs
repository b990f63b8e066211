use crate::{
    config::AppConfig,
    entities::{
        anonymous_cart::{self, CartEntry},
        cart_item, product, AnonymousCart, CartItem, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Who owns a cart. Passed explicitly into every operation; there is no
/// ambient session state anywhere in the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(Uuid),
    Session(String),
}

impl Identity {
    /// Stable key for lock maps and event payloads.
    pub fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{}", id),
            Identity::Session(id) => format!("session:{}", id),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Unified view of one cart line, priced live from the catalog regardless
/// of which backend the line came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    /// Row id for user carts, synthetic token for anonymous carts.
    pub line_ref: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub store_id: Uuid,
    pub category_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

const ANON_REF_PREFIX: &str = "anonymous";

/// Encode the synthetic line reference for an anonymous cart entry.
///
/// The format (`anonymous_<product>_<added_at>`) lets update/remove find
/// the same logical line without a database id. Both halves of the codec
/// live here so the format can change without touching call sites.
pub fn encode_anon_line_ref(product_id: Uuid, added_at: i64) -> String {
    format!("{}_{}_{}", ANON_REF_PREFIX, product_id, added_at)
}

/// Decode a synthetic anonymous line reference. Returns `None` for
/// anything that does not round-trip through [`encode_anon_line_ref`].
pub fn decode_anon_line_ref(line_ref: &str) -> Option<(Uuid, i64)> {
    let rest = line_ref.strip_prefix(ANON_REF_PREFIX)?.strip_prefix('_')?;
    // The uuid is fixed-width; everything after the next '_' is the timestamp.
    let (product_part, ts_part) = rest.split_at(rest.find('_')?);
    let product_id = Uuid::parse_str(product_part).ok()?;
    let added_at = ts_part.strip_prefix('_')?.parse::<i64>().ok()?;
    Some((product_id, added_at))
}

/// Cart store unifying two backends behind one line-item view:
/// persisted rows for signed-in users and a session-keyed JSON blob for
/// anonymous visitors.
///
/// Mutations on the same identity are serialized through a per-identity
/// lock so concurrent adds cannot merge against a stale quantity. Reads
/// never mutate; the anonymous row is only created on the first add.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Serializes mutations for one cart identity. Checkout also takes
    /// this guard so a concurrent add cannot race the cart clear.
    pub async fn acquire_identity_lock(&self, identity: &Identity) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(identity.key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Returns the unified line-item view for either backend.
    ///
    /// Lines whose product no longer resolves (deleted or deactivated) are
    /// dropped from the view; for anonymous carts the stored entry is left
    /// untouched so the blob survives catalog churn.
    #[instrument(skip(self))]
    pub async fn get_line_items(&self, identity: &Identity) -> Result<Vec<CartLine>, ServiceError> {
        match identity {
            Identity::User(user_id) => self.user_line_items(&*self.db, *user_id).await,
            Identity::Session(session_id) => {
                self.anonymous_line_items(&*self.db, session_id).await
            }
        }
    }

    /// Adds a product to the cart, merging with an existing line for the
    /// same product by summing quantities. The merged quantity is
    /// re-validated against live stock and the per-line maximum; failures
    /// leave the cart unmodified.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        identity: &Identity,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<CartLine>, ServiceError> {
        self.validate_quantity(quantity)?;
        let _guard = self.acquire_identity_lock(identity).await;

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        match identity {
            Identity::User(user_id) => {
                let existing = CartItem::find()
                    .filter(cart_item::Column::UserId.eq(*user_id))
                    .filter(cart_item::Column::ProductId.eq(product_id))
                    .one(&txn)
                    .await?;

                let merged = existing.as_ref().map(|i| i.quantity).unwrap_or(0) + quantity;
                self.check_line_limits(&product, merged)?;

                if let Some(item) = existing {
                    let mut item: cart_item::ActiveModel = item.into();
                    item.quantity = Set(merged);
                    item.updated_at = Set(Utc::now());
                    item.update(&txn).await?;
                } else {
                    let item = cart_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        user_id: Set(*user_id),
                        product_id: Set(product_id),
                        quantity: Set(quantity),
                        created_at: Set(Utc::now()),
                        updated_at: Set(Utc::now()),
                    };
                    item.insert(&txn).await?;
                }
            }
            Identity::Session(session_id) => {
                let cart = self.fetch_or_create_anonymous(&txn, session_id).await?;
                let mut entries = cart.entries();

                if let Some(entry) = entries.iter_mut().find(|e| e.product_id == product_id) {
                    let merged = entry.quantity + quantity;
                    self.check_line_limits(&product, merged)?;
                    entry.quantity = merged;
                } else {
                    self.check_line_limits(&product, quantity)?;
                    entries.push(CartEntry {
                        product_id,
                        quantity,
                        added_at: Utc::now().timestamp(),
                    });
                }

                self.store_anonymous_entries(&txn, cart, entries).await?;
            }
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                identity: identity.key(),
                product_id,
                quantity,
            })
            .await;

        info!(identity = %identity, %product_id, quantity, "Added item to cart");
        self.get_line_items(identity).await
    }

    /// Updates the quantity of an existing line. A quantity of zero or
    /// less removes the line; otherwise the new quantity is validated
    /// against live stock. Re-running the same update is a no-op.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        identity: &Identity,
        line_ref: &str,
        quantity: i32,
    ) -> Result<Vec<CartLine>, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(identity, line_ref).await;
        }
        self.validate_quantity(quantity)?;
        let _guard = self.acquire_identity_lock(identity).await;

        let txn = self.db.begin().await?;

        match identity {
            Identity::User(user_id) => {
                let item_id = Uuid::parse_str(line_ref).map_err(|_| {
                    ServiceError::ValidationError(format!("Invalid line reference: {}", line_ref))
                })?;
                let item = CartItem::find_by_id(item_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Cart line {} not found", line_ref))
                    })?;

                if item.user_id != *user_id {
                    return Err(ServiceError::Forbidden(
                        "Cart line belongs to another user".to_string(),
                    ));
                }

                let product = Product::find_by_id(item.product_id)
                    .one(&txn)
                    .await?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Product {} not found", item.product_id))
                    })?;
                self.check_line_limits(&product, quantity)?;

                let product_id = item.product_id;
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(Utc::now());
                item.update(&txn).await?;

                txn.commit().await?;

                self.event_sender
                    .send_or_log(Event::CartItemUpdated {
                        identity: identity.key(),
                        product_id,
                    })
                    .await;
            }
            Identity::Session(session_id) => {
                let (product_id, added_at) = decode_anon_line_ref(line_ref).ok_or_else(|| {
                    ServiceError::ValidationError(format!("Invalid line reference: {}", line_ref))
                })?;

                let cart = AnonymousCart::find_by_id(session_id.clone())
                    .one(&txn)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("Cart is empty".to_string()))?;

                let mut entries = cart.entries();
                let entry = entries
                    .iter_mut()
                    .find(|e| e.product_id == product_id && e.added_at == added_at)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Cart line {} not found", line_ref))
                    })?;

                let product = Product::find_by_id(product_id)
                    .one(&txn)
                    .await?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Product {} not found", product_id))
                    })?;
                self.check_line_limits(&product, quantity)?;

                entry.quantity = quantity;
                self.store_anonymous_entries(&txn, cart, entries).await?;

                txn.commit().await?;

                self.event_sender
                    .send_or_log(Event::CartItemUpdated {
                        identity: identity.key(),
                        product_id,
                    })
                    .await;
            }
        }

        self.get_line_items(identity).await
    }

    /// Removes one line from the cart. Removing an already-absent line is
    /// not an error for anonymous carts being re-submitted; user carts
    /// report NotFound so the UI can refresh.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        identity: &Identity,
        line_ref: &str,
    ) -> Result<Vec<CartLine>, ServiceError> {
        let _guard = self.acquire_identity_lock(identity).await;

        match identity {
            Identity::User(user_id) => {
                let item_id = Uuid::parse_str(line_ref).map_err(|_| {
                    ServiceError::ValidationError(format!("Invalid line reference: {}", line_ref))
                })?;
                let item = CartItem::find_by_id(item_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Cart line {} not found", line_ref))
                    })?;

                if item.user_id != *user_id {
                    return Err(ServiceError::Forbidden(
                        "Cart line belongs to another user".to_string(),
                    ));
                }

                let product_id = item.product_id;
                CartItem::delete_by_id(item_id).exec(&*self.db).await?;

                self.event_sender
                    .send_or_log(Event::CartItemRemoved {
                        identity: identity.key(),
                        product_id,
                    })
                    .await;
            }
            Identity::Session(session_id) => {
                let (product_id, added_at) = decode_anon_line_ref(line_ref).ok_or_else(|| {
                    ServiceError::ValidationError(format!("Invalid line reference: {}", line_ref))
                })?;

                if let Some(cart) = AnonymousCart::find_by_id(session_id.clone())
                    .one(&*self.db)
                    .await?
                {
                    let mut entries = cart.entries();
                    entries.retain(|e| !(e.product_id == product_id && e.added_at == added_at));
                    self.store_anonymous_entries(&*self.db, cart, entries)
                        .await?;

                    self.event_sender
                        .send_or_log(Event::CartItemRemoved {
                            identity: identity.key(),
                            product_id,
                        })
                        .await;
                }
            }
        }

        self.get_line_items(identity).await
    }

    /// Empties the cart. User rows are deleted; the anonymous blob is
    /// reset to an empty list but the row itself is kept.
    #[instrument(skip(self))]
    pub async fn clear(&self, identity: &Identity) -> Result<(), ServiceError> {
        let _guard = self.acquire_identity_lock(identity).await;

        match identity {
            Identity::User(user_id) => {
                CartItem::delete_many()
                    .filter(cart_item::Column::UserId.eq(*user_id))
                    .exec(&*self.db)
                    .await?;
            }
            Identity::Session(session_id) => {
                if let Some(cart) = AnonymousCart::find_by_id(session_id.clone())
                    .one(&*self.db)
                    .await?
                {
                    self.store_anonymous_entries(&*self.db, cart, Vec::new())
                        .await?;
                }
            }
        }

        self.event_sender
            .send_or_log(Event::CartCleared {
                identity: identity.key(),
            })
            .await;

        info!(identity = %identity, "Cleared cart");
        Ok(())
    }

    /// Folds a visitor's anonymous cart into their user cart after
    /// sign-in, then resets the blob.
    ///
    /// Collisions merge by summing; quantities clamp to live stock and the
    /// per-line maximum instead of failing, because a stale anonymous line
    /// must not break login. Checkout re-validates stock anyway.
    #[instrument(skip(self))]
    pub async fn merge_session_cart(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<Vec<CartLine>, ServiceError> {
        let user_identity = Identity::User(user_id);
        let session_identity = Identity::Session(session_id.to_string());
        let _user_guard = self.acquire_identity_lock(&user_identity).await;
        let _session_guard = self.acquire_identity_lock(&session_identity).await;

        let txn = self.db.begin().await?;

        let Some(cart) = AnonymousCart::find_by_id(session_id.to_string())
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            return self.get_line_items(&user_identity).await;
        };

        let entries = cart.entries();
        let mut merged_lines = 0usize;

        for entry in &entries {
            let Some(product) = Product::find_by_id(entry.product_id)
                .one(&txn)
                .await?
                .filter(|p| p.is_active)
            else {
                debug!(product_id = %entry.product_id, "Skipping stale anonymous line during merge");
                continue;
            };

            let existing = CartItem::find()
                .filter(cart_item::Column::UserId.eq(user_id))
                .filter(cart_item::Column::ProductId.eq(entry.product_id))
                .one(&txn)
                .await?;

            let summed = existing.as_ref().map(|i| i.quantity).unwrap_or(0) + entry.quantity;
            let capped = summed
                .min(product.stock_quantity)
                .min(self.config.max_quantity_per_line);
            if capped < summed {
                warn!(
                    product_id = %entry.product_id,
                    requested = summed,
                    capped,
                    "Clamped quantity while merging session cart"
                );
            }
            if capped <= 0 {
                continue;
            }

            if let Some(item) = existing {
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(capped);
                item.updated_at = Set(Utc::now());
                item.update(&txn).await?;
            } else {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(entry.product_id),
                    quantity: Set(capped),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                item.insert(&txn).await?;
            }
            merged_lines += 1;
        }

        self.store_anonymous_entries(&txn, cart, Vec::new()).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartMerged {
                user_id,
                session_id: session_id.to_string(),
                merged_lines,
            })
            .await;

        info!(%user_id, session_id, merged_lines, "Merged session cart into user cart");
        self.get_line_items(&user_identity).await
    }

    // ---- internals ----

    fn validate_quantity(&self, quantity: i32) -> Result<(), ServiceError> {
        if quantity < 1 || quantity > self.config.max_quantity_per_line {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between 1 and {}",
                self.config.max_quantity_per_line
            )));
        }
        Ok(())
    }

    /// Validates a merged line quantity against stock and the per-line
    /// cap. Never silently caps; the caller gets the available count.
    fn check_line_limits(
        &self,
        product: &product::Model,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity > self.config.max_quantity_per_line {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between 1 and {}",
                self.config.max_quantity_per_line
            )));
        }
        if quantity > product.stock_quantity {
            return Err(ServiceError::InsufficientStock {
                product_id: product.id,
                requested: quantity,
                available: product.stock_quantity,
            });
        }
        Ok(())
    }

    pub(crate) async fn user_line_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<Vec<CartLine>, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(conn)
            .await?;

        let products = self
            .load_products(conn, items.iter().map(|i| i.product_id))
            .await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            match products.get(&item.product_id) {
                Some(p) if p.is_active => lines.push(Self::line_from_product(
                    item.id.to_string(),
                    p,
                    item.quantity,
                )),
                _ => {
                    warn!(
                        %user_id,
                        product_id = %item.product_id,
                        "Dropping cart line for missing or inactive product"
                    );
                }
            }
        }
        Ok(lines)
    }

    async fn anonymous_line_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: &str,
    ) -> Result<Vec<CartLine>, ServiceError> {
        // A pure read: no lazy row creation on display paths.
        let Some(cart) = AnonymousCart::find_by_id(session_id.to_string())
            .one(conn)
            .await?
        else {
            return Ok(Vec::new());
        };

        let entries = cart.entries();
        let products = self
            .load_products(conn, entries.iter().map(|e| e.product_id))
            .await?;

        // Entries for products that no longer resolve are silently dropped
        // from the view; the stored blob is not cleaned up here.
        let lines = entries
            .iter()
            .filter_map(|entry| {
                products
                    .get(&entry.product_id)
                    .filter(|p| p.is_active)
                    .map(|p| {
                        Self::line_from_product(
                            encode_anon_line_ref(entry.product_id, entry.added_at),
                            p,
                            entry.quantity,
                        )
                    })
            })
            .collect();
        Ok(lines)
    }

    async fn load_products<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: impl Iterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        let ids: Vec<Uuid> = ids.collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let products = Product::find()
            .filter(product::Column::Id.is_in(ids))
            .all(conn)
            .await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    fn line_from_product(line_ref: String, product: &product::Model, quantity: i32) -> CartLine {
        CartLine {
            line_ref,
            product_id: product.id,
            product_name: product.name.clone(),
            store_id: product.store_id,
            category_id: product.category_id,
            quantity,
            unit_price: product.price,
            line_total: product.price * Decimal::from(quantity),
        }
    }

    async fn fetch_or_create_anonymous<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: &str,
    ) -> Result<anonymous_cart::Model, ServiceError> {
        if let Some(cart) = AnonymousCart::find_by_id(session_id.to_string())
            .one(conn)
            .await?
        {
            return Ok(cart);
        }

        let cart = anonymous_cart::ActiveModel {
            session_id: Set(session_id.to_string()),
            cart_data: Set(serde_json::Value::Array(Vec::new())),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        Ok(cart.insert(conn).await?)
    }

    async fn store_anonymous_entries<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: anonymous_cart::Model,
        entries: Vec<CartEntry>,
    ) -> Result<(), ServiceError> {
        let mut cart: anonymous_cart::ActiveModel = cart.into();
        cart.cart_data = Set(serde_json::to_value(&entries)?);
        cart.updated_at = Set(Utc::now());
        cart.update(conn).await?;
        Ok(())
    }
}
