use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session-scoped cart for a visitor who has not signed in.
///
/// One row per session id, created lazily on the first mutation and
/// holding the serialized line entries in `cart_data`. The blob is reset
/// to `[]` on clear or on merge into a user cart; rows are never expired
/// automatically.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "anonymous_carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    #[sea_orm(column_type = "Json")]
    pub cart_data: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// One line entry inside `cart_data`. A typed list with explicit serde,
/// not an untyped map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Unix timestamp of when the entry was added; part of the synthetic
    /// line identity for update/remove.
    pub added_at: i64,
}

impl Model {
    /// Decode the stored entry list. A malformed blob decodes to empty
    /// rather than erroring a read path.
    pub fn entries(&self) -> Vec<CartEntry> {
        serde_json::from_value(self.cart_data.clone()).unwrap_or_default()
    }
}
