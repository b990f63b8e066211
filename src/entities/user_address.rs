use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Saved delivery address. The first address a user saves becomes the
/// default; checkout reuses an exact field match instead of inserting a
/// duplicate row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_addresses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(nullable)]
    pub label: Option<String>,
    pub line1: String,
    #[sea_orm(nullable)]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    #[sea_orm(nullable)]
    pub phone: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Single-line rendering stored on orders so order history is immune
    /// to later edits of the address book.
    pub fn formatted(&self) -> String {
        let mut parts = vec![self.line1.clone()];
        if let Some(line2) = &self.line2 {
            if !line2.is_empty() {
                parts.push(line2.clone());
            }
        }
        parts.push(self.city.clone());
        parts.push(self.postal_code.clone());
        parts.join(", ")
    }
}
