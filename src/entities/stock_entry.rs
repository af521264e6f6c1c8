use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::product::StockPool;
use crate::{errors::ServiceError, provenance::Reference};

/// Direction label of a ledger entry. Display only; never used to compute stock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdjustmentType {
    #[sea_orm(string_value = "in")]
    In,
    #[sea_orm(string_value = "out")]
    Out,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
}

/// One immutable ledger row. `quantity` is the resulting on-hand amount, not a delta.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub pool: StockPool,
    pub product_id: i32,
    /// None is the general/warehouse pool
    pub site_id: Option<i32>,
    pub quantity: i32,
    /// On-hand amount this entry was computed from
    pub previous_quantity: i32,
    pub adjustment_type: AdjustmentType,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub name: Option<String>,
    pub notes: Option<String>,
    /// false once voided; voided rows stay for the audit trail
    pub status: bool,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Ledger partition key: one product in the general pool or in one site's sub-inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: i32,
    pub site_id: Option<i32>,
}

impl StockKey {
    pub fn new(product_id: i32, site_id: Option<i32>) -> Self {
        Self {
            product_id,
            site_id,
        }
    }

    /// Filter expression selecting rows of this key.
    pub fn condition(&self) -> sea_orm::Condition {
        let site = match self.site_id {
            Some(site_id) => Column::SiteId.eq(site_id),
            None => Column::SiteId.is_null(),
        };
        sea_orm::Condition::all()
            .add(Column::ProductId.eq(self.product_id))
            .add(site)
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.site_id {
            Some(site_id) => write!(f, "product {} @ site {}", self.product_id, site_id),
            None => write!(f, "product {} @ general", self.product_id),
        }
    }
}

impl Model {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.site_id)
    }

    /// Signed amount this entry added on top of the quantity it was computed from.
    pub fn contribution(&self) -> i32 {
        self.quantity - self.previous_quantity
    }

    pub fn reference(&self) -> Result<Reference, ServiceError> {
        Reference::from_columns(self.reference_type.as_deref(), self.reference_id)
    }
}
