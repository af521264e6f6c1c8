use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which of the two parallel stock ledgers a product's entries belong to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockPool {
    /// Finished products
    #[sea_orm(string_value = "product")]
    Product,
    /// Raw materials
    #[sea_orm(string_value = "material")]
    Material,
}

/// Catalog projection of a product; the catalog itself is owned elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// true for finished products, false for raw materials
    pub is_product: bool,
    pub low_stock_threshold: Option<i32>,
    pub unit_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn pool(&self) -> StockPool {
        if self.is_product {
            StockPool::Product
        } else {
            StockPool::Material
        }
    }
}
