use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wastage header; exclusively owns its `wastage_items`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wastages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub wastage_type: String,
    pub site_id: Option<i32>,
    pub manager_id: i32,
    pub order_id: Option<i32>,
    pub date: NaiveDate,
    /// Free-form workflow label
    pub status: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::wastage_item::Entity")]
    WastageItem,
}

impl Related<super::wastage_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WastageItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
