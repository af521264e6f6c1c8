use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wastage_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub wastage_id: i32,
    pub product_id: i32,
    pub ordered_quantity: Option<i32>,
    pub wastage_qty: i32,
    pub unit_type: Option<String>,
    pub adjust_stock: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wastage::Entity",
        from = "Column::WastageId",
        to = "super::wastage::Column::Id",
        on_delete = "Cascade"
    )]
    Wastage,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::wastage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wastage.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
