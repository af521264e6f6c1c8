use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "return_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub return_id: i32,
    pub product_id: i32,
    /// Snapshot of the originally ordered amount, when order-linked
    pub ordered_quantity: Option<i32>,
    pub return_quantity: i32,
    pub unit_type: Option<String>,
    /// Informational rows (false) never touch the ledger
    pub adjust_stock: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order_return::Entity",
        from = "Column::ReturnId",
        to = "super::order_return::Column::Id",
        on_delete = "Cascade"
    )]
    OrderReturn,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::order_return::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderReturn.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
