//! sea-orm entities for the stock ledger, return/wastage aggregates and orders.

pub mod order;
pub mod order_return;
pub mod product;
pub mod return_item;
pub mod stock_entry;
pub mod wastage;
pub mod wastage_item;

pub use order::{
    DeliveryStatus, Entity as OrderEntity, Model as OrderModel, OrderStatus, StorePartition,
};
pub use product::{Entity as ProductEntity, Model as ProductModel, StockPool};
pub use stock_entry::{
    AdjustmentType, Entity as StockEntryEntity, Model as StockEntryModel, StockKey,
};
