// Stock ledger and its read side
pub mod stock_ledger;
pub mod stock_projector;

// Aggregates that own derived ledger rows
pub mod line_items;
pub mod returns;
pub mod stock_sync;
pub mod wastages;

// Order approval and delivery
pub mod order_delivery;
pub mod order_policy;
