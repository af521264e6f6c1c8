use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Coarse order status as shown across the application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "out_of_delivery")]
    OutOfDelivery,
    #[sea_orm(string_value = "delivery")]
    Delivery,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

/// Transport-facing delivery sub-state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    #[strum(serialize = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    #[serde(rename = "approved")]
    #[strum(serialize = "approved")]
    Approved,
    #[sea_orm(string_value = "in_transit")]
    #[serde(rename = "in_transit")]
    #[strum(serialize = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "outfordelivery")]
    #[serde(rename = "outfordelivery")]
    #[strum(serialize = "outfordelivery")]
    OutForDelivery,
    #[sea_orm(string_value = "delivered")]
    #[serde(rename = "delivered")]
    #[strum(serialize = "delivered")]
    Delivered,
}

impl DeliveryStatus {
    /// Targets the transport side is allowed to request.
    pub const TRANSPORT_TARGETS: [DeliveryStatus; 3] = [
        DeliveryStatus::InTransit,
        DeliveryStatus::OutForDelivery,
        DeliveryStatus::Delivered,
    ];

    pub fn is_transport_target(self) -> bool {
        Self::TRANSPORT_TARGETS.contains(&self)
    }

    /// Coarse status written alongside this delivery status.
    pub fn coarse_status(self) -> OrderStatus {
        match self {
            DeliveryStatus::Pending => OrderStatus::Pending,
            DeliveryStatus::Approved => OrderStatus::Approved,
            DeliveryStatus::InTransit => OrderStatus::InTransit,
            DeliveryStatus::OutForDelivery => OrderStatus::OutOfDelivery,
            DeliveryStatus::Delivered => OrderStatus::Delivery,
        }
    }

    /// Position in the pipeline; used for "at or beyond" comparisons.
    pub fn stage(self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Approved => 1,
            DeliveryStatus::InTransit => 2,
            DeliveryStatus::OutForDelivery => 3,
            DeliveryStatus::Delivered => 4,
        }
    }
}

/// Store-side partition an order (or sub-order of a mixed order) is routed to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorePartition {
    #[sea_orm(string_value = "store")]
    Store,
    #[sea_orm(string_value = "workshop")]
    Workshop,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub order_number: String,
    pub site_id: Option<i32>,
    pub created_by: i32,
    pub status: OrderStatus,
    pub delivery_status: DeliveryStatus,
    /// Store-side manager role the order is routed to
    pub store_manager_role: StorePartition,
    /// LPO orders bypass store-role routing
    pub is_lpo: bool,
    /// Orders sharing this key are the partitions of one mixed order
    pub mixed_group: Option<String>,
    pub driver_name: Option<String>,
    pub vehicle_number: Option<String>,
    pub transport_manager_id: Option<i32>,
    pub approved_by: Option<i32>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<i32>,
    pub mixed_completed_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_rejected(&self) -> bool {
        self.status == OrderStatus::Rejected
    }

    pub fn is_delivered(&self) -> bool {
        self.delivery_status == DeliveryStatus::Delivered
    }
}
