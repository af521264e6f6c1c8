//! Who may see an order and who may move it where.
//!
//! Every role-specific surface goes through these two functions so that visibility and
//! transition legality are decided in one place.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entities::{DeliveryStatus, OrderModel, OrderStatus, StorePartition},
    errors::ServiceError,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorRole {
    SiteSupervisor,
    StoreManager,
    WorkshopManager,
    TransportManager,
    Admin,
}

impl ActorRole {
    /// Store partition a store-side manager role is responsible for.
    pub fn partition(self) -> Option<StorePartition> {
        match self {
            ActorRole::StoreManager => Some(StorePartition::Store),
            ActorRole::WorkshopManager => Some(StorePartition::Workshop),
            _ => None,
        }
    }
}

/// The user performing an operation, as resolved by the caller's auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i32,
    pub role: ActorRole,
    pub site_id: Option<i32>,
    pub store_partition: Option<StorePartition>,
}

impl Actor {
    pub fn new(id: i32, role: ActorRole) -> Self {
        Self {
            id,
            role,
            site_id: None,
            store_partition: role.partition(),
        }
    }

    pub fn site_supervisor(id: i32, site_id: i32) -> Self {
        Self {
            site_id: Some(site_id),
            ..Self::new(id, ActorRole::SiteSupervisor)
        }
    }

    pub fn store_manager(id: i32) -> Self {
        Self::new(id, ActorRole::StoreManager)
    }

    pub fn workshop_manager(id: i32) -> Self {
        Self::new(id, ActorRole::WorkshopManager)
    }

    pub fn transport_manager(id: i32) -> Self {
        Self::new(id, ActorRole::TransportManager)
    }

    pub fn admin(id: i32) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    fn is_store_side(&self) -> bool {
        matches!(self.role, ActorRole::StoreManager | ActorRole::WorkshopManager)
    }

    /// Store-side manager responsible for the order's partition; any of them for LPO orders.
    fn handles_partition_of(&self, order: &OrderModel) -> bool {
        self.is_store_side()
            && (order.is_lpo || self.store_partition == Some(order.store_manager_role))
    }
}

/// A requested change to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum OrderAction {
    Approve,
    Reject,
    Advance(DeliveryStatus),
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderAction::Approve => f.write_str("approve"),
            OrderAction::Reject => f.write_str("reject"),
            OrderAction::Advance(target) => write!(f, "advance to {}", target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("{0} is not a delivery status transport can set")]
    NotATransportTarget(DeliveryStatus),
    #[error("order {0} is rejected")]
    Rejected(i32),
    #[error("cannot move order {order_id} from {from} to {to}")]
    IllegalTransition {
        order_id: i32,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    #[error("order {order_id} is {status}; only pending orders can be approved")]
    NotPending { order_id: i32, status: OrderStatus },
    #[error("order {order_id} is already {status}")]
    NotRejectable { order_id: i32, status: DeliveryStatus },
    #[error("{role} {actor_id} may not {action} order {order_id}")]
    NotPermitted {
        actor_id: i32,
        role: ActorRole,
        action: OrderAction,
        order_id: i32,
    },
}

impl From<PolicyViolation> for ServiceError {
    fn from(violation: PolicyViolation) -> Self {
        ServiceError::ValidationError(violation.to_string())
    }
}

/// Transport-side transitions of `delivery_status`.
pub fn is_legal_transition(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    use DeliveryStatus::*;
    matches!(
        (from, to),
        (Approved, InTransit)
            | (Approved, OutForDelivery)
            | (InTransit, OutForDelivery)
            | (Approved, Delivered)
            | (InTransit, Delivered)
            | (OutForDelivery, Delivered)
    )
}

pub fn is_visible_to(order: &OrderModel, actor: &Actor) -> bool {
    match actor.role {
        ActorRole::Admin => true,
        ActorRole::SiteSupervisor => actor.site_id.is_some() && order.site_id == actor.site_id,
        ActorRole::StoreManager | ActorRole::WorkshopManager => actor.handles_partition_of(order),
        ActorRole::TransportManager => {
            !order.is_rejected()
                && order.delivery_status.stage() >= DeliveryStatus::Approved.stage()
                && order
                    .transport_manager_id
                    .map_or(true, |assigned| assigned == actor.id)
        }
    }
}

/// Decides whether `actor` may apply `action` to `order` in its current state.
///
/// State problems are reported before permission problems, so an impossible move is
/// described as such regardless of who asked.
pub fn check(actor: &Actor, order: &OrderModel, action: OrderAction) -> Result<(), PolicyViolation> {
    let not_permitted = || PolicyViolation::NotPermitted {
        actor_id: actor.id,
        role: actor.role,
        action,
        order_id: order.id,
    };

    match action {
        OrderAction::Approve => {
            if order.status != OrderStatus::Pending || order.delivery_status != DeliveryStatus::Pending {
                return Err(PolicyViolation::NotPending {
                    order_id: order.id,
                    status: order.status,
                });
            }
            if actor.role != ActorRole::Admin && !actor.handles_partition_of(order) {
                return Err(not_permitted());
            }
        }
        OrderAction::Reject => {
            if order.is_rejected() {
                return Err(PolicyViolation::Rejected(order.id));
            }
            if !matches!(
                order.delivery_status,
                DeliveryStatus::Pending | DeliveryStatus::Approved
            ) {
                return Err(PolicyViolation::NotRejectable {
                    order_id: order.id,
                    status: order.delivery_status,
                });
            }
            if actor.role != ActorRole::Admin && !actor.handles_partition_of(order) {
                return Err(not_permitted());
            }
        }
        OrderAction::Advance(target) => {
            if !target.is_transport_target() {
                return Err(PolicyViolation::NotATransportTarget(target));
            }
            if order.is_rejected() {
                return Err(PolicyViolation::Rejected(order.id));
            }
            if !is_legal_transition(order.delivery_status, target) {
                return Err(PolicyViolation::IllegalTransition {
                    order_id: order.id,
                    from: order.delivery_status,
                    to: target,
                });
            }
            let role_ok = matches!(actor.role, ActorRole::TransportManager | ActorRole::Admin);
            if !role_ok || !is_visible_to(order, actor) {
                return Err(not_permitted());
            }
        }
    }
    Ok(())
}

pub fn permits(actor: &Actor, order: &OrderModel, action: OrderAction) -> bool {
    check(actor, order, action).is_ok()
}
