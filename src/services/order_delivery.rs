//! Order approval, rejection and transport delivery transitions.
//!
//! Transitions are serialized per mixed group (or per order when standalone) in-process and
//! guarded by the order's `version` column across processes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::{
    db::{self, DbPool},
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Column},
        DeliveryStatus, OrderEntity, OrderModel, OrderStatus, StorePartition,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    locks::KeyedLocks,
    services::order_policy::{self, Actor, ActorRole, OrderAction},
};

/// Completion state of an order's mixed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MixedCompletion {
    /// Not part of a mixed group
    Standalone,
    Partial { delivered: usize, total: usize },
    Complete,
}

/// Evaluates the mixed group of `order` from its siblings.
///
/// `siblings` may include `order` itself; its row there is ignored in favour of `order`.
/// Rejected members will never be delivered and do not hold the group back.
pub fn mixed_completion(order: &OrderModel, siblings: &[OrderModel]) -> MixedCompletion {
    let group = match order.mixed_group.as_deref() {
        Some(group) => group,
        None => return MixedCompletion::Standalone,
    };

    let members = std::iter::once(order).chain(
        siblings
            .iter()
            .filter(|s| s.id != order.id && s.mixed_group.as_deref() == Some(group)),
    );
    let live: Vec<&OrderModel> = members.filter(|m| !m.is_rejected()).collect();
    let total = live.len();
    let delivered = live.iter().filter(|m| m.is_delivered()).count();

    if total > 0 && delivered == total {
        MixedCompletion::Complete
    } else {
        MixedCompletion::Partial { delivered, total }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, max = 64))]
    pub order_number: String,
    /// Ignored for site supervisors, who always order for their own site
    pub site_id: Option<i32>,
    pub store_manager_role: StorePartition,
    #[serde(default)]
    pub is_lpo: bool,
    #[validate(length(min = 1, max = 64))]
    pub mixed_group: Option<String>,
}

/// Transport request to move an order's delivery status.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdvanceDeliveryCommand {
    pub order_id: i32,
    pub target: DeliveryStatus,
    #[validate(length(min = 1, max = 255))]
    pub driver_name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub vehicle_number: Option<String>,
}

impl AdvanceDeliveryCommand {
    pub fn new(order_id: i32, target: DeliveryStatus) -> Self {
        Self {
            order_id,
            target,
            driver_name: None,
            vehicle_number: None,
        }
    }

    pub fn with_driver(mut self, driver_name: impl Into<String>, vehicle_number: impl Into<String>) -> Self {
        self.driver_name = Some(driver_name.into());
        self.vehicle_number = Some(vehicle_number.into());
        self
    }
}

/// Result of one committed transition.
#[derive(Debug, Clone)]
struct Transitioned {
    before: OrderModel,
    after: OrderModel,
    /// Group key and member ids when this transition completed a mixed group
    group_completed: Option<(String, Vec<i32>)>,
}

fn lock_key(order: &OrderModel) -> String {
    match &order.mixed_group {
        Some(group) => format!("group:{}", group),
        None => format!("order:{}", order.id),
    }
}

fn action_name(action: OrderAction) -> &'static str {
    match action {
        OrderAction::Approve => "approve",
        OrderAction::Reject => "reject",
        OrderAction::Advance(_) => "advance",
    }
}

/// Service for moving orders through approval and delivery
#[derive(Clone)]
pub struct OrderDeliveryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    locks: Arc<KeyedLocks<String>>,
}

impl OrderDeliveryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Creates a pending order on behalf of a site supervisor (or an admin).
    #[instrument(skip(self, input), fields(actor_id = actor.id, order_number = %input.order_number))]
    pub async fn create_order(
        &self,
        actor: &Actor,
        input: CreateOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.validate()?;
        let site_id = match actor.role {
            ActorRole::SiteSupervisor => match actor.site_id {
                Some(site_id) => Some(site_id),
                None => {
                    return Err(ServiceError::ValidationError(format!(
                        "site supervisor {} has no site",
                        actor.id
                    )))
                }
            },
            ActorRole::Admin => input.site_id,
            role => {
                return Err(ServiceError::ValidationError(format!(
                    "{} {} may not create orders",
                    role, actor.id
                )))
            }
        };

        let now = Utc::now();
        let order = OrderActiveModel {
            order_number: Set(input.order_number),
            site_id: Set(site_id),
            created_by: Set(actor.id),
            status: Set(OrderStatus::Pending),
            delivery_status: Set(DeliveryStatus::Pending),
            store_manager_role: Set(input.store_manager_role),
            is_lpo: Set(input.is_lpo),
            mixed_group: Set(input.mixed_group),
            is_completed: Set(false),
            version: Set(1),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await?;

        info!(order_id = order.id, "Order created");
        self.event_sender.publish(Event::OrderCreated(order.id)).await;
        Ok(order)
    }

    /// Approves a pending order; store-side manager of its partition or admin.
    #[instrument(skip(self, actor), fields(actor_id = actor.id, role = %actor.role))]
    pub async fn approve(&self, order_id: i32, actor: &Actor) -> Result<OrderModel, ServiceError> {
        let approver = actor.id;
        let done = self
            .transition(order_id, actor, OrderAction::Approve, move |_, now| OrderActiveModel {
                status: Set(OrderStatus::Approved),
                delivery_status: Set(DeliveryStatus::Approved),
                approved_by: Set(Some(approver)),
                approved_at: Set(Some(now)),
                ..Default::default()
            })
            .await?;

        self.event_sender
            .publish(Event::OrderApproved {
                order_id,
                approved_by: approver,
            })
            .await;
        Ok(done.after)
    }

    /// Rejects a pending or approved order. `delivery_status` is left as it was.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.id, role = %actor.role))]
    pub async fn reject(
        &self,
        order_id: i32,
        actor: &Actor,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "a rejection reason is required".into(),
            ));
        }

        let stored = reason.clone();
        let done = self
            .transition(order_id, actor, OrderAction::Reject, move |_, _| OrderActiveModel {
                status: Set(OrderStatus::Rejected),
                rejection_reason: Set(Some(stored)),
                ..Default::default()
            })
            .await?;

        self.event_sender
            .publish(Event::OrderRejected { order_id, reason })
            .await;
        self.publish_group_completion(&done).await;
        Ok(done.after)
    }

    /// Moves an order along the transport side of the delivery pipeline.
    ///
    /// Delivery stamps completion on the order and, for mixed orders, on every member of
    /// the group once all of them are delivered.
    #[instrument(skip(self, actor, command), fields(order_id = command.order_id, target = %command.target, actor_id = actor.id))]
    pub async fn advance(
        &self,
        actor: &Actor,
        command: AdvanceDeliveryCommand,
    ) -> Result<OrderModel, ServiceError> {
        if !command.target.is_transport_target() {
            counter!("sitestock_order.transition_rejected", 1, "action" => "advance");
            return Err(order_policy::PolicyViolation::NotATransportTarget(command.target).into());
        }
        command.validate()?;

        let target = command.target;
        let actor_id = actor.id;
        let claims_transport = actor.role == ActorRole::TransportManager;
        let AdvanceDeliveryCommand {
            order_id,
            driver_name,
            vehicle_number,
            ..
        } = command;

        let done = self
            .transition(order_id, actor, OrderAction::Advance(target), move |current, now| {
                let mut changes = OrderActiveModel {
                    delivery_status: Set(target),
                    status: Set(target.coarse_status()),
                    ..Default::default()
                };
                if let Some(driver_name) = driver_name {
                    changes.driver_name = Set(Some(driver_name));
                }
                if let Some(vehicle_number) = vehicle_number {
                    changes.vehicle_number = Set(Some(vehicle_number));
                }
                if claims_transport && current.transport_manager_id.is_none() {
                    changes.transport_manager_id = Set(Some(actor_id));
                }
                if target == DeliveryStatus::Delivered {
                    changes.is_completed = Set(true);
                    changes.completed_at = Set(Some(now));
                    changes.completed_by = Set(Some(actor_id));
                }
                changes
            })
            .await?;

        self.event_sender
            .publish(Event::OrderDeliveryAdvanced {
                order_id,
                from: done.before.delivery_status,
                to: target,
            })
            .await;
        if target == DeliveryStatus::Delivered {
            self.event_sender
                .publish(Event::OrderCompleted {
                    order_id,
                    completed_by: actor_id,
                })
                .await;
        }
        self.publish_group_completion(&done).await;
        Ok(done.after)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: i32) -> Result<OrderModel, ServiceError> {
        find_order(&*self.db_pool, order_id, false).await
    }

    /// Orders `actor` may see, newest first.
    #[instrument(skip(self, actor), fields(actor_id = actor.id, role = %actor.role))]
    pub async fn visible_orders(&self, actor: &Actor) -> Result<Vec<OrderModel>, ServiceError> {
        let orders = OrderEntity::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(orders
            .into_iter()
            .filter(|order| order_policy::is_visible_to(order, actor))
            .collect())
    }

    /// Current completion state of the mixed group `order_id` belongs to.
    pub async fn mixed_completion_for(&self, order_id: i32) -> Result<MixedCompletion, ServiceError> {
        let order = self.get_order(order_id).await?;
        let siblings = match &order.mixed_group {
            Some(group) => group_members(&*self.db_pool, group).await?,
            None => Vec::new(),
        };
        Ok(mixed_completion(&order, &siblings))
    }

    /// Lock, load, check, versioned update, group check, commit.
    async fn transition<F>(
        &self,
        order_id: i32,
        actor: &Actor,
        action: OrderAction,
        changes: F,
    ) -> Result<Transitioned, ServiceError>
    where
        F: FnOnce(&OrderModel, DateTime<Utc>) -> OrderActiveModel,
    {
        let order = find_order(&*self.db_pool, order_id, false).await?;
        let _guard = self.locks.lock(lock_key(&order)).await;

        let txn = db::begin(&self.db_pool, "order.transition").await?;
        let before = find_order(txn.conn(), order_id, true).await?;
        if let Err(violation) = order_policy::check(actor, &before, action) {
            counter!("sitestock_order.transition_rejected", 1, "action" => action_name(action));
            warn!(order_id, %action, reason = %violation, "Order transition rejected");
            return Err(violation.into());
        }

        let now = Utc::now();
        let mut update = changes(&before, now);
        update.version = Set(before.version + 1);
        update.updated_at = Set(Some(now));

        let result = OrderEntity::update_many()
            .set(update)
            .filter(Column::Id.eq(order_id))
            .filter(Column::Version.eq(before.version))
            .exec(txn.conn())
            .await?;
        if result.rows_affected == 0 {
            warn!(order_id, version = before.version, "Order changed concurrently");
            return Err(ServiceError::Conflict(format!(
                "order {} was modified concurrently; reload and retry",
                order_id
            )));
        }

        let group_completed = match before.mixed_group.as_deref() {
            Some(group) => complete_group_in(txn.conn(), order_id, group, now).await?,
            None => None,
        };
        let after = find_order(txn.conn(), order_id, false).await?;
        txn.commit().await?;

        counter!("sitestock_order.transition", 1, "action" => action_name(action));
        info!(
            order_id,
            %action,
            from = %before.delivery_status,
            to = %after.delivery_status,
            status = %after.status,
            "Order transitioned"
        );
        Ok(Transitioned {
            before,
            after,
            group_completed,
        })
    }

    async fn publish_group_completion(&self, done: &Transitioned) {
        if let Some((group, order_ids)) = &done.group_completed {
            self.event_sender
                .publish(Event::MixedOrderCompleted {
                    group: group.clone(),
                    order_ids: order_ids.clone(),
                })
                .await;
        }
    }
}

async fn find_order<C>(conn: &C, order_id: i32, for_update: bool) -> Result<OrderModel, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = OrderEntity::find_by_id(order_id);
    if for_update && db::supports_row_locks(conn.get_database_backend()) {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Order", order_id))
}

async fn group_members<C>(conn: &C, group: &str) -> Result<Vec<OrderModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(OrderEntity::find()
        .filter(Column::MixedGroup.eq(group))
        .order_by_asc(Column::Id)
        .all(conn)
        .await?)
}

/// Stamps `mixed_completed_at` on every member once the whole group is delivered.
async fn complete_group_in<C>(
    conn: &C,
    order_id: i32,
    group: &str,
    now: DateTime<Utc>,
) -> Result<Option<(String, Vec<i32>)>, ServiceError>
where
    C: ConnectionTrait,
{
    let members = group_members(conn, group).await?;
    let order = match members.iter().find(|m| m.id == order_id) {
        Some(order) => order,
        None => return Ok(None),
    };

    match mixed_completion(order, &members) {
        MixedCompletion::Complete => {
            if members.iter().all(|m| m.mixed_completed_at.is_some()) {
                return Ok(None);
            }
            order::Entity::update_many()
                .col_expr(Column::MixedCompletedAt, Expr::value(now))
                .col_expr(Column::Version, Expr::col(Column::Version).add(1))
                .filter(Column::MixedGroup.eq(group))
                .filter(Column::MixedCompletedAt.is_null())
                .exec(conn)
                .await?;
            let ids: Vec<i32> = members.iter().map(|m| m.id).collect();
            info!(group, members = ids.len(), "Mixed order completed");
            Ok(Some((group.to_string(), ids)))
        }
        MixedCompletion::Partial { delivered, total } => {
            debug!(group, delivered, total, "Mixed order partially delivered");
            Ok(None)
        }
        MixedCompletion::Standalone => Ok(None),
    }
}
