use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use validator::Validate;

use crate::{
    db::{self, DbPool},
    entities::{
        order_return::{self, ReturnStatus},
        product, return_item, AdjustmentType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    provenance::Reference,
    services::{
        line_items::{check_references, line_keys, validate_lines, LineInput},
        stock_sync::{StockSource, StockSyncService, SyncLine, SyncOutcome},
    },
};

fn default_adjust_stock() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReturnLineInput {
    pub product_id: i32,
    #[validate(range(min = 0))]
    pub ordered_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub return_quantity: i32,
    pub unit_type: Option<String>,
    #[serde(default = "default_adjust_stock")]
    pub adjust_stock: bool,
}

/// Header plus the full line set of a return; `update` replaces every line.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReturnInput {
    #[validate(length(min = 1, max = 64))]
    pub return_type: String,
    pub site_id: Option<i32>,
    pub manager_id: i32,
    pub order_id: Option<i32>,
    pub date: NaiveDate,
    pub status: Option<ReturnStatus>,
    pub reason: Option<String>,
    #[validate(length(min = 1))]
    pub items: Vec<ReturnLineInput>,
}

impl LineInput for ReturnLineInput {
    fn product_id(&self) -> i32 {
        self.product_id
    }

    fn ordered_quantity(&self) -> Option<i32> {
        self.ordered_quantity
    }

    fn quantity(&self) -> i32 {
        self.return_quantity
    }
}

impl ReturnInput {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        validate_lines(&self.items, "return")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnAggregate {
    pub header: order_return::Model,
    pub items: Vec<return_item::Model>,
}

#[async_trait]
impl StockSource for order_return::Model {
    fn reference(&self) -> Reference {
        Reference::Return(self.id)
    }

    fn site_id(&self) -> Option<i32> {
        self.site_id
    }

    /// Returned material flows back into stock.
    fn direction(&self) -> AdjustmentType {
        AdjustmentType::In
    }

    fn note(&self, quantity: i32) -> String {
        format!("Return #{}: +{} returned", self.id, quantity)
    }

    fn actor(&self) -> Option<i32> {
        Some(self.manager_id)
    }

    async fn load_lines(&self, conn: &DatabaseTransaction) -> Result<Vec<SyncLine>, ServiceError> {
        let rows = return_item::Entity::find()
            .filter(return_item::Column::ReturnId.eq(self.id))
            .order_by_asc(return_item::Column::Id)
            .find_also_related(product::Entity)
            .all(conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(item, product)| SyncLine {
                product_id: item.product_id,
                quantity: item.return_quantity,
                adjust_stock: item.adjust_stock,
                product,
            })
            .collect())
    }
}

/// Service for managing returns and the stock rows they own
#[derive(Clone)]
pub struct ReturnService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    sync: StockSyncService,
}

impl ReturnService {
    /// Creates a new return service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, sync: StockSyncService) -> Self {
        Self {
            db_pool,
            event_sender,
            sync,
        }
    }

    /// Creates a return with its lines and writes its ledger rows
    #[instrument(skip(self, input), fields(site_id = ?input.site_id, items = input.items.len()))]
    pub async fn create(&self, input: ReturnInput) -> Result<ReturnAggregate, ServiceError> {
        input.validate_all()?;

        let guards = self
            .sync
            .ledger()
            .lock_keys(line_keys(&input.items, input.site_id))
            .await;
        let txn = db::begin(&self.db_pool, "returns.create").await?;
        check_references(txn.conn(), input.order_id, &input.items).await?;

        let now = Utc::now();
        let header = order_return::ActiveModel {
            return_type: Set(input.return_type.clone()),
            site_id: Set(input.site_id),
            manager_id: Set(input.manager_id),
            order_id: Set(input.order_id),
            date: Set(input.date),
            status: Set(input.status.unwrap_or(ReturnStatus::Pending)),
            reason: Set(input.reason.clone()),
            created_at: Set(now),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(txn.conn())
        .await
        .map_err(|e| {
            error!("Failed to insert return header: {}", e);
            ServiceError::db_error(e)
        })?;

        let items = insert_items(txn.conn(), header.id, &input.items).await?;
        let outcome = self.sync.sync_and_commit(txn, &header, &guards).await?;

        info!(return_id = header.id, appended = outcome.appended.len(), "Return created");
        self.event_sender.publish(Event::ReturnCreated(header.id)).await;
        Ok(ReturnAggregate { header, items })
    }

    /// Replaces the header fields and line set of a return, then re-syncs its ledger rows
    #[instrument(skip(self, input))]
    pub async fn update(&self, return_id: i32, input: ReturnInput) -> Result<ReturnAggregate, ServiceError> {
        input.validate_all()?;
        self.find_header(&*self.db_pool, return_id).await?;

        let product_ids: Vec<i32> = input.items.iter().map(|i| i.product_id).collect();
        let guards = self
            .sync
            .lock_for(&Reference::Return(return_id), input.site_id, product_ids)
            .await?;
        let txn = db::begin(&self.db_pool, "returns.update").await?;
        let existing = self.find_header(txn.conn(), return_id).await?;
        check_references(txn.conn(), input.order_id, &input.items).await?;

        let mut active: order_return::ActiveModel = existing.into();
        active.return_type = Set(input.return_type.clone());
        active.site_id = Set(input.site_id);
        active.manager_id = Set(input.manager_id);
        active.order_id = Set(input.order_id);
        active.date = Set(input.date);
        if let Some(status) = input.status {
            active.status = Set(status);
        }
        active.reason = Set(input.reason.clone());
        active.updated_at = Set(Some(Utc::now()));
        let header = active.update(txn.conn()).await?;

        return_item::Entity::delete_many()
            .filter(return_item::Column::ReturnId.eq(return_id))
            .exec(txn.conn())
            .await?;
        let items = insert_items(txn.conn(), return_id, &input.items).await?;
        let outcome = self.sync.sync_and_commit(txn, &header, &guards).await?;

        info!(
            return_id,
            voided = outcome.voided.len(),
            appended = outcome.appended.len(),
            "Return updated"
        );
        self.event_sender.publish(Event::ReturnUpdated(return_id)).await;
        Ok(ReturnAggregate { header, items })
    }

    /// Deletes a return, its lines and the stock effect of its ledger rows
    #[instrument(skip(self))]
    pub async fn delete(&self, return_id: i32) -> Result<SyncOutcome, ServiceError> {
        let header = self.find_header(&*self.db_pool, return_id).await?;
        let reference = header.reference();
        let guards = self.sync.lock_for(&reference, header.site_id, Vec::new()).await?;

        let txn = db::begin(&self.db_pool, "returns.delete").await?;
        let header = self.find_header(txn.conn(), return_id).await?;
        return_item::Entity::delete_many()
            .filter(return_item::Column::ReturnId.eq(return_id))
            .exec(txn.conn())
            .await?;
        header.clone().delete(txn.conn()).await?;
        // With no lines left the sync only voids and compensates.
        let outcome = self.sync.sync_and_commit(txn, &header, &guards).await?;

        info!(return_id, voided = outcome.voided.len(), "Return deleted");
        self.event_sender.publish(Event::ReturnDeleted(return_id)).await;
        Ok(outcome)
    }

    /// Gets a return with its lines
    #[instrument(skip(self))]
    pub async fn get(&self, return_id: i32) -> Result<ReturnAggregate, ServiceError> {
        let header = self.find_header(&*self.db_pool, return_id).await?;
        let items = header
            .find_related(return_item::Entity)
            .order_by_asc(return_item::Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(ReturnAggregate { header, items })
    }

    /// Moves a return through its workflow. Stock is unaffected; only lines move stock.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        return_id: i32,
        status: ReturnStatus,
    ) -> Result<order_return::Model, ServiceError> {
        let header = self.find_header(&*self.db_pool, return_id).await?;
        let mut active: order_return::ActiveModel = header.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db_pool).await?;
        info!(return_id, %status, "Return status changed");
        self.event_sender.publish(Event::ReturnUpdated(return_id)).await;
        Ok(updated)
    }

    async fn find_header<C>(&self, conn: &C, return_id: i32) -> Result<order_return::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        order_return::Entity::find_by_id(return_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Return", return_id))
    }
}

async fn insert_items<C>(
    conn: &C,
    return_id: i32,
    lines: &[ReturnLineInput],
) -> Result<Vec<return_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = return_item::ActiveModel {
            return_id: Set(return_id),
            product_id: Set(line.product_id),
            ordered_quantity: Set(line.ordered_quantity),
            return_quantity: Set(line.return_quantity),
            unit_type: Set(line.unit_type.clone()),
            adjust_stock: Set(line.adjust_stock),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn input(items: Vec<ReturnLineInput>) -> ReturnInput {
        ReturnInput {
            return_type: "site_return".into(),
            site_id: Some(2),
            manager_id: 7,
            order_id: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            status: None,
            reason: None,
            items,
        }
    }

    fn line(ordered: Option<i32>, returned: i32) -> ReturnLineInput {
        ReturnLineInput {
            product_id: 5,
            ordered_quantity: ordered,
            return_quantity: returned,
            unit_type: None,
            adjust_stock: true,
        }
    }

    #[test]
    fn requires_at_least_one_line() {
        assert_matches!(input(vec![]).validate_all(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn return_cannot_exceed_ordered_snapshot() {
        assert_matches!(
            input(vec![line(Some(4), 5)]).validate_all(),
            Err(ServiceError::ValidationError(msg)) if msg.contains("exceeds")
        );
        assert!(input(vec![line(Some(5), 5)]).validate_all().is_ok());
        assert!(input(vec![line(None, 50)]).validate_all().is_ok());
    }

    #[test]
    fn negative_quantities_are_rejected() {
        assert!(input(vec![line(None, -1)]).validate_all().is_err());
        assert!(input(vec![line(Some(-2), 0)]).validate_all().is_err());
    }

    #[test]
    fn adjust_stock_defaults_to_true() {
        let parsed: ReturnLineInput =
            serde_json::from_str(r#"{"product_id": 5, "ordered_quantity": null, "return_quantity": 3, "unit_type": null}"#)
                .expect("line parses");
        assert!(parsed.adjust_stock);
    }
}
