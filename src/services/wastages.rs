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
    entities::{product, wastage, wastage_item, AdjustmentType},
    errors::ServiceError,
    events::{Event, EventSender},
    provenance::Reference,
    services::{
        line_items::{check_references, line_keys, validate_lines, LineInput},
        stock_sync::{StockSource, StockSyncService, SyncLine, SyncOutcome},
    },
};

const DEFAULT_STATUS: &str = "pending";

fn default_adjust_stock() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WastageLineInput {
    pub product_id: i32,
    #[validate(range(min = 0))]
    pub ordered_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub wastage_qty: i32,
    pub unit_type: Option<String>,
    /// false records breakage that is written off without touching stock
    #[serde(default = "default_adjust_stock")]
    pub adjust_stock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WastageInput {
    #[validate(length(min = 1, max = 64))]
    pub wastage_type: String,
    pub site_id: Option<i32>,
    pub manager_id: i32,
    pub order_id: Option<i32>,
    pub date: NaiveDate,
    #[validate(length(min = 1, max = 32))]
    pub status: Option<String>,
    pub reason: Option<String>,
    #[validate(length(min = 1))]
    pub items: Vec<WastageLineInput>,
}

impl LineInput for WastageLineInput {
    fn product_id(&self) -> i32 {
        self.product_id
    }

    fn ordered_quantity(&self) -> Option<i32> {
        self.ordered_quantity
    }

    fn quantity(&self) -> i32 {
        self.wastage_qty
    }
}

impl WastageInput {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        validate_lines(&self.items, "wasted")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WastageAggregate {
    pub header: wastage::Model,
    pub items: Vec<wastage_item::Model>,
}

#[async_trait]
impl StockSource for wastage::Model {
    fn reference(&self) -> Reference {
        Reference::Wastage(self.id)
    }

    fn site_id(&self) -> Option<i32> {
        self.site_id
    }

    fn direction(&self) -> AdjustmentType {
        AdjustmentType::Out
    }

    fn note(&self, quantity: i32) -> String {
        format!("Wastage #{}: -{} wasted", self.id, quantity)
    }

    fn actor(&self) -> Option<i32> {
        Some(self.manager_id)
    }

    async fn load_lines(&self, conn: &DatabaseTransaction) -> Result<Vec<SyncLine>, ServiceError> {
        let rows = wastage_item::Entity::find()
            .filter(wastage_item::Column::WastageId.eq(self.id))
            .order_by_asc(wastage_item::Column::Id)
            .find_also_related(product::Entity)
            .all(conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(item, product)| SyncLine {
                product_id: item.product_id,
                quantity: item.wastage_qty,
                adjust_stock: item.adjust_stock,
                product,
            })
            .collect())
    }
}

/// Service for managing wastage records and the stock rows they own
#[derive(Clone)]
pub struct WastageService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    sync: StockSyncService,
}

impl WastageService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, sync: StockSyncService) -> Self {
        Self {
            db_pool,
            event_sender,
            sync,
        }
    }

    /// Records wastage; fails without writing anything if stock would go negative
    #[instrument(skip(self, input), fields(site_id = ?input.site_id, items = input.items.len()))]
    pub async fn create(&self, input: WastageInput) -> Result<WastageAggregate, ServiceError> {
        input.validate_all()?;

        let guards = self
            .sync
            .ledger()
            .lock_keys(line_keys(&input.items, input.site_id))
            .await;
        let txn = db::begin(&self.db_pool, "wastages.create").await?;
        check_references(txn.conn(), input.order_id, &input.items).await?;

        let header = wastage::ActiveModel {
            wastage_type: Set(input.wastage_type.clone()),
            site_id: Set(input.site_id),
            manager_id: Set(input.manager_id),
            order_id: Set(input.order_id),
            date: Set(input.date),
            status: Set(input.status.clone().unwrap_or_else(|| DEFAULT_STATUS.to_string())),
            reason: Set(input.reason.clone()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(txn.conn())
        .await
        .map_err(|e| {
            error!("Failed to insert wastage header: {}", e);
            ServiceError::db_error(e)
        })?;

        let items = insert_items(txn.conn(), header.id, &input.items).await?;
        let outcome = self.sync.sync_and_commit(txn, &header, &guards).await?;

        info!(wastage_id = header.id, appended = outcome.appended.len(), "Wastage created");
        self.event_sender.publish(Event::WastageCreated(header.id)).await;
        Ok(WastageAggregate { header, items })
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        wastage_id: i32,
        input: WastageInput,
    ) -> Result<WastageAggregate, ServiceError> {
        input.validate_all()?;
        self.find_header(&*self.db_pool, wastage_id).await?;

        let product_ids: Vec<i32> = input.items.iter().map(|i| i.product_id).collect();
        let guards = self
            .sync
            .lock_for(&Reference::Wastage(wastage_id), input.site_id, product_ids)
            .await?;
        let txn = db::begin(&self.db_pool, "wastages.update").await?;
        let existing = self.find_header(txn.conn(), wastage_id).await?;
        check_references(txn.conn(), input.order_id, &input.items).await?;

        let mut active: wastage::ActiveModel = existing.into();
        active.wastage_type = Set(input.wastage_type.clone());
        active.site_id = Set(input.site_id);
        active.manager_id = Set(input.manager_id);
        active.order_id = Set(input.order_id);
        active.date = Set(input.date);
        if let Some(status) = &input.status {
            active.status = Set(status.clone());
        }
        active.reason = Set(input.reason.clone());
        active.updated_at = Set(Some(Utc::now()));
        let header = active.update(txn.conn()).await?;

        wastage_item::Entity::delete_many()
            .filter(wastage_item::Column::WastageId.eq(wastage_id))
            .exec(txn.conn())
            .await?;
        let items = insert_items(txn.conn(), wastage_id, &input.items).await?;
        let outcome = self.sync.sync_and_commit(txn, &header, &guards).await?;

        info!(
            wastage_id,
            voided = outcome.voided.len(),
            appended = outcome.appended.len(),
            "Wastage updated"
        );
        self.event_sender.publish(Event::WastageUpdated(wastage_id)).await;
        Ok(WastageAggregate { header, items })
    }

    /// Deletes a wastage record and puts its wasted quantities back
    #[instrument(skip(self))]
    pub async fn delete(&self, wastage_id: i32) -> Result<SyncOutcome, ServiceError> {
        let header = self.find_header(&*self.db_pool, wastage_id).await?;
        let reference = header.reference();
        let guards = self.sync.lock_for(&reference, header.site_id, Vec::new()).await?;

        let txn = db::begin(&self.db_pool, "wastages.delete").await?;
        let header = self.find_header(txn.conn(), wastage_id).await?;
        wastage_item::Entity::delete_many()
            .filter(wastage_item::Column::WastageId.eq(wastage_id))
            .exec(txn.conn())
            .await?;
        header.clone().delete(txn.conn()).await?;
        let outcome = self.sync.sync_and_commit(txn, &header, &guards).await?;

        info!(wastage_id, voided = outcome.voided.len(), "Wastage deleted");
        self.event_sender.publish(Event::WastageDeleted(wastage_id)).await;
        Ok(outcome)
    }

    pub async fn get(&self, wastage_id: i32) -> Result<WastageAggregate, ServiceError> {
        let header = self.find_header(&*self.db_pool, wastage_id).await?;
        let items = header
            .find_related(wastage_item::Entity)
            .order_by_asc(wastage_item::Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(WastageAggregate { header, items })
    }

    async fn find_header<C>(&self, conn: &C, wastage_id: i32) -> Result<wastage::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        wastage::Entity::find_by_id(wastage_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Wastage", wastage_id))
    }
}

async fn insert_items<C>(
    conn: &C,
    wastage_id: i32,
    lines: &[WastageLineInput],
) -> Result<Vec<wastage_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = wastage_item::ActiveModel {
            wastage_id: Set(wastage_id),
            product_id: Set(line.product_id),
            ordered_quantity: Set(line.ordered_quantity),
            wastage_qty: Set(line.wastage_qty),
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
