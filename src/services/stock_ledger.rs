//! Append-only stock ledger.
//!
//! Every change to on-hand quantity is a new `stock_entries` row holding the resulting
//! absolute quantity. The current quantity of a key is the `quantity` of its newest active
//! row in `(created_at desc, id desc)` order; there is no balance column to drift.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::{
    db::{self, DbPool},
    entities::{
        product,
        stock_entry::{self, ActiveModel as StockEntryActiveModel, Column},
        AdjustmentType, ProductModel, StockEntryEntity, StockEntryModel, StockKey, StockPool,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    locks::{KeyGuards, KeyedLocks},
    provenance::Reference,
    PaginatedResponse,
};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// Input for [`StockLedgerService::append`]. `quantity` is the absolute resulting amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AppendStockEntry {
    pub product_id: i32,
    pub site_id: Option<i32>,
    #[validate(range(min = 0))]
    pub quantity: i32,
    pub adjustment_type: AdjustmentType,
    pub reference: Reference,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<i32>,
}

impl AppendStockEntry {
    pub fn new(key: StockKey, quantity: i32, adjustment_type: AdjustmentType) -> Self {
        Self {
            product_id: key.product_id,
            site_id: key.site_id,
            quantity,
            adjustment_type,
            reference: Reference::None,
            name: None,
            notes: None,
            created_by: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.site_id)
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn created_by(mut self, actor: Option<i32>) -> Self {
        self.created_by = actor;
        self
    }
}

/// Which site partition of a product's ledger to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteScope {
    /// The general/warehouse pool only (`site_id IS NULL`)
    General,
    Site(i32),
    #[default]
    Any,
}

impl From<Option<i32>> for SiteScope {
    fn from(site_id: Option<i32>) -> Self {
        match site_id {
            Some(site_id) => SiteScope::Site(site_id),
            None => SiteScope::General,
        }
    }
}

/// Filters for ledger history queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockEntryFilter {
    #[serde(default)]
    pub site: SiteScope,
    pub pool: Option<StockPool>,
    pub adjustment_type: Option<AdjustmentType>,
    pub reference: Option<Reference>,
    #[serde(default)]
    pub include_voided: bool,
    /// 1-based
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl StockEntryFilter {
    pub fn site(mut self, site: SiteScope) -> Self {
        self.site = site;
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn include_voided(mut self) -> Self {
        self.include_voided = true;
        self
    }

    pub fn page(mut self, page: u64, per_page: u64) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }
}

/// Rows written by `reference`, matched on both columns.
pub(crate) fn reference_condition(reference: &Reference) -> Condition {
    let kind = match reference.reference_type() {
        Some(kind) => Column::ReferenceType.eq(kind),
        None => Column::ReferenceType.is_null(),
    };
    let id = match reference.reference_id() {
        Some(id) => Column::ReferenceId.eq(id),
        None => Column::ReferenceId.is_null(),
    };
    Condition::all().add(kind).add(id)
}

/// Loads a product or fails with NotFound.
pub(crate) async fn find_product<C>(conn: &C, product_id: i32) -> Result<ProductModel, ServiceError>
where
    C: ConnectionTrait,
{
    product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))
}

/// Advisory lock id standing in for the general pool's missing site.
const GENERAL_POOL_LOCK_ID: i32 = -1;

/// Serializes writers of `keys` across processes until the transaction ends.
///
/// Locks are taken in key order, so `keys` must be sorted.
pub(crate) async fn lock_keys_in<'a, C>(
    conn: &C,
    keys: impl IntoIterator<Item = &'a StockKey>,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    for key in keys {
        db::advisory_xact_lock(
            conn,
            key.product_id,
            key.site_id.unwrap_or(GENERAL_POOL_LOCK_ID),
        )
        .await?;
    }
    Ok(())
}

/// Newest active entry of `key`.
pub(crate) async fn latest_entry_in<C>(
    conn: &C,
    key: StockKey,
) -> Result<Option<StockEntryModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(StockEntryEntity::find()
        .filter(key.condition())
        .filter(Column::Status.eq(true))
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .one(conn)
        .await?)
}

/// Active rows written by `reference`, oldest first.
pub(crate) async fn active_entries_in<C>(
    conn: &C,
    reference: &Reference,
) -> Result<Vec<StockEntryModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(StockEntryEntity::find()
        .filter(reference_condition(reference))
        .filter(Column::Status.eq(true))
        .order_by_asc(Column::CreatedAt)
        .order_by_asc(Column::Id)
        .all(conn)
        .await?)
}

/// Inserts one entry computed from `previous_quantity`.
///
/// `not_before` is the timestamp of the entry the new one supersedes; the new row never
/// sorts ahead of it even if the wall clock stepped back.
pub(crate) async fn insert_entry<C>(
    conn: &C,
    pool: StockPool,
    draft: &AppendStockEntry,
    previous_quantity: i32,
    not_before: Option<DateTime<Utc>>,
) -> Result<StockEntryModel, ServiceError>
where
    C: ConnectionTrait,
{
    if draft.quantity < 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be >= 0, got {} for {}",
            draft.quantity,
            draft.key()
        )));
    }

    let now = Utc::now();
    let created_at = match not_before {
        Some(floor) if floor > now => floor,
        _ => now,
    };

    let entry = StockEntryActiveModel {
        pool: Set(pool),
        product_id: Set(draft.product_id),
        site_id: Set(draft.site_id),
        quantity: Set(draft.quantity),
        previous_quantity: Set(previous_quantity),
        adjustment_type: Set(draft.adjustment_type),
        reference_type: Set(draft.reference.reference_type().map(str::to_string)),
        reference_id: Set(draft.reference.reference_id()),
        name: Set(draft.name.clone()),
        notes: Set(draft.notes.clone()),
        status: Set(true),
        created_by: Set(draft.created_by),
        created_at: Set(created_at),
        ..Default::default()
    };

    let model = entry.insert(conn).await.map_err(|e| {
        error!(key = %draft.key(), error = %e, "Failed to insert stock entry");
        ServiceError::db_error(e)
    })?;
    counter!("sitestock_ledger.append", 1);
    Ok(model)
}

/// Marks every active row of `reference` as voided and returns them in their voided state.
pub(crate) async fn void_in<C>(
    conn: &C,
    reference: &Reference,
) -> Result<Vec<StockEntryModel>, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = active_entries_in(conn, reference).await?;
    if rows.is_empty() {
        return Ok(rows);
    }

    let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
    let result = StockEntryEntity::update_many()
        .col_expr(Column::Status, Expr::value(false))
        .filter(Column::Id.is_in(ids))
        .filter(Column::Status.eq(true))
        .exec(conn)
        .await?;

    if result.rows_affected != rows.len() as u64 {
        return Err(ServiceError::Conflict(format!(
            "ledger rows of {} changed while voiding",
            reference
        )));
    }

    counter!("sitestock_ledger.void", rows.len() as u64);
    Ok(rows
        .into_iter()
        .map(|mut row| {
            row.status = false;
            row
        })
        .collect())
}

/// Service owning reads and writes of the stock ledger
#[derive(Clone)]
pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    locks: Arc<KeyedLocks<StockKey>>,
    default_page_size: u64,
    max_page_size: u64,
}

impl StockLedgerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
            locks: Arc::new(KeyedLocks::new()),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_page_limits(mut self, default_page_size: u64, max_page_size: u64) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.default_page_size = default_page_size.clamp(1, self.max_page_size);
        self
    }

    pub(crate) fn db(&self) -> &DbPool {
        &self.db_pool
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.event_sender
    }

    /// Acquires the in-process locks for `keys`. Must be taken before a transaction is opened.
    pub(crate) async fn lock_keys(&self, keys: Vec<StockKey>) -> KeyGuards<StockKey> {
        self.locks.lock_all(keys).await
    }

    /// Appends an entry with an explicit absolute quantity.
    #[instrument(skip(self, entry), fields(product_id = entry.product_id, site_id = ?entry.site_id, reference = %entry.reference))]
    pub async fn append(&self, entry: AppendStockEntry) -> Result<StockEntryModel, ServiceError> {
        entry.validate()?;
        let target = entry.quantity;
        self.write_computed(entry, move |_| Ok(target)).await
    }

    /// Adds `quantity` to the current amount of `key`.
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        key: StockKey,
        quantity: i32,
        reference: Reference,
        actor: Option<i32>,
    ) -> Result<StockEntryModel, ServiceError> {
        ensure_positive(quantity)?;
        let draft = AppendStockEntry::new(key, 0, AdjustmentType::In)
            .with_reference(reference)
            .with_notes(format!("{}: +{} received", reference, quantity))
            .created_by(actor);
        self.write_computed(draft, move |current| {
            current
                .checked_add(quantity)
                .ok_or_else(|| ServiceError::ValidationError("stock quantity overflow".into()))
        })
        .await
    }

    /// Removes `quantity` from the current amount of `key`; refuses to go below zero.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        key: StockKey,
        quantity: i32,
        reference: Reference,
        actor: Option<i32>,
    ) -> Result<StockEntryModel, ServiceError> {
        ensure_positive(quantity)?;
        let draft = AppendStockEntry::new(key, 0, AdjustmentType::Out)
            .with_reference(reference)
            .with_notes(format!("{}: -{} issued", reference, quantity))
            .created_by(actor);
        self.write_computed(draft, move |current| {
            if current < quantity {
                return Err(ServiceError::ValidationError(format!(
                    "insufficient stock for {}: {} on hand, {} requested",
                    key, current, quantity
                )));
            }
            Ok(current - quantity)
        })
        .await
    }

    /// Records a counted absolute quantity for `key`.
    #[instrument(skip(self, notes))]
    pub async fn set_quantity(
        &self,
        key: StockKey,
        quantity: i32,
        actor: Option<i32>,
        notes: Option<String>,
    ) -> Result<StockEntryModel, ServiceError> {
        let mut draft = AppendStockEntry::new(key, quantity, AdjustmentType::Adjustment)
            .with_reference(Reference::ManualAdjustment)
            .with_name("Stock count")
            .created_by(actor);
        draft.notes = notes;
        draft.validate()?;
        self.write_computed(draft, move |_| Ok(quantity)).await
    }

    /// Read the current amount of the draft's key, compute the next one, append it; all under
    /// the key lock and inside one transaction.
    async fn write_computed<F>(
        &self,
        mut draft: AppendStockEntry,
        compute: F,
    ) -> Result<StockEntryModel, ServiceError>
    where
        F: FnOnce(i32) -> Result<i32, ServiceError>,
    {
        let key = draft.key();
        let _guard = self.locks.lock(key).await;
        let txn = db::begin(&self.db_pool, "stock_ledger.append").await?;
        lock_keys_in(txn.conn(), [&key]).await?;

        let product = find_product(txn.conn(), key.product_id).await?;
        let latest = latest_entry_in(txn.conn(), key).await?;
        let current = latest.as_ref().map(|e| e.quantity).unwrap_or(0);
        draft.quantity = compute(current)?;

        let entry = insert_entry(
            txn.conn(),
            product.pool(),
            &draft,
            current,
            latest.as_ref().map(|e| e.created_at),
        )
        .await?;
        txn.commit().await?;

        info!(
            entry_id = entry.id,
            key = %key,
            previous = current,
            quantity = entry.quantity,
            "Stock entry appended"
        );
        self.event_sender
            .publish(Event::StockEntryAppended {
                entry_id: entry.id,
                key,
                previous_quantity: current,
                quantity: entry.quantity,
                reference: draft.reference,
            })
            .await;
        Ok(entry)
    }

    /// Current on-hand amount of `(product_id, site_id)`; 0 when the key has no active entry.
    #[instrument(skip(self))]
    pub async fn current_quantity(
        &self,
        product_id: i32,
        site_id: Option<i32>,
    ) -> Result<i32, ServiceError> {
        let latest = self.latest_entry(StockKey::new(product_id, site_id)).await?;
        Ok(latest.map(|e| e.quantity).unwrap_or(0))
    }

    /// The entry that defines the current amount of `key`.
    pub async fn latest_entry(&self, key: StockKey) -> Result<Option<StockEntryModel>, ServiceError> {
        latest_entry_in(&*self.db_pool, key).await
    }

    pub async fn get_entry(&self, entry_id: i32) -> Result<StockEntryModel, ServiceError> {
        StockEntryEntity::find_by_id(entry_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Stock entry", entry_id))
    }

    /// Ledger history of a product, newest first, one page at a time.
    #[instrument(skip(self, filter))]
    pub async fn entries_for(
        &self,
        product_id: i32,
        filter: StockEntryFilter,
    ) -> Result<PaginatedResponse<StockEntryModel>, ServiceError> {
        let mut query = StockEntryEntity::find().filter(stock_entry::Column::ProductId.eq(product_id));

        query = match filter.site {
            SiteScope::General => query.filter(Column::SiteId.is_null()),
            SiteScope::Site(site_id) => query.filter(Column::SiteId.eq(site_id)),
            SiteScope::Any => query,
        };
        if let Some(pool) = filter.pool {
            query = query.filter(Column::Pool.eq(pool));
        }
        if let Some(adjustment_type) = filter.adjustment_type {
            query = query.filter(Column::AdjustmentType.eq(adjustment_type));
        }
        if let Some(reference) = &filter.reference {
            query = query.filter(reference_condition(reference));
        }
        if !filter.include_voided {
            query = query.filter(Column::Status.eq(true));
        }

        let per_page = filter
            .per_page
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        let page = filter.page.unwrap_or(1).max(1);

        let paginator = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(&*self.db_pool, per_page);
        let totals = paginator.num_items_and_pages().await?;
        let items = paginator.fetch_page(page - 1).await?;
        debug!(product_id, page, returned = items.len(), "Fetched ledger page");

        Ok(PaginatedResponse {
            items,
            total: totals.number_of_items,
            page,
            limit: per_page,
            total_pages: totals.number_of_pages,
        })
    }

    /// Soft-deletes every active row tied to `reference` and returns the voided rows.
    ///
    /// This only flips `status`; it does not compensate rows written for other references
    /// since. Aggregates re-derive their rows through the synchronizer instead.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn void_entries_by_reference(
        &self,
        reference: Reference,
    ) -> Result<Vec<StockEntryModel>, ServiceError> {
        let existing = active_entries_in(&*self.db_pool, &reference).await?;
        let guards = self
            .lock_keys(existing.iter().map(StockEntryModel::key).collect())
            .await;

        let txn = db::begin(&self.db_pool, "stock_ledger.void").await?;
        lock_keys_in(txn.conn(), guards.keys()).await?;
        let voided = void_in(txn.conn(), &reference).await?;
        if let Some(row) = voided.iter().find(|row| guards.keys().binary_search(&row.key()).is_err()) {
            warn!(key = %row.key(), "Ledger rows appeared for reference while voiding");
            return Err(ServiceError::Conflict(format!(
                "ledger rows of {} changed concurrently; retry",
                reference
            )));
        }
        txn.commit().await?;

        info!(count = voided.len(), "Voided stock entries");
        if !voided.is_empty() {
            self.event_sender
                .publish(Event::StockEntriesVoided {
                    reference,
                    count: voided.len(),
                })
                .await;
        }
        Ok(voided)
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be > 0, got {}",
            quantity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_scope_from_option() {
        assert_eq!(SiteScope::from(None), SiteScope::General);
        assert_eq!(SiteScope::from(Some(4)), SiteScope::Site(4));
        assert_eq!(SiteScope::default(), SiteScope::Any);
    }

    #[test]
    fn negative_quantity_fails_validation() {
        let draft = AppendStockEntry::new(StockKey::new(1, None), -1, AdjustmentType::Out);
        let err = draft.validate().expect_err("negative quantity");
        assert!(err.field_errors().contains_key("quantity"));
    }

    #[test]
    fn non_positive_delta_is_rejected() {
        assert!(ensure_positive(0).is_err());
        assert!(ensure_positive(-3).is_err());
        assert!(ensure_positive(1).is_ok());
    }
}
