//! Re-derives the ledger rows owned by a return or wastage aggregate.
//!
//! A sync voids every active row the aggregate wrote before and appends fresh rows for its
//! current qualifying lines, inside one transaction. Rows of other references written in
//! between were computed on top of the aggregate's old rows, so the amount the aggregate
//! contributed is backed out of the current quantity explicitly rather than by falling
//! back to an older entry.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use metrics::counter;
use sea_orm::DatabaseTransaction;
use serde::Serialize;
use slog::Logger;
use tracing::{debug, info, instrument, warn};

use crate::{
    db::{self, TxnGuard},
    entities::{AdjustmentType, ProductModel, StockEntryModel, StockKey},
    errors::ServiceError,
    events::Event,
    locks::KeyGuards,
    provenance::Reference,
    services::stock_ledger::{
        active_entries_in, insert_entry, latest_entry_in, lock_keys_in, void_in, AppendStockEntry,
        StockLedgerService,
    },
};

/// One line item as seen by the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncLine {
    pub product_id: i32,
    pub quantity: i32,
    pub adjust_stock: bool,
    /// None when the referenced product no longer resolves
    pub product: Option<ProductModel>,
}

impl SyncLine {
    /// Whether this line moves stock at all.
    pub fn qualifies(&self) -> bool {
        self.adjust_stock && self.product.is_some() && self.quantity > 0
    }
}

/// An aggregate that owns a derived set of ledger rows.
#[async_trait]
pub trait StockSource: Send + Sync {
    fn reference(&self) -> Reference;

    /// Site the rows are written to; None is the general pool.
    fn site_id(&self) -> Option<i32>;

    /// `In` adds line quantities to stock, `Out` removes them.
    fn direction(&self) -> AdjustmentType;

    /// Audit note written on the row for a line of `quantity`.
    fn note(&self, quantity: i32) -> String;

    fn actor(&self) -> Option<i32> {
        None
    }

    /// Reloads the line items with their product relation.
    async fn load_lines(&self, conn: &DatabaseTransaction) -> Result<Vec<SyncLine>, ServiceError>;
}

/// What a single sync did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncOutcome {
    pub voided: Vec<StockEntryModel>,
    pub appended: Vec<StockEntryModel>,
    /// ManualAdjustment rows backing out contributions of keys the aggregate no longer touches
    pub compensations: Vec<StockEntryModel>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.voided.is_empty() && self.appended.is_empty() && self.compensations.is_empty()
    }
}

/// Per-key sync plan computed before anything is voided.
#[derive(Debug)]
struct KeyPlan {
    /// Current quantity minus what the aggregate's old rows contributed
    base: i32,
    embedded: i32,
    latest_before: Option<StockEntryModel>,
    lines: Vec<(ProductModel, i32)>,
}

#[derive(Clone)]
pub struct StockSyncService {
    ledger: StockLedgerService,
    logger: Logger,
}

impl StockSyncService {
    pub fn new(ledger: StockLedgerService, logger: Logger) -> Self {
        Self { ledger, logger }
    }

    pub fn ledger(&self) -> &StockLedgerService {
        &self.ledger
    }

    /// Locks every key the aggregate touches now or touched before.
    ///
    /// Reads through the pool, so it must run before the caller opens its transaction.
    pub(crate) async fn lock_for(
        &self,
        reference: &Reference,
        site_id: Option<i32>,
        product_ids: impl IntoIterator<Item = i32>,
    ) -> Result<KeyGuards<StockKey>, ServiceError> {
        let mut keys: Vec<StockKey> = active_entries_in(self.ledger.db(), reference)
            .await?
            .iter()
            .map(StockEntryModel::key)
            .collect();
        keys.extend(product_ids.into_iter().map(|id| StockKey::new(id, site_id)));
        Ok(self.ledger.lock_keys(keys).await)
    }

    /// Re-derives the ledger rows of `source` in its own transaction.
    #[instrument(skip(self, source), fields(reference = %source.reference()))]
    pub async fn sync_stock<S>(&self, source: &S) -> Result<SyncOutcome, ServiceError>
    where
        S: StockSource,
    {
        let reference = source.reference();
        let line_products: Vec<i32> = {
            // Lines are read once up front to learn which keys to lock.
            let txn = db::begin(self.ledger.db(), "stock_sync.plan").await?;
            let lines = source.load_lines(txn.conn()).await?;
            txn.commit().await?;
            lines.iter().map(|l| l.product_id).collect()
        };

        let guards = self
            .lock_for(&reference, source.site_id(), line_products)
            .await?;
        let txn = db::begin(self.ledger.db(), "stock_sync").await?;
        self.sync_and_commit(txn, source, &guards).await
    }

    /// Runs the sync inside `txn`, commits it, then records the outcome.
    pub(crate) async fn sync_and_commit<S>(
        &self,
        txn: TxnGuard,
        source: &S,
        guards: &KeyGuards<StockKey>,
    ) -> Result<SyncOutcome, ServiceError>
    where
        S: StockSource,
    {
        let outcome = self.sync_in(txn.conn(), source, guards).await?;
        txn.commit().await?;
        self.record(&source.reference(), &outcome).await;
        Ok(outcome)
    }

    /// Sync body; runs inside the caller's transaction with `guards` already held.
    pub(crate) async fn sync_in<S>(
        &self,
        txn: &DatabaseTransaction,
        source: &S,
        guards: &KeyGuards<StockKey>,
    ) -> Result<SyncOutcome, ServiceError>
    where
        S: StockSource,
    {
        let reference = source.reference();
        let site_id = source.site_id();
        let direction = source.direction();
        lock_keys_in(txn, guards.keys()).await?;
        let existing = active_entries_in(txn, &reference).await?;
        let lines = source.load_lines(txn).await?;

        let mut plans: BTreeMap<StockKey, KeyPlan> = BTreeMap::new();
        let mut keys: BTreeSet<StockKey> = existing.iter().map(StockEntryModel::key).collect();
        for line in &lines {
            if !line.qualifies() {
                debug!(
                    product_id = line.product_id,
                    quantity = line.quantity,
                    adjust_stock = line.adjust_stock,
                    "Skipping non-qualifying line"
                );
                continue;
            }
            keys.insert(StockKey::new(line.product_id, site_id));
        }

        if let Some(key) = keys.iter().find(|k| guards.keys().binary_search(*k).is_err()) {
            warn!(key = %key, "Sync touches a key that is not locked");
            return Err(ServiceError::Conflict(format!(
                "ledger rows of {} changed concurrently; retry",
                reference
            )));
        }

        for key in &keys {
            let latest_before = latest_entry_in(txn, *key).await?;
            let current = latest_before.as_ref().map(|e| e.quantity).unwrap_or(0);
            let embedded = existing
                .iter()
                .filter(|e| e.key() == *key)
                .try_fold(0i32, |sum, e| sum.checked_add(e.contribution()))
                .ok_or_else(|| overflow(key))?;
            let base = current.checked_sub(embedded).ok_or_else(|| overflow(key))?;
            plans.insert(
                *key,
                KeyPlan {
                    base,
                    embedded,
                    latest_before,
                    lines: Vec::new(),
                },
            );
        }
        for line in lines.into_iter().filter(SyncLine::qualifies) {
            let key = StockKey::new(line.product_id, site_id);
            if let (Some(plan), Some(product)) = (plans.get_mut(&key), line.product) {
                plan.lines.push((product, line.quantity));
            }
        }

        let voided = void_in(txn, &reference).await?;

        let mut outcome = SyncOutcome {
            voided,
            ..Default::default()
        };
        for (key, plan) in plans {
            if plan.lines.is_empty() {
                if let Some(entry) = self.compensate(txn, key, &reference, &plan, source).await? {
                    outcome.compensations.push(entry);
                }
                continue;
            }

            let not_before = plan.latest_before.as_ref().map(|e| e.created_at);
            let mut running = plan.base;
            for (product, quantity) in plan.lines {
                let next = match direction {
                    AdjustmentType::Out => running.checked_sub(quantity),
                    _ => running.checked_add(quantity),
                }
                .ok_or_else(|| overflow(&key))?;
                if next < 0 {
                    return Err(ServiceError::ValidationError(format!(
                        "{} would leave {} at {} ({} on hand before it)",
                        reference, key, next, running
                    )));
                }
                let draft = AppendStockEntry::new(key, next, direction)
                    .with_reference(reference)
                    .with_name(product.name.clone())
                    .with_notes(source.note(quantity))
                    .created_by(source.actor());
                let entry = insert_entry(txn, product.pool(), &draft, running, not_before).await?;
                running = next;
                outcome.appended.push(entry);
            }
        }

        Ok(outcome)
    }

    /// Backs out what the aggregate's voided rows still contribute to `key`.
    async fn compensate<S>(
        &self,
        txn: &DatabaseTransaction,
        key: StockKey,
        reference: &Reference,
        plan: &KeyPlan,
        source: &S,
    ) -> Result<Option<StockEntryModel>, ServiceError>
    where
        S: StockSource,
    {
        let after_void = latest_entry_in(txn, key).await?;
        let fallback = after_void.as_ref().map(|e| e.quantity).unwrap_or(0);
        if fallback == plan.base {
            // Nothing was written on top of the voided rows; the older entry is correct again.
            return Ok(None);
        }
        if plan.base < 0 {
            return Err(ServiceError::ValidationError(format!(
                "reversing {} would leave {} at {}",
                reference, key, plan.base
            )));
        }

        let pool = match plan.latest_before.as_ref() {
            Some(entry) => entry.pool,
            None => return Ok(None),
        };
        let draft = AppendStockEntry::new(key, plan.base, AdjustmentType::Adjustment)
            .with_reference(Reference::ManualAdjustment)
            .with_name(format!("{} reversal", reference))
            .with_notes(format!("{}: {:+} reversed", reference, -i64::from(plan.embedded)))
            .created_by(source.actor());
        let entry = insert_entry(
            txn,
            pool,
            &draft,
            fallback,
            plan.latest_before.as_ref().map(|e| e.created_at),
        )
        .await?;
        Ok(Some(entry))
    }

    /// Metrics, audit line and events for a committed sync.
    pub(crate) async fn record(&self, reference: &Reference, outcome: &SyncOutcome) {
        counter!("sitestock_sync.completed", 1);
        slog::info!(
            self.logger,
            "stock sync";
            "reference" => reference.to_string(),
            "voided" => outcome.voided.len(),
            "appended" => outcome.appended.len(),
            "compensated" => outcome.compensations.len(),
        );
        info!(
            reference = %reference,
            voided = outcome.voided.len(),
            appended = outcome.appended.len(),
            compensated = outcome.compensations.len(),
            "Stock synced"
        );

        let events = self.ledger.events();
        if !outcome.voided.is_empty() {
            events
                .publish(Event::StockEntriesVoided {
                    reference: *reference,
                    count: outcome.voided.len(),
                })
                .await;
        }
        for entry in outcome.appended.iter().chain(&outcome.compensations) {
            events
                .publish(Event::StockEntryAppended {
                    entry_id: entry.id,
                    key: entry.key(),
                    previous_quantity: entry.previous_quantity,
                    quantity: entry.quantity,
                    reference: entry.reference().unwrap_or(Reference::None),
                })
                .await;
        }
        events
            .publish(Event::StockSynced {
                reference: *reference,
                voided: outcome.voided.len(),
                appended: outcome.appended.len(),
            })
            .await;
    }
}

fn overflow(key: &StockKey) -> ServiceError {
    ServiceError::ValidationError(format!("stock quantity overflow for {}", key))
}
