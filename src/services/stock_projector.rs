//! Read-side projections over the ledger: current quantity, low-stock level and the
//! display delta of a single entry. Nothing here is cached; every call reads the ledger.

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QuerySelect};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    entities::{
        stock_entry::Column, AdjustmentType, StockEntryEntity, StockEntryModel, StockKey,
    },
    errors::ServiceError,
    services::stock_ledger::{find_product, StockLedgerService},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StockLevel {
    Ok,
    Low,
    Out,
    NotApplicable,
}

/// Classifies `quantity` against a product's low-stock threshold.
///
/// No threshold (or one `<= 0`) means the product is not tracked for low stock at all,
/// whatever the quantity.
pub fn classify_stock_level(quantity: i32, threshold: Option<i32>) -> StockLevel {
    match threshold {
        None => StockLevel::NotApplicable,
        Some(t) if t <= 0 => StockLevel::NotApplicable,
        Some(_) if quantity <= 0 => StockLevel::Out,
        Some(t) if quantity <= t => StockLevel::Low,
        Some(_) => StockLevel::Ok,
    }
}

/// Display form of one entry's change against the amount it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    /// `entry.quantity - entry.previous_quantity`
    pub delta: i32,
    pub magnitude: i32,
    pub adjustment_type: AdjustmentType,
    pub label: String,
}

/// Minus sign used in change labels.
pub const MINUS: char = '\u{2212}';

/// Builds the display change of `entry` from its stored `previous_quantity`.
///
/// Rows re-derived by a sync start from a base below later writes, so the row sorting
/// directly before them is not the amount they moved from.
pub fn describe_change(entry: &StockEntryModel) -> StockChange {
    let delta = entry.contribution();
    let magnitude = delta.abs();
    let label = match entry.adjustment_type {
        AdjustmentType::In => format!("+{}", magnitude),
        AdjustmentType::Out => format!("{}{}", MINUS, magnitude),
        AdjustmentType::Adjustment if delta < 0 => format!("{}{}", MINUS, magnitude),
        AdjustmentType::Adjustment => format!("+{}", magnitude),
    };
    StockChange {
        delta,
        magnitude,
        adjustment_type: entry.adjustment_type,
        label,
    }
}

/// Low-stock report row for one product at one site scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevelReport {
    pub product_id: i32,
    pub site_id: Option<i32>,
    pub quantity: i32,
    pub threshold: Option<i32>,
    pub level: StockLevel,
}

/// Read-only queries used by reporting.
#[derive(Clone)]
pub struct StockProjector {
    ledger: StockLedgerService,
}

impl StockProjector {
    pub fn new(ledger: StockLedgerService) -> Self {
        Self { ledger }
    }

    pub async fn current_quantity(
        &self,
        product_id: i32,
        site_id: Option<i32>,
    ) -> Result<i32, ServiceError> {
        self.ledger.current_quantity(product_id, site_id).await
    }

    #[instrument(skip(self))]
    pub async fn low_stock_classification(
        &self,
        product_id: i32,
        site_id: Option<i32>,
    ) -> Result<StockLevelReport, ServiceError> {
        let product = find_product(self.ledger.db(), product_id).await?;
        let quantity = self.ledger.current_quantity(product_id, site_id).await?;
        Ok(StockLevelReport {
            product_id,
            site_id,
            quantity,
            threshold: product.low_stock_threshold,
            level: classify_stock_level(quantity, product.low_stock_threshold),
        })
    }

    #[instrument(skip(self))]
    pub async fn change_since_previous(&self, entry_id: i32) -> Result<StockChange, ServiceError> {
        let entry = self.ledger.get_entry(entry_id).await?;
        Ok(describe_change(&entry))
    }

    /// Current quantity and level for every key a product has entries for.
    pub async fn levels_for_product(
        &self,
        product_id: i32,
    ) -> Result<Vec<StockLevelReport>, ServiceError> {
        let product = find_product(self.ledger.db(), product_id).await?;
        let mut sites: Vec<Option<i32>> = StockEntryEntity::find()
            .select_only()
            .column(Column::SiteId)
            .distinct()
            .filter(Column::ProductId.eq(product_id))
            .into_tuple::<Option<i32>>()
            .all(self.ledger.db())
            .await?;
        sites.sort();

        let mut reports = Vec::with_capacity(sites.len());
        for site_id in sites {
            let quantity = self
                .ledger
                .latest_entry(StockKey::new(product_id, site_id))
                .await?
                .map(|e| e.quantity)
                .unwrap_or(0);
            reports.push(StockLevelReport {
                product_id,
                site_id,
                quantity,
                threshold: product.low_stock_threshold,
                level: classify_stock_level(quantity, product.low_stock_threshold),
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::StockPool;
    use chrono::{TimeZone, Utc};

    fn entry(previous_quantity: i32, quantity: i32, adjustment_type: AdjustmentType) -> StockEntryModel {
        StockEntryModel {
            id: 1,
            pool: StockPool::Product,
            product_id: 5,
            site_id: None,
            quantity,
            previous_quantity,
            adjustment_type,
            reference_type: None,
            reference_id: None,
            name: None,
            notes: None,
            status: true,
            created_by: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn out_entry_shows_minus_glyph() {
        let change = describe_change(&entry(100, 70, AdjustmentType::Out));
        assert_eq!(change.delta, -30);
        assert_eq!(change.magnitude, 30);
        assert_eq!(change.label, "\u{2212}30");
    }

    #[test]
    fn first_entry_compares_against_zero() {
        let change = describe_change(&entry(0, 100, AdjustmentType::In));
        assert_eq!(change.delta, 100);
        assert_eq!(change.label, "+100");
    }

    #[test]
    fn adjustment_shows_true_sign() {
        assert_eq!(
            describe_change(&entry(40, 25, AdjustmentType::Adjustment)).label,
            "\u{2212}15"
        );
        assert_eq!(
            describe_change(&entry(40, 45, AdjustmentType::Adjustment)).label,
            "+5"
        );
    }

    #[test]
    fn replayed_row_reports_its_own_movement() {
        // Re-derived under a later purchase: 2 -> 4 while the newest row before it reads 5.
        let change = describe_change(&entry(2, 4, AdjustmentType::In));
        assert_eq!(change.delta, 2);
        assert_eq!(change.label, "+2");
    }

    #[test]
    fn level_names_render_upper_case() {
        assert_eq!(StockLevel::NotApplicable.to_string(), "NOT_APPLICABLE");
        assert_eq!(StockLevel::Ok.to_string(), "OK");
    }
}
