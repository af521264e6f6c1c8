//! Line-item handling shared by returns and wastage records.

use sea_orm::{ConnectionTrait, EntityTrait};
use validator::Validate;

use crate::{
    entities::{order, StockKey},
    errors::ServiceError,
    services::stock_ledger::find_product,
};

/// One submitted line of a stock-moving document.
pub trait LineInput: Validate {
    fn product_id(&self) -> i32;

    /// Snapshot of what was originally ordered, when known.
    fn ordered_quantity(&self) -> Option<i32>;

    /// Quantity the line moves.
    fn quantity(&self) -> i32;
}

/// Validates every line and checks each against its ordered snapshot.
pub(crate) fn validate_lines<L: LineInput>(lines: &[L], noun: &str) -> Result<(), ServiceError> {
    for (index, line) in lines.iter().enumerate() {
        line.validate()?;
        if let Some(ordered) = line.ordered_quantity() {
            if line.quantity() > ordered {
                return Err(ServiceError::ValidationError(format!(
                    "item {}: {} quantity {} exceeds ordered quantity {}",
                    index + 1,
                    noun,
                    line.quantity(),
                    ordered
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn line_keys<L: LineInput>(lines: &[L], site_id: Option<i32>) -> Vec<StockKey> {
    lines
        .iter()
        .map(|line| StockKey::new(line.product_id(), site_id))
        .collect()
}

/// Fails with NotFound when the linked order or any line's product is missing.
pub(crate) async fn check_references<C, L>(
    conn: &C,
    order_id: Option<i32>,
    lines: &[L],
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
    L: LineInput,
{
    if let Some(order_id) = order_id {
        order::Entity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
    }
    for line in lines {
        find_product(conn, line.product_id()).await?;
    }
    Ok(())
}
