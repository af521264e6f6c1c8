//! What caused a ledger entry.
//!
//! Stored as a nullable `(reference_type, reference_id)` column pair, handled in code as a
//! closed enum so every new kind has to be handled wherever references are interpreted.

use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::{
    entities::{order_return, wastage},
    errors::ServiceError,
};

const PURCHASE: &str = "purchase";
const RETURN: &str = "return";
const WASTAGE: &str = "wastage";
const MANUAL_ADJUSTMENT: &str = "manual_adjustment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Reference {
    Purchase(i32),
    Return(i32),
    Wastage(i32),
    ManualAdjustment,
    None,
}

impl Reference {
    pub fn reference_type(&self) -> Option<&'static str> {
        match self {
            Reference::Purchase(_) => Some(PURCHASE),
            Reference::Return(_) => Some(RETURN),
            Reference::Wastage(_) => Some(WASTAGE),
            Reference::ManualAdjustment => Some(MANUAL_ADJUSTMENT),
            Reference::None => None,
        }
    }

    pub fn reference_id(&self) -> Option<i32> {
        match self {
            Reference::Purchase(id) | Reference::Return(id) | Reference::Wastage(id) => Some(*id),
            Reference::ManualAdjustment | Reference::None => None,
        }
    }

    /// Rebuilds a reference from its stored columns.
    pub fn from_columns(
        reference_type: Option<&str>,
        reference_id: Option<i32>,
    ) -> Result<Self, ServiceError> {
        match (reference_type, reference_id) {
            (None, None) => Ok(Reference::None),
            (Some(MANUAL_ADJUSTMENT), None) => Ok(Reference::ManualAdjustment),
            (Some(PURCHASE), Some(id)) => Ok(Reference::Purchase(id)),
            (Some(RETURN), Some(id)) => Ok(Reference::Return(id)),
            (Some(WASTAGE), Some(id)) => Ok(Reference::Wastage(id)),
            (kind, id) => Err(ServiceError::InternalError(format!(
                "unrecognised stock reference {:?}/{:?}",
                kind, id
            ))),
        }
    }

    /// Whether this reference points at an aggregate whose rows can be re-derived.
    pub fn is_aggregate(&self) -> bool {
        self.reference_id().is_some()
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Purchase(id) => write!(f, "Purchase #{}", id),
            Reference::Return(id) => write!(f, "Return #{}", id),
            Reference::Wastage(id) => write!(f, "Wastage #{}", id),
            Reference::ManualAdjustment => f.write_str("Manual adjustment"),
            Reference::None => f.write_str("Unreferenced"),
        }
    }
}

/// Resolves a reference to a display label, loading the referenced aggregate on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    pub async fn describe<C>(&self, db: &C, reference: &Reference) -> Result<String, ServiceError>
    where
        C: ConnectionTrait,
    {
        let label = match reference {
            Reference::Return(id) => match order_return::Entity::find_by_id(*id).one(db).await? {
                Some(header) => format!("{} ({}, {})", reference, header.return_type, header.status),
                None => format!("{} (deleted)", reference),
            },
            Reference::Wastage(id) => match wastage::Entity::find_by_id(*id).one(db).await? {
                Some(header) => format!("{} ({}, {})", reference, header.wastage_type, header.status),
                None => format!("{} (deleted)", reference),
            },
            // Purchases live outside this crate; the id is all we have.
            Reference::Purchase(_) | Reference::ManualAdjustment | Reference::None => {
                reference.to_string()
            }
        };
        Ok(label)
    }
}
