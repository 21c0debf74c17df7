use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::TripId;
use super::draft::Draft;
use crate::config::IntakeConfig;

/// Minor units per major unit for the program's currency (cents per dollar).
pub const MINOR_UNITS_PER_MAJOR: f64 = 100.0;

/// Read-only view of the trip catalog used for pricing.
#[async_trait]
pub trait TripCatalog: Send + Sync {
    /// Base fee in major units, or `None` when the trip has no fee on record.
    async fn fee(&self, trip_id: &TripId) -> Result<Option<f64>, CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("trip catalog unavailable: {0}")]
    Unavailable(String),
}

/// Optional surcharge keyed off a single draft answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOnRule {
    pub field: String,
    pub value: String,
    pub fee: f64,
}

impl AddOnRule {
    pub fn applies_to(&self, draft: &Draft) -> bool {
        draft.get(&self.field) == Some(self.value.as_str())
    }
}

impl From<&IntakeConfig> for AddOnRule {
    fn from(config: &IntakeConfig) -> Self {
        Self {
            field: config.add_on_field.clone(),
            value: config.add_on_value.clone(),
            fee: config.add_on_fee,
        }
    }
}

/// Payable total computed before authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub trip_id: TripId,
    pub base_fee: Option<f64>,
    pub add_on_fee: f64,
    pub total: Option<f64>,
}

impl FeeQuote {
    pub fn is_payable(&self) -> bool {
        self.total.is_some()
    }

    /// Total in the gateway's smallest unit, rounded to the nearest integer.
    pub fn total_minor_units(&self) -> Option<u64> {
        self.total.map(to_minor_units)
    }
}

pub fn to_minor_units(amount: f64) -> u64 {
    let scaled = (amount * MINOR_UNITS_PER_MAJOR).round();
    if scaled <= 0.0 {
        0
    } else {
        scaled.min(u64::MAX as f64) as u64
    }
}

/// Combines the catalog's base fee with the configured add-on.
#[derive(Clone)]
pub struct FeeResolver {
    catalog: Arc<dyn TripCatalog>,
    add_on: AddOnRule,
}

impl FeeResolver {
    pub fn new(catalog: Arc<dyn TripCatalog>, add_on: AddOnRule) -> Self {
        Self { catalog, add_on }
    }

    pub fn add_on(&self) -> &AddOnRule {
        &self.add_on
    }

    /// Recomputed on every call; quotes are never cached across trips or drafts.
    pub async fn compute_total(&self, trip_id: &TripId, draft: &Draft) -> FeeQuote {
        let base_fee = match self.catalog.fee(trip_id).await {
            Ok(fee) => fee.filter(|fee| fee.is_finite() && *fee >= 0.0),
            Err(err) => {
                warn!(%trip_id, error = %err, "fee lookup failed; quoting unknown total");
                None
            }
        };

        let add_on_fee = if self.add_on.applies_to(draft) {
            self.add_on.fee
        } else {
            0.0
        };

        FeeQuote {
            trip_id: trip_id.clone(),
            base_fee,
            add_on_fee,
            total: base_fee.map(|base| base + add_on_fee),
        }
    }
}
