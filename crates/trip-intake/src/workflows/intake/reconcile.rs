use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::payment::{GatewayError, GatewayPayment, PaymentGateway};
use super::repository::{ApplicationStore, StoreError};

/// Outcome of one sweep over gateway-reported payments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub inspected: usize,
    pub matched: usize,
    /// Payments the gateway counts as paid with no application record.
    pub orphaned: Vec<GatewayPayment>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Flags payments that never reached the application store. Does not repair them.
#[derive(Clone)]
pub struct PaymentReconciler {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn ApplicationStore>,
}

impl PaymentReconciler {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn ApplicationStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn run(&self) -> Result<ReconciliationReport, ReconcileError> {
        let payments = self.gateway.recent_payments().await?;
        let mut report = ReconciliationReport::default();

        for payment in payments
            .into_iter()
            .filter(|payment| payment.status.counts_as_paid())
        {
            report.inspected += 1;
            if self.store.find_by_payment(&payment.reference).await?.is_some() {
                report.matched += 1;
            } else {
                warn!(
                    payment_reference = %payment.reference,
                    amount_minor_units = payment.amount_minor_units,
                    status = payment.status.label(),
                    "orphaned payment: no application recorded"
                );
                report.orphaned.push(payment);
            }
        }

        info!(
            inspected = report.inspected,
            matched = report.matched,
            orphaned = report.orphaned.len(),
            "payment reconciliation finished"
        );
        Ok(report)
    }
}
