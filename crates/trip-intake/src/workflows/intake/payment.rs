use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::PaymentReference;
use super::fees::FeeQuote;

/// Outbound port to the card processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_authorization(
        &self,
        amount_minor_units: u64,
    ) -> Result<AuthorizationResponse, GatewayError>;

    async fn confirm(&self, handle: &str) -> Result<ConfirmationResponse, GatewayError>;

    /// Payments the gateway considers captured or settling, for reconciliation.
    async fn recent_payments(&self) -> Result<Vec<GatewayPayment>, GatewayError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("gateway unreachable: {0}")]
    Unavailable(String),
}

/// Raw authorization payload; either field may be missing on a malformed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub handle: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Succeeded,
    Processing,
    RequiresAction,
    Canceled,
    Failed,
    #[serde(other)]
    Unknown,
}

impl GatewayStatus {
    /// Statuses that let the flow proceed to commit; processing settles eventually.
    pub const fn counts_as_paid(self) -> bool {
        matches!(self, GatewayStatus::Succeeded | GatewayStatus::Processing)
    }

    pub const fn label(self) -> &'static str {
        match self {
            GatewayStatus::Succeeded => "succeeded",
            GatewayStatus::Processing => "processing",
            GatewayStatus::RequiresAction => "requires_action",
            GatewayStatus::Canceled => "canceled",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub status: GatewayStatus,
    pub reference: Option<String>,
    pub message: Option<String>,
}

/// Gateway-side view of a payment, used by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub reference: PaymentReference,
    pub amount_minor_units: u64,
    pub status: GatewayStatus,
}

/// Gateway-issued permission to confirm one payment of a fixed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentAuthorization {
    pub handle: String,
    pub client_secret: String,
    pub amount_minor_units: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AuthSetup,
    Declined,
    Anomaly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Checkout lifecycle: `Idle -> AwaitingIntent -> Ready -> Confirming -> {Succeeded, Failed}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckoutPhase {
    #[default]
    Idle,
    AwaitingIntent {
        amount_minor_units: u64,
    },
    Ready {
        authorization: PaymentAuthorization,
    },
    Confirming {
        authorization: PaymentAuthorization,
    },
    Succeeded {
        authorization: PaymentAuthorization,
        reference: PaymentReference,
    },
    Failed {
        failure: PaymentFailure,
        /// Kept after a decline so the applicant can retry with the same authorization.
        authorization: Option<PaymentAuthorization>,
    },
}

impl CheckoutPhase {
    pub const fn label(&self) -> &'static str {
        match self {
            CheckoutPhase::Idle => "idle",
            CheckoutPhase::AwaitingIntent { .. } => "awaiting_intent",
            CheckoutPhase::Ready { .. } => "ready",
            CheckoutPhase::Confirming { .. } => "confirming",
            CheckoutPhase::Succeeded { .. } => "succeeded",
            CheckoutPhase::Failed { .. } => "failed",
        }
    }

    pub fn authorization(&self) -> Option<&PaymentAuthorization> {
        match self {
            CheckoutPhase::Ready { authorization }
            | CheckoutPhase::Confirming { authorization }
            | CheckoutPhase::Succeeded { authorization, .. } => Some(authorization),
            CheckoutPhase::Failed { authorization, .. } => authorization.as_ref(),
            CheckoutPhase::Idle | CheckoutPhase::AwaitingIntent { .. } => None,
        }
    }

    pub fn reference(&self) -> Option<&PaymentReference> {
        match self {
            CheckoutPhase::Succeeded { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

/// One applicant's checkout attempt for one trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Checkout {
    phase: CheckoutPhase,
}

impl Checkout {
    pub fn phase(&self) -> &CheckoutPhase {
        &self.phase
    }

    pub fn reference(&self) -> Option<&PaymentReference> {
        self.phase.reference()
    }

    fn transition(&mut self, next: CheckoutPhase) {
        debug!(from = self.phase.label(), to = next.label(), "checkout transition");
        self.phase = next;
    }
}

/// Halts the flow before any charge is attempted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthSetupError {
    #[error("payment setup failed: the trip fee is unknown")]
    UnknownTotal,
    #[error("payment setup failed: nothing to charge")]
    NothingToCharge,
    #[error("payment setup failed: this checkout has already been paid")]
    AlreadyPaid,
    #[error("payment setup failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("payment setup failed: gateway response was missing the {0}")]
    Malformed(&'static str),
}

/// Declined or anomalous confirmation; the applicant decides whether to retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfirmationError {
    #[error("payment is not ready to confirm (checkout is {0})")]
    NotReady(&'static str),
    #[error("{0}")]
    Declined(String),
    #[error("payment reported {0} without a reference; please contact us before retrying")]
    MissingReference(&'static str),
    #[error("payment could not be confirmed: {0}")]
    Gateway(#[from] GatewayError),
    #[error(
        "the amount due changed; review the new total of {new_amount_minor_units} \
         and confirm again"
    )]
    AmountChanged { new_amount_minor_units: u64 },
    #[error(transparent)]
    Reauthorize(#[from] AuthSetupError),
}

const DEFAULT_DECLINE_MESSAGE: &str = "Payment could not be completed. Please try again.";

/// Drives a [`Checkout`] through authorization and confirmation against the gateway.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }

    /// Ensure the checkout holds an authorization for exactly `quote`'s total.
    ///
    /// An authorization for a different amount is discarded and a new one requested.
    pub async fn prepare(
        &self,
        checkout: &mut Checkout,
        quote: &FeeQuote,
    ) -> Result<PaymentAuthorization, AuthSetupError> {
        if let CheckoutPhase::Succeeded { .. } = checkout.phase {
            return Err(AuthSetupError::AlreadyPaid);
        }

        let Some(amount) = quote.total_minor_units() else {
            if checkout.phase.authorization().is_some() {
                checkout.transition(CheckoutPhase::Idle);
            }
            return Err(AuthSetupError::UnknownTotal);
        };
        if amount == 0 {
            return Err(AuthSetupError::NothingToCharge);
        }

        if let Some(existing) = checkout.phase.authorization() {
            if existing.amount_minor_units == amount {
                let authorization = existing.clone();
                if !matches!(checkout.phase, CheckoutPhase::Ready { .. }) {
                    checkout.transition(CheckoutPhase::Ready {
                        authorization: authorization.clone(),
                    });
                }
                return Ok(authorization);
            }
            info!(
                previous = existing.amount_minor_units,
                amount, "total changed; discarding payment authorization"
            );
        }

        checkout.transition(CheckoutPhase::AwaitingIntent {
            amount_minor_units: amount,
        });

        match self.request_authorization(amount).await {
            Ok(authorization) => {
                checkout.transition(CheckoutPhase::Ready {
                    authorization: authorization.clone(),
                });
                Ok(authorization)
            }
            Err(err) => {
                warn!(amount, error = %err, "payment authorization setup failed");
                checkout.transition(CheckoutPhase::Failed {
                    failure: PaymentFailure {
                        kind: FailureKind::AuthSetup,
                        message: err.to_string(),
                    },
                    authorization: None,
                });
                Err(err)
            }
        }
    }

    async fn request_authorization(
        &self,
        amount_minor_units: u64,
    ) -> Result<PaymentAuthorization, AuthSetupError> {
        let response = self.gateway.create_authorization(amount_minor_units).await?;

        let handle = response
            .handle
            .filter(|value| !value.trim().is_empty())
            .ok_or(AuthSetupError::Malformed("authorization handle"))?;
        let client_secret = response
            .client_secret
            .filter(|value| !value.trim().is_empty())
            .ok_or(AuthSetupError::Malformed("client secret"))?;

        Ok(PaymentAuthorization {
            handle,
            client_secret,
            amount_minor_units,
        })
    }

    /// Confirm the held authorization after the applicant's explicit action.
    ///
    /// `quote` is the freshly recomputed total; if it no longer matches the held
    /// authorization, a new authorization is requested and nothing is charged.
    /// A succeeded checkout returns its reference without contacting the gateway.
    pub async fn confirm(
        &self,
        checkout: &mut Checkout,
        quote: &FeeQuote,
    ) -> Result<PaymentReference, ConfirmationError> {
        if let CheckoutPhase::Succeeded { reference, .. } = &checkout.phase {
            return Ok(reference.clone());
        }

        let authorization = match &checkout.phase {
            CheckoutPhase::Ready { authorization } => authorization.clone(),
            CheckoutPhase::Failed {
                authorization: Some(authorization),
                ..
            } => authorization.clone(),
            other => return Err(ConfirmationError::NotReady(other.label())),
        };

        if quote.total_minor_units() != Some(authorization.amount_minor_units) {
            let renewed = self.prepare(checkout, quote).await?;
            return Err(ConfirmationError::AmountChanged {
                new_amount_minor_units: renewed.amount_minor_units,
            });
        }

        checkout.transition(CheckoutPhase::Confirming {
            authorization: authorization.clone(),
        });

        let response = match self.gateway.confirm(&authorization.handle).await {
            Ok(response) => response,
            Err(err) => {
                checkout.transition(CheckoutPhase::Failed {
                    failure: PaymentFailure {
                        kind: FailureKind::Declined,
                        message: err.to_string(),
                    },
                    authorization: Some(authorization),
                });
                return Err(ConfirmationError::Gateway(err));
            }
        };

        if !response.status.counts_as_paid() {
            let message = response
                .message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DECLINE_MESSAGE.to_string());
            info!(status = response.status.label(), "payment confirmation declined");
            checkout.transition(CheckoutPhase::Failed {
                failure: PaymentFailure {
                    kind: FailureKind::Declined,
                    message: message.clone(),
                },
                authorization: Some(authorization),
            });
            return Err(ConfirmationError::Declined(message));
        }

        match response.reference.and_then(PaymentReference::parse) {
            Some(reference) => {
                info!(
                    payment_reference = %reference,
                    status = response.status.label(),
                    "payment confirmed"
                );
                checkout.transition(CheckoutPhase::Succeeded {
                    authorization,
                    reference: reference.clone(),
                });
                Ok(reference)
            }
            None => {
                let status = response.status.label();
                warn!(
                    handle = %authorization.handle,
                    status, "gateway reported success without a payment reference"
                );
                checkout.transition(CheckoutPhase::Failed {
                    failure: PaymentFailure {
                        kind: FailureKind::Anomaly,
                        message: format!("payment {status} without a reference"),
                    },
                    authorization: None,
                });
                Err(ConfirmationError::MissingReference(status))
            }
        }
    }
}
