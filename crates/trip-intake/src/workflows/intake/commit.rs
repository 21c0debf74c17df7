use std::sync::Arc;

use tracing::{error, info, warn};

use super::domain::{ApplicantId, PaymentReference, PaymentStatus, TripId};
use super::draft::{Draft, DraftKey, DraftStore};
use super::repository::{ApplicationRecord, ApplicationStore, NewApplication, StoreError};
use super::schema::FormSchema;

/// Failures of the final write. Only `Store` can follow a completed charge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommitError {
    #[error("application is missing required answers: {}", .0.join(", "))]
    IncompleteDraft(Vec<String>),
    #[error("a payment is required before the application can be submitted")]
    PaymentRequired,
    #[error("an application for this trip was already submitted")]
    AlreadySubmitted(Box<ApplicationRecord>),
    #[error(
        "payment received, submission not recorded; \
         retry to finish your application ({source})"
    )]
    Store {
        payment: Option<PaymentReference>,
        #[source]
        source: StoreError,
    },
}

impl CommitError {
    /// Whether re-running the same commit may succeed without further user input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommitError::Store { .. })
    }
}

/// Writes one application record per completed payment and then clears the draft.
#[derive(Clone)]
pub struct SubmissionCommitter {
    schema: Arc<FormSchema>,
    store: Arc<dyn ApplicationStore>,
    drafts: Arc<dyn DraftStore>,
    allow_deferred_payment: bool,
}

impl SubmissionCommitter {
    pub fn new(
        schema: Arc<FormSchema>,
        store: Arc<dyn ApplicationStore>,
        drafts: Arc<dyn DraftStore>,
        allow_deferred_payment: bool,
    ) -> Self {
        Self {
            schema,
            store,
            drafts,
            allow_deferred_payment,
        }
    }

    pub fn allows_deferred_payment(&self) -> bool {
        self.allow_deferred_payment
    }

    /// Persist the application, then clear the draft.
    ///
    /// The draft is only cleared after the store acknowledged the write; any store
    /// failure leaves it intact so the applicant can retry. A record already holding
    /// `payment` is returned unchanged instead of writing a second one.
    pub async fn commit(
        &self,
        trip_id: &TripId,
        applicant_id: &ApplicantId,
        draft: &Draft,
        payment: Option<&PaymentReference>,
    ) -> Result<ApplicationRecord, CommitError> {
        let missing = self.missing_required(draft);
        if !missing.is_empty() {
            return Err(CommitError::IncompleteDraft(missing));
        }
        if payment.is_none() && !self.allow_deferred_payment {
            return Err(CommitError::PaymentRequired);
        }

        let store_error = |source: StoreError| {
            error!(
                %trip_id,
                %applicant_id,
                payment_reference = payment.map(PaymentReference::as_str).unwrap_or("unpaid"),
                error = %source,
                "application write failed; draft preserved for retry"
            );
            CommitError::Store {
                payment: payment.cloned(),
                source,
            }
        };

        if let Some(reference) = payment {
            if let Some(existing) = self
                .store
                .find_by_payment(reference)
                .await
                .map_err(store_error)?
            {
                info!(
                    application_id = %existing.application_id,
                    payment_reference = %reference,
                    "payment already recorded; returning existing application"
                );
                self.clear_draft(trip_id, applicant_id).await;
                return Ok(existing);
            }
        }

        if let Some(existing) = self
            .store
            .find_for_applicant(trip_id, applicant_id)
            .await
            .map_err(store_error)?
        {
            warn!(
                %trip_id,
                %applicant_id,
                application_id = %existing.application_id,
                "refusing to overwrite an existing application"
            );
            return Err(CommitError::AlreadySubmitted(Box::new(existing)));
        }

        let record = self
            .store
            .insert(NewApplication {
                trip_id: trip_id.clone(),
                applicant_id: applicant_id.clone(),
                answers: draft.clone(),
                payment: PaymentStatus::from_reference(payment.cloned()),
            })
            .await
            .map_err(store_error)?;

        info!(
            application_id = %record.application_id,
            %trip_id,
            %applicant_id,
            paid = record.paid,
            "application recorded"
        );
        self.clear_draft(trip_id, applicant_id).await;
        Ok(record)
    }

    /// Required fields across every section that are absent or blank.
    pub fn missing_required(&self, draft: &Draft) -> Vec<String> {
        self.schema
            .required_fields()
            .filter(|field| {
                draft
                    .get(&field.name)
                    .map_or(true, |value| value.trim().is_empty())
            })
            .map(|field| field.name.clone())
            .collect()
    }

    // The record is already durable here; a failed clear only leaves stale defaults.
    async fn clear_draft(&self, trip_id: &TripId, applicant_id: &ApplicantId) {
        let key = DraftKey::new(trip_id.clone(), applicant_id.clone());
        if let Err(err) = self.drafts.clear(&key).await {
            warn!(draft_key = %key, error = %err, "unable to clear committed draft");
        }
    }
}
