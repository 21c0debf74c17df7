use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicantId, ApplicationId, PaymentReference, PaymentStatus, TripId};
use super::draft::Draft;

/// Application payload handed to the store; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplication {
    pub trip_id: TripId,
    pub applicant_id: ApplicantId,
    pub answers: Draft,
    pub payment: PaymentStatus,
}

/// Durable, immutable result of a completed intake-and-payment flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: ApplicationId,
    pub trip_id: TripId,
    pub applicant_id: ApplicantId,
    pub answers: Draft,
    pub payment: PaymentStatus,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn from_new(
        application_id: ApplicationId,
        application: NewApplication,
        created_at: DateTime<Utc>,
    ) -> Self {
        let paid = application.payment.is_paid();
        Self {
            application_id,
            trip_id: application.trip_id,
            applicant_id: application.applicant_id,
            answers: application.answers,
            payment: application.payment,
            paid,
            created_at,
        }
    }

    pub fn payment_reference(&self) -> Option<&PaymentReference> {
        self.payment.reference()
    }

    pub fn summary_view(&self) -> SubmissionSummaryView {
        SubmissionSummaryView {
            application_id: self.application_id.clone(),
            applicant_id: self.applicant_id.clone(),
            payment_status: self.payment.label(),
            created_at: self.created_at,
        }
    }
}

/// Row shown in the per-trip submissions list.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionSummaryView {
    pub application_id: ApplicationId,
    pub applicant_id: ApplicantId,
    pub payment_status: &'static str,
    pub created_at: DateTime<Utc>,
}

/// Storage abstraction for submitted applications.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert(&self, application: NewApplication) -> Result<ApplicationRecord, StoreError>;
    async fn find_by_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<ApplicationRecord>, StoreError>;
    async fn find_for_applicant(
        &self,
        trip_id: &TripId,
        applicant_id: &ApplicantId,
    ) -> Result<Option<ApplicationRecord>, StoreError>;
    async fn list_for_trip(&self, trip_id: &TripId) -> Result<Vec<ApplicationRecord>, StoreError>;
    async fn fetch(
        &self,
        trip_id: &TripId,
        application_id: &ApplicationId,
    ) -> Result<Option<ApplicationRecord>, StoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("application store unavailable: {0}")]
    Unavailable(String),
}
