//! Trip application intake: multi-section form, fee quote, card payment, and the
//! single durable write that turns a paid draft into an application record.

pub mod commit;
pub mod domain;
pub mod draft;
pub mod fees;
pub mod payment;
pub mod policy;
pub mod reconcile;
pub mod repository;
pub mod router;
pub mod schema;
pub mod service;
pub mod session;
pub mod validation;

#[cfg(test)]
mod tests;

pub use commit::{CommitError, SubmissionCommitter};
pub use domain::{ApplicantId, ApplicationId, PaymentReference, PaymentStatus, TripId};
pub use draft::{Answers, Draft, DraftKey, DraftStore, DraftStoreError, InMemoryDraftStore};
pub use fees::{AddOnRule, CatalogError, FeeQuote, FeeResolver, TripCatalog};
pub use payment::{
    AuthSetupError, AuthorizationResponse, Checkout, CheckoutPhase, ConfirmationError,
    ConfirmationResponse, GatewayError, GatewayPayment, GatewayStatus, PaymentAuthorization,
    PaymentGateway, PaymentOrchestrator,
};
pub use policy::{
    AccessDecision, AccessPolicy, Action, Capacity, CapacityDirectory, DirectoryError, Resource,
    Subject,
};
pub use reconcile::{PaymentReconciler, ReconcileError, ReconciliationReport};
pub use repository::{
    ApplicationRecord, ApplicationStore, NewApplication, StoreError, SubmissionSummaryView,
};
pub use router::intake_router;
pub use schema::{FieldKind, FieldOption, FormField, FormSchema, FormSection, SchemaError};
pub use service::{
    AdvanceOutcome, IntakeCollaborators, IntakeError, IntakeService, SectionView, Submission,
};
pub use session::{FormSessionManager, Progress, SessionError, SessionState};
pub use validation::{validate_section, FieldViolation, ValidationError};
