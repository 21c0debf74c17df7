use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use super::commit::{CommitError, SubmissionCommitter};
use super::domain::{ApplicantId, ApplicationId, PaymentReference, TripId};
use super::draft::{Answers, Draft, DraftKey, DraftStore, DraftStoreError};
use super::fees::{to_minor_units, AddOnRule, FeeQuote, FeeResolver, TripCatalog};
use super::payment::{
    AuthSetupError, Checkout, ConfirmationError, PaymentAuthorization, PaymentGateway,
    PaymentOrchestrator,
};
use super::policy::{
    AccessDecision, AccessPolicy, Action, Capacity, CapacityDirectory, DirectoryError, Resource,
    Subject,
};
use super::reconcile::{PaymentReconciler, ReconcileError, ReconciliationReport};
use super::repository::{ApplicationRecord, ApplicationStore, StoreError, SubmissionSummaryView};
use super::schema::{FormField, FormSchema};
use super::session::{FormSessionManager, Progress, SessionError, SessionState};
use super::validation::{validate_section, ValidationError};
use crate::config::IntakeConfig;

/// External systems the intake workflow depends on.
#[derive(Clone)]
pub struct IntakeCollaborators {
    pub drafts: Arc<dyn DraftStore>,
    pub catalog: Arc<dyn TripCatalog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub store: Arc<dyn ApplicationStore>,
    pub directory: Arc<dyn CapacityDirectory>,
}

/// Section payload rendered for the applicant.
#[derive(Debug, Clone, Serialize)]
pub struct SectionView {
    pub trip_id: TripId,
    pub section_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub progress: Progress,
    pub fields: Vec<FormField>,
    pub checkout_state: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Next(SectionView),
    Complete {
        quote: FeeQuote,
        #[serde(skip_serializing_if = "Option::is_none")]
        payment_path: Option<String>,
    },
}

/// Successful end of the flow.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub record: ApplicationRecord,
    pub redirect_to: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("sign in to continue")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("finish every section before continuing to payment")]
    FormIncomplete,
    #[error("requested amount {requested} does not match the current total {expected:?}")]
    AmountMismatch {
        requested: f64,
        expected: Option<f64>,
    },
    #[error(transparent)]
    AuthSetup(#[from] AuthSetupError),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("missing saved application data; return to the application form")]
    MissingDraft,
    #[error("another request for this application is still in progress")]
    Busy,
    #[error("payment already received; answers can no longer be changed, finish the submission")]
    PaymentLocked,
    #[error("submission not found")]
    NotFound,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Draft(#[from] DraftStoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

#[derive(Debug, Clone)]
struct IntakeSession {
    form: SessionState,
    checkout: Checkout,
}

/// Composes the session manager, fee resolver, payment orchestrator, and committer
/// behind per-(trip, applicant) sessions.
pub struct IntakeService {
    forms: FormSessionManager,
    fees: FeeResolver,
    payments: PaymentOrchestrator,
    committer: SubmissionCommitter,
    reconciler: PaymentReconciler,
    policy: AccessPolicy,
    drafts: Arc<dyn DraftStore>,
    store: Arc<dyn ApplicationStore>,
    directory: Arc<dyn CapacityDirectory>,
    sessions: Mutex<HashMap<DraftKey, IntakeSession>>,
    in_flight: Mutex<HashSet<DraftKey>>,
}

impl IntakeService {
    pub fn new(
        schema: FormSchema,
        collaborators: IntakeCollaborators,
        config: &IntakeConfig,
    ) -> Self {
        let schema = Arc::new(schema);
        let IntakeCollaborators {
            drafts,
            catalog,
            gateway,
            store,
            directory,
        } = collaborators;

        Self {
            forms: FormSessionManager::new(schema.clone(), drafts.clone()),
            fees: FeeResolver::new(catalog, AddOnRule::from(config)),
            payments: PaymentOrchestrator::new(gateway.clone()),
            committer: SubmissionCommitter::new(
                schema,
                store.clone(),
                drafts.clone(),
                config.allow_deferred_payment,
            ),
            reconciler: PaymentReconciler::new(gateway, store.clone()),
            policy: AccessPolicy,
            drafts,
            store,
            directory,
            sessions: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn schema(&self) -> &FormSchema {
        self.forms.schema()
    }

    /// Resolve a request's user id into a policy subject.
    pub async fn subject_for(&self, user_id: Option<ApplicantId>) -> Result<Subject, IntakeError> {
        let Some(id) = user_id else {
            return Ok(Subject::Anonymous);
        };
        let capacity = self
            .directory
            .capacity(&id)
            .await?
            .map(|raw| Capacity::parse(&raw))
            .unwrap_or(Capacity::Participant);
        Ok(Subject::User { id, capacity })
    }

    /// Enter (or re-enter after a reload) the intake flow at the first section.
    ///
    /// A checkout already in progress survives re-entry so a paid but uncommitted
    /// application can still be retried.
    pub async fn open(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<SectionView, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let (_guard, existing) = self.claim(&key)?;

        let form = self.forms.open(key.clone()).await?;
        let checkout = existing.map(|session| session.checkout).unwrap_or_default();
        let view = self.section_view(&form, &checkout);
        self.save(&key, form, checkout);
        Ok(view)
    }

    /// Validate and merge the current section, then move on or hand off to payment.
    pub async fn advance(
        &self,
        subject: &Subject,
        trip_id: &TripId,
        answers: Answers,
    ) -> Result<AdvanceOutcome, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let (_guard, session) = self.claim_open(&key).await?;
        ensure_editable(&session.checkout)?;

        validate_section(self.forms.current_section(&session.form), &answers)?;
        let form = self.forms.advance(&session.form, &answers).await?;

        let outcome = if form.is_complete() {
            let quote = self.fees.compute_total(trip_id, form.draft()).await;
            let payment_path = quote
                .total
                .map(|total| format!("/api/v1/trips/{trip_id}/payment?amount={total}"));
            AdvanceOutcome::Complete {
                quote,
                payment_path,
            }
        } else {
            AdvanceOutcome::Next(self.section_view(&form, &session.checkout))
        };

        self.save(&key, form, session.checkout);
        Ok(outcome)
    }

    pub async fn retreat(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<SectionView, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let (_guard, session) = self.claim_open(&key).await?;
        ensure_editable(&session.checkout)?;

        let form = self.forms.retreat(&session.form);
        let view = self.section_view(&form, &session.checkout);
        self.save(&key, form, session.checkout);
        Ok(view)
    }

    pub async fn quote(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<FeeQuote, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let draft = self.stored_draft(&key).await?.unwrap_or_default();
        Ok(self.fees.compute_total(trip_id, &draft).await)
    }

    /// Obtain an authorization for the current total.
    ///
    /// `requested` is the total the client was shown; it must still match. Applicants
    /// who already hold a record for the trip are refused before the gateway is called.
    pub async fn prepare_payment(
        &self,
        subject: &Subject,
        trip_id: &TripId,
        requested: Option<f64>,
    ) -> Result<PaymentAuthorization, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let (_guard, mut session) = self.claim_open(&key).await?;
        if !session.form.is_complete() {
            return Err(IntakeError::FormIncomplete);
        }
        self.ensure_not_submitted(&key, session.checkout.reference()).await?;

        let quote = self.fees.compute_total(trip_id, session.form.draft()).await;
        if let Some(requested) = requested {
            let matches = quote
                .total_minor_units()
                .is_some_and(|total| total == to_minor_units(requested));
            if !matches {
                return Err(IntakeError::AmountMismatch {
                    requested,
                    expected: quote.total,
                });
            }
        }

        let result = self.payments.prepare(&mut session.checkout, &quote).await;
        self.save(&key, session.form, session.checkout);
        result.map_err(IntakeError::from)
    }

    /// Confirm the payment and, on success, commit the application.
    pub async fn confirm_payment(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<Submission, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let (_guard, mut session) = self.claim_open(&key).await?;
        self.ensure_not_submitted(&key, session.checkout.reference()).await?;

        let quote = self.fees.compute_total(trip_id, session.form.draft()).await;
        let confirmed = self.payments.confirm(&mut session.checkout, &quote).await;
        let form = session.form.clone();
        self.save(&key, session.form, session.checkout);
        let reference = confirmed?;

        self.commit_with(&key, &form, Some(&reference)).await
    }

    /// Retry a failed commit, or submit unpaid when deferred payment is enabled.
    pub async fn commit(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<Submission, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let (_guard, session) = self.claim_open(&key).await?;
        let reference = session.checkout.reference().cloned();

        self.commit_with(&key, &session.form, reference.as_ref()).await
    }

    pub fn checkout(&self, subject: &Subject, trip_id: &TripId) -> Result<Checkout, IntakeError> {
        let key = self.applicant_key(subject, trip_id)?;
        let sessions = self.sessions.lock().expect("session mutex poisoned");
        Ok(sessions
            .get(&key)
            .map(|session| session.checkout.clone())
            .unwrap_or_default())
    }

    pub async fn submissions(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<Vec<SubmissionSummaryView>, IntakeError> {
        self.authorize_review(subject, trip_id).await?;
        let mut records = self.store.list_for_trip(trip_id).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records.iter().map(ApplicationRecord::summary_view).collect())
    }

    pub async fn submission(
        &self,
        subject: &Subject,
        trip_id: &TripId,
        application_id: &ApplicationId,
    ) -> Result<ApplicationRecord, IntakeError> {
        self.authorize_review(subject, trip_id).await?;
        self.store
            .fetch(trip_id, application_id)
            .await?
            .ok_or(IntakeError::NotFound)
    }

    pub async fn reconcile(&self) -> Result<ReconciliationReport, IntakeError> {
        Ok(self.reconciler.run().await?)
    }

    async fn commit_with(
        &self,
        key: &DraftKey,
        form: &SessionState,
        reference: Option<&PaymentReference>,
    ) -> Result<Submission, IntakeError> {
        let draft = match self.stored_draft(key).await? {
            Some(draft) => draft,
            None if !form.draft().is_empty() => form.draft().clone(),
            None => return Err(IntakeError::MissingDraft),
        };

        match self
            .committer
            .commit(&key.trip_id, &key.applicant_id, &draft, reference)
            .await
        {
            Ok(record) => {
                self.sessions
                    .lock()
                    .expect("session mutex poisoned")
                    .remove(key);
                Ok(Submission {
                    redirect_to: format!("/trips/{}", record.trip_id),
                    record,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn stored_draft(&self, key: &DraftKey) -> Result<Option<Draft>, IntakeError> {
        Ok(self.drafts.get(key).await?)
    }

    /// Refuse to move money for an applicant who already has a record, unless that
    /// record holds `reference` and this is a retry of the same payment.
    async fn ensure_not_submitted(
        &self,
        key: &DraftKey,
        reference: Option<&PaymentReference>,
    ) -> Result<(), IntakeError> {
        let Some(existing) = self
            .store
            .find_for_applicant(&key.trip_id, &key.applicant_id)
            .await?
        else {
            return Ok(());
        };
        if reference.is_some() && existing.payment_reference() == reference {
            return Ok(());
        }

        warn!(
            draft_key = %key,
            application_id = %existing.application_id,
            "application already recorded; refusing a further payment"
        );
        Err(CommitError::AlreadySubmitted(Box::new(existing)).into())
    }

    async fn authorize_review(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<(), IntakeError> {
        if matches!(subject, Subject::Anonymous) {
            return Err(IntakeError::Unauthenticated);
        }
        let instructors = self.directory.trip_instructors(trip_id).await?;
        let resource = Resource::Trip {
            trip_id: trip_id.clone(),
            instructors,
        };
        match self
            .policy
            .evaluate(subject, Action::ReviewSubmissions, &resource)
        {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) => Err(IntakeError::Forbidden(reason)),
        }
    }

    fn applicant_key(
        &self,
        subject: &Subject,
        trip_id: &TripId,
    ) -> Result<DraftKey, IntakeError> {
        let resource = Resource::Trip {
            trip_id: trip_id.clone(),
            instructors: Vec::new(),
        };
        match self
            .policy
            .evaluate(subject, Action::SubmitApplication, &resource)
        {
            AccessDecision::Allow => {}
            AccessDecision::Deny(_) if subject.user_id().is_none() => {
                return Err(IntakeError::Unauthenticated)
            }
            AccessDecision::Deny(reason) => return Err(IntakeError::Forbidden(reason)),
        }
        let applicant = subject.user_id().ok_or(IntakeError::Unauthenticated)?;
        Ok(DraftKey::new(trip_id.clone(), applicant.clone()))
    }

    fn section_view(&self, form: &SessionState, checkout: &Checkout) -> SectionView {
        let section = self.forms.current_section(form);
        SectionView {
            trip_id: form.key().trip_id.clone(),
            section_id: section.id.clone(),
            title: section.title.clone(),
            description: section.description.clone(),
            progress: self.forms.progress(form),
            fields: self.forms.fields_with_defaults(form),
            checkout_state: checkout.phase().label(),
        }
    }

    /// Mark the session busy before touching any collaborator; the returned guard
    /// releases it on drop.
    fn claim(&self, key: &DraftKey) -> Result<(InFlight<'_>, Option<IntakeSession>), IntakeError> {
        if !self
            .in_flight
            .lock()
            .expect("in-flight mutex poisoned")
            .insert(key.clone())
        {
            return Err(IntakeError::Busy);
        }
        let guard = InFlight {
            keys: &self.in_flight,
            key: key.clone(),
        };

        let existing = self
            .sessions
            .lock()
            .expect("session mutex poisoned")
            .get(key)
            .cloned();
        Ok((guard, existing))
    }

    /// Like [`Self::claim`], rehydrating the session from the draft store when absent.
    async fn claim_open(
        &self,
        key: &DraftKey,
    ) -> Result<(InFlight<'_>, IntakeSession), IntakeError> {
        let (guard, existing) = self.claim(key)?;
        let session = match existing {
            Some(session) => session,
            None => {
                let form = self.forms.open(key.clone()).await?;
                info!(draft_key = %key, "rehydrated intake session");
                let session = IntakeSession {
                    form,
                    checkout: Checkout::default(),
                };
                self.sessions
                    .lock()
                    .expect("session mutex poisoned")
                    .insert(key.clone(), session.clone());
                session
            }
        };
        Ok((guard, session))
    }

    fn save(&self, key: &DraftKey, form: SessionState, checkout: Checkout) {
        self.sessions
            .lock()
            .expect("session mutex poisoned")
            .insert(key.clone(), IntakeSession { form, checkout });
    }
}

/// Answers are frozen once money has moved, so the record matches the charge.
fn ensure_editable(checkout: &Checkout) -> Result<(), IntakeError> {
    match checkout.reference() {
        Some(_) => Err(IntakeError::PaymentLocked),
        None => Ok(()),
    }
}

/// Clears a session's in-flight mark when the request finishes, even on error.
struct InFlight<'a> {
    keys: &'a Mutex<HashSet<DraftKey>>,
    key: DraftKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}
