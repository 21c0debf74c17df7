use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::config::IntakeConfig;
use crate::workflows::intake::{
    intake_router, Answers, ApplicantId, ApplicationId, ApplicationRecord, ApplicationStore,
    AuthorizationResponse, CatalogError, Capacity, CapacityDirectory, ConfirmationResponse,
    DirectoryError, DraftKey, FieldKind, FormSchema, GatewayError, GatewayPayment, GatewayStatus,
    InMemoryDraftStore, IntakeCollaborators, IntakeService, NewApplication, PaymentGateway,
    PaymentReference, StoreError, Subject, TripCatalog, TripId,
};

pub(super) const TRIP: &str = "sierra-2025";
pub(super) const APPLICANT: &str = "camper-7";

pub(super) fn trip() -> TripId {
    TripId::from(TRIP)
}

pub(super) fn applicant() -> ApplicantId {
    ApplicantId::from(APPLICANT)
}

pub(super) fn draft_key() -> DraftKey {
    DraftKey::new(trip(), applicant())
}

pub(super) fn participant() -> Subject {
    Subject::User {
        id: applicant(),
        capacity: Capacity::Participant,
    }
}

pub(super) fn user(id: &str, capacity: Capacity) -> Subject {
    Subject::User {
        id: ApplicantId::from(id),
        capacity,
    }
}

/// Valid answers for every field of `section`, choosing `rental` for the gear question.
pub(super) fn section_answers(schema: &FormSchema, section: usize, rental: &str) -> Answers {
    schema.sections()[section]
        .fields
        .iter()
        .map(|field| {
            let value = if field.name == "needs_rental_gear" {
                rental.to_string()
            } else {
                match &field.kind {
                    FieldKind::ShortText => "Ada".to_string(),
                    FieldKind::LongText => "Looking forward to the trip.".to_string(),
                    FieldKind::Email => "ada@example.com".to_string(),
                    FieldKind::Phone => "(555) 010-1234".to_string(),
                    FieldKind::Date => "1990-04-12".to_string(),
                    FieldKind::Number { min, .. } => min.unwrap_or(1.0).to_string(),
                    FieldKind::Select { options } => options[0].value.clone(),
                }
            };
            (field.name.clone(), value)
        })
        .collect()
}

#[derive(Default)]
pub(super) struct MemoryCatalog {
    fees: Mutex<HashMap<TripId, f64>>,
}

impl MemoryCatalog {
    pub(super) fn with_fee(trip_id: &TripId, fee: f64) -> Self {
        let catalog = Self::default();
        catalog.set_fee(trip_id, fee);
        catalog
    }

    pub(super) fn set_fee(&self, trip_id: &TripId, fee: f64) {
        self.fees
            .lock()
            .expect("catalog mutex poisoned")
            .insert(trip_id.clone(), fee);
    }
}

#[async_trait]
impl TripCatalog for MemoryCatalog {
    async fn fee(&self, trip_id: &TripId) -> Result<Option<f64>, CatalogError> {
        Ok(self
            .fees
            .lock()
            .expect("catalog mutex poisoned")
            .get(trip_id)
            .copied())
    }
}

pub(super) struct UnavailableCatalog;

#[async_trait]
impl TripCatalog for UnavailableCatalog {
    async fn fee(&self, _trip_id: &TripId) -> Result<Option<f64>, CatalogError> {
        Err(CatalogError::Unavailable("timeout".to_string()))
    }
}

/// Gateway that replays queued replies and otherwise succeeds.
#[derive(Default)]
pub(super) struct ScriptedGateway {
    authorizations: Mutex<VecDeque<Result<AuthorizationResponse, GatewayError>>>,
    confirmations: Mutex<VecDeque<Result<ConfirmationResponse, GatewayError>>>,
    authorized_amounts: Mutex<Vec<u64>>,
    confirmed_handles: Mutex<Vec<String>>,
    recent: Mutex<Vec<GatewayPayment>>,
    counter: AtomicUsize,
}

impl ScriptedGateway {
    pub(super) fn queue_authorization(&self, reply: Result<AuthorizationResponse, GatewayError>) {
        self.authorizations
            .lock()
            .expect("gateway mutex poisoned")
            .push_back(reply);
    }

    pub(super) fn queue_confirmation(&self, reply: Result<ConfirmationResponse, GatewayError>) {
        self.confirmations
            .lock()
            .expect("gateway mutex poisoned")
            .push_back(reply);
    }

    pub(super) fn authorized_amounts(&self) -> Vec<u64> {
        self.authorized_amounts
            .lock()
            .expect("gateway mutex poisoned")
            .clone()
    }

    pub(super) fn confirm_calls(&self) -> usize {
        self.confirmed_handles
            .lock()
            .expect("gateway mutex poisoned")
            .len()
    }

    pub(super) fn report_payment(&self, reference: &str, amount_minor_units: u64) {
        self.recent
            .lock()
            .expect("gateway mutex poisoned")
            .push(GatewayPayment {
                reference: PaymentReference::parse(reference).expect("non-empty reference"),
                amount_minor_units,
                status: GatewayStatus::Succeeded,
            });
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_authorization(
        &self,
        amount_minor_units: u64,
    ) -> Result<AuthorizationResponse, GatewayError> {
        self.authorized_amounts
            .lock()
            .expect("gateway mutex poisoned")
            .push(amount_minor_units);

        let scripted = self
            .authorizations
            .lock()
            .expect("gateway mutex poisoned")
            .pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AuthorizationResponse {
                handle: Some(format!("pi_{n}")),
                client_secret: Some(format!("pi_{n}_secret")),
            })
        })
    }

    async fn confirm(&self, handle: &str) -> Result<ConfirmationResponse, GatewayError> {
        self.confirmed_handles
            .lock()
            .expect("gateway mutex poisoned")
            .push(handle.to_string());

        let scripted = self
            .confirmations
            .lock()
            .expect("gateway mutex poisoned")
            .pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ConfirmationResponse {
                status: GatewayStatus::Succeeded,
                reference: Some(format!("ch_{handle}")),
                message: None,
            })
        })
    }

    async fn recent_payments(&self) -> Result<Vec<GatewayPayment>, GatewayError> {
        Ok(self.recent.lock().expect("gateway mutex poisoned").clone())
    }
}

pub(super) fn succeeded_without_reference() -> ConfirmationResponse {
    ConfirmationResponse {
        status: GatewayStatus::Succeeded,
        reference: None,
        message: None,
    }
}

pub(super) fn declined(message: Option<&str>) -> ConfirmationResponse {
    ConfirmationResponse {
        status: GatewayStatus::Failed,
        reference: None,
        message: message.map(str::to_string),
    }
}

/// Application store that can be told to fail the next N writes.
#[derive(Default)]
pub(super) struct MemoryStore {
    records: Mutex<Vec<ApplicationRecord>>,
    failing_inserts: AtomicUsize,
    insert_attempts: AtomicUsize,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub(super) fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    pub(super) fn records(&self) -> Vec<ApplicationRecord> {
        self.records.lock().expect("store mutex poisoned").clone()
    }

    pub(super) fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert(&self, application: NewApplication) -> Result<ApplicationRecord, StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        let pending_failures = self.failing_inserts.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_inserts
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }

        let mut records = self.records.lock().expect("store mutex poisoned");
        if let Some(reference) = application.payment.reference() {
            if records
                .iter()
                .any(|record| record.payment_reference() == Some(reference))
            {
                return Err(StoreError::Conflict);
            }
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created_at = Utc
            .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::minutes(n as i64);
        let record = ApplicationRecord::from_new(
            ApplicationId(format!("app-{n}")),
            application,
            created_at,
        );
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self
            .records()
            .into_iter()
            .find(|record| record.payment_reference() == Some(reference)))
    }

    async fn find_for_applicant(
        &self,
        trip_id: &TripId,
        applicant_id: &ApplicantId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self
            .records()
            .into_iter()
            .find(|record| &record.trip_id == trip_id && &record.applicant_id == applicant_id))
    }

    async fn list_for_trip(&self, trip_id: &TripId) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self
            .records()
            .into_iter()
            .filter(|record| &record.trip_id == trip_id)
            .collect())
    }

    async fn fetch(
        &self,
        trip_id: &TripId,
        application_id: &ApplicationId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.records().into_iter().find(|record| {
            &record.trip_id == trip_id && &record.application_id == application_id
        }))
    }
}

#[derive(Default)]
pub(super) struct MemoryDirectory {
    capacities: Mutex<HashMap<ApplicantId, String>>,
    instructors: Mutex<HashMap<TripId, Vec<ApplicantId>>>,
}

impl MemoryDirectory {
    pub(super) fn set_capacity(&self, user: &str, capacity: &str) {
        self.capacities
            .lock()
            .expect("directory mutex poisoned")
            .insert(ApplicantId::from(user), capacity.to_string());
    }

    pub(super) fn add_instructor(&self, trip_id: &TripId, user: &str) {
        self.instructors
            .lock()
            .expect("directory mutex poisoned")
            .entry(trip_id.clone())
            .or_default()
            .push(ApplicantId::from(user));
    }
}

#[async_trait]
impl CapacityDirectory for MemoryDirectory {
    async fn capacity(&self, user_id: &ApplicantId) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .capacities
            .lock()
            .expect("directory mutex poisoned")
            .get(user_id)
            .cloned())
    }

    async fn trip_instructors(&self, trip_id: &TripId) -> Result<Vec<ApplicantId>, DirectoryError> {
        Ok(self
            .instructors
            .lock()
            .expect("directory mutex poisoned")
            .get(trip_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub(super) struct Harness {
    pub service: Arc<IntakeService>,
    pub drafts: Arc<InMemoryDraftStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub gateway: Arc<ScriptedGateway>,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryDirectory>,
}

impl Harness {
    pub(super) fn schema(&self) -> &FormSchema {
        self.service.schema()
    }

    /// Walk every section with valid answers, ending on the payment hand-off.
    pub(super) async fn complete_form(&self, rental: &str) {
        let subject = participant();
        self.service
            .open(&subject, &trip())
            .await
            .expect("open succeeds");
        for index in 0..self.schema().len() {
            let answers = section_answers(self.schema(), index, rental);
            self.service
                .advance(&subject, &trip(), answers)
                .await
                .expect("valid section advances");
        }
    }

    pub(super) fn router(&self) -> axum::Router {
        intake_router(self.service.clone())
    }
}

pub(super) fn harness() -> Harness {
    harness_with(IntakeConfig::default())
}

pub(super) fn harness_with(config: IntakeConfig) -> Harness {
    let drafts = Arc::new(InMemoryDraftStore::default());
    let catalog = Arc::new(MemoryCatalog::with_fee(&trip(), 400.0));
    let gateway = Arc::new(ScriptedGateway::default());
    let store = Arc::new(MemoryStore::default());
    let directory = Arc::new(MemoryDirectory::default());

    let service = IntakeService::new(
        FormSchema::standard(),
        IntakeCollaborators {
            drafts: drafts.clone(),
            catalog: catalog.clone(),
            gateway: gateway.clone(),
            store: store.clone(),
            directory: directory.clone(),
        },
        &config,
    );

    Harness {
        service: Arc::new(service),
        drafts,
        catalog,
        gateway,
        store,
        directory,
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
