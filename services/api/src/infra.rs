use async_trait::async_trait;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trip_intake::config::IntakeConfig;
use trip_intake::workflows::intake::{
    ApplicantId, ApplicationId, ApplicationRecord, ApplicationStore, AuthorizationResponse,
    CatalogError, CapacityDirectory, ConfirmationResponse, DirectoryError, FormSchema,
    GatewayError, GatewayPayment, GatewayStatus, InMemoryDraftStore, IntakeCollaborators,
    IntakeService, NewApplication, PaymentGateway, PaymentReference, StoreError, TripCatalog,
    TripId,
};
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Trip fees in major units, keyed by trip id.
#[derive(Default, Clone)]
pub(crate) struct InMemoryTripCatalog {
    fees: Arc<Mutex<HashMap<TripId, f64>>>,
}

impl InMemoryTripCatalog {
    pub(crate) fn seeded() -> Self {
        let catalog = Self::default();
        catalog.set_fee("sierra-2025", 400.0);
        catalog.set_fee("desert-2025", 275.0);
        catalog
    }

    pub(crate) fn set_fee(&self, trip_id: &str, fee: f64) {
        self.fees
            .lock()
            .expect("catalog mutex poisoned")
            .insert(TripId::from(trip_id), fee);
    }
}

#[async_trait]
impl TripCatalog for InMemoryTripCatalog {
    async fn fee(&self, trip_id: &TripId) -> Result<Option<f64>, CatalogError> {
        let guard = self.fees.lock().expect("catalog mutex poisoned");
        Ok(guard.get(trip_id).copied())
    }
}

#[derive(Debug, Clone)]
struct SimulatedIntent {
    amount_minor_units: u64,
    reference: Option<String>,
}

/// Local stand-in for the card processor. Every confirmation succeeds, and an intent
/// is charged at most once.
#[derive(Default, Clone)]
pub(crate) struct SimulatedPaymentGateway {
    intents: Arc<Mutex<HashMap<String, SimulatedIntent>>>,
    ledger: Arc<Mutex<Vec<GatewayPayment>>>,
}

impl SimulatedPaymentGateway {
    /// Record a captured payment that never reached the application store.
    pub(crate) fn record_external_payment(&self, amount_minor_units: u64) -> Option<String> {
        let reference = format!("ch_{}", Uuid::new_v4().simple());
        let payment = GatewayPayment {
            reference: PaymentReference::parse(reference.clone())?,
            amount_minor_units,
            status: GatewayStatus::Succeeded,
        };
        self.ledger
            .lock()
            .expect("gateway mutex poisoned")
            .push(payment);
        Some(reference)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn create_authorization(
        &self,
        amount_minor_units: u64,
    ) -> Result<AuthorizationResponse, GatewayError> {
        let handle = format!("pi_{}", Uuid::new_v4().simple());
        self.intents
            .lock()
            .expect("gateway mutex poisoned")
            .insert(
                handle.clone(),
                SimulatedIntent {
                    amount_minor_units,
                    reference: None,
                },
            );

        Ok(AuthorizationResponse {
            client_secret: Some(format!("{handle}_secret_{}", Uuid::new_v4().simple())),
            handle: Some(handle),
        })
    }

    async fn confirm(&self, handle: &str) -> Result<ConfirmationResponse, GatewayError> {
        let mut intents = self.intents.lock().expect("gateway mutex poisoned");
        let intent = intents
            .get_mut(handle)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown payment intent {handle}")))?;

        let reference = match &intent.reference {
            Some(reference) => reference.clone(),
            None => {
                let reference = format!("ch_{}", Uuid::new_v4().simple());
                if let Some(parsed) = PaymentReference::parse(reference.clone()) {
                    self.ledger
                        .lock()
                        .expect("gateway mutex poisoned")
                        .push(GatewayPayment {
                            reference: parsed,
                            amount_minor_units: intent.amount_minor_units,
                            status: GatewayStatus::Succeeded,
                        });
                }
                intent.reference = Some(reference.clone());
                reference
            }
        };

        Ok(ConfirmationResponse {
            status: GatewayStatus::Succeeded,
            reference: Some(reference),
            message: None,
        })
    }

    async fn recent_payments(&self) -> Result<Vec<GatewayPayment>, GatewayError> {
        Ok(self.ledger.lock().expect("gateway mutex poisoned").clone())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationStore {
    records: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
    failing_writes: Arc<AtomicUsize>,
}

impl InMemoryApplicationStore {
    /// Make the next `count` inserts fail as if the database were unreachable.
    pub(crate) fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Vec<ApplicationRecord> {
        let guard = self.records.lock().expect("store mutex poisoned");
        guard.values().cloned().collect()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn insert(&self, application: NewApplication) -> Result<ApplicationRecord, StoreError> {
        if self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("simulated write failure".to_string()));
        }

        let mut guard = self.records.lock().expect("store mutex poisoned");
        if let Some(reference) = application.payment.reference() {
            if guard
                .values()
                .any(|record| record.payment_reference() == Some(reference))
            {
                return Err(StoreError::Conflict);
            }
        }

        let id = ApplicationId(Uuid::new_v4().to_string());
        let record = ApplicationRecord::from_new(id.clone(), application, Utc::now());
        guard.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_payment(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self
            .snapshot()
            .into_iter()
            .find(|record| record.payment_reference() == Some(reference)))
    }

    async fn find_for_applicant(
        &self,
        trip_id: &TripId,
        applicant_id: &ApplicantId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self
            .snapshot()
            .into_iter()
            .find(|record| &record.trip_id == trip_id && &record.applicant_id == applicant_id))
    }

    async fn list_for_trip(&self, trip_id: &TripId) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|record| &record.trip_id == trip_id)
            .collect())
    }

    async fn fetch(
        &self,
        trip_id: &TripId,
        application_id: &ApplicationId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        let guard = self.records.lock().expect("store mutex poisoned");
        Ok(guard
            .get(application_id)
            .filter(|record| &record.trip_id == trip_id)
            .cloned())
    }
}

/// Profile capacities and per-trip instructor assignments.
#[derive(Default, Clone)]
pub(crate) struct InMemoryCapacityDirectory {
    capacities: Arc<Mutex<HashMap<ApplicantId, String>>>,
    instructors: Arc<Mutex<HashMap<TripId, Vec<ApplicantId>>>>,
}

impl InMemoryCapacityDirectory {
    pub(crate) fn seeded() -> Self {
        let directory = Self::default();
        directory.assign_capacity("founder-1", "Founder");
        directory.assign_capacity("leader-1", "Wilderness Leader");
        directory.assign_instructor("sierra-2025", "leader-1");
        directory
    }

    pub(crate) fn assign_capacity(&self, user: &str, capacity: &str) {
        self.capacities
            .lock()
            .expect("directory mutex poisoned")
            .insert(ApplicantId::from(user), capacity.to_string());
    }

    pub(crate) fn assign_instructor(&self, trip_id: &str, user: &str) {
        self.instructors
            .lock()
            .expect("directory mutex poisoned")
            .entry(TripId::from(trip_id))
            .or_default()
            .push(ApplicantId::from(user));
    }
}

#[async_trait]
impl CapacityDirectory for InMemoryCapacityDirectory {
    async fn capacity(&self, user_id: &ApplicantId) -> Result<Option<String>, DirectoryError> {
        let guard = self.capacities.lock().expect("directory mutex poisoned");
        Ok(guard.get(user_id).cloned())
    }

    async fn trip_instructors(&self, trip_id: &TripId) -> Result<Vec<ApplicantId>, DirectoryError> {
        let guard = self.instructors.lock().expect("directory mutex poisoned");
        Ok(guard.get(trip_id).cloned().unwrap_or_default())
    }
}

/// In-memory adapters wired into one service; kept so callers can poke at them.
#[derive(Clone)]
pub(crate) struct LocalAdapters {
    pub(crate) catalog: InMemoryTripCatalog,
    pub(crate) gateway: SimulatedPaymentGateway,
    pub(crate) store: InMemoryApplicationStore,
    pub(crate) directory: InMemoryCapacityDirectory,
}

impl LocalAdapters {
    pub(crate) fn seeded() -> Self {
        Self {
            catalog: InMemoryTripCatalog::seeded(),
            gateway: SimulatedPaymentGateway::default(),
            store: InMemoryApplicationStore::default(),
            directory: InMemoryCapacityDirectory::seeded(),
        }
    }

    pub(crate) fn intake_service(&self, config: &IntakeConfig) -> Arc<IntakeService> {
        let collaborators = IntakeCollaborators {
            drafts: Arc::new(InMemoryDraftStore::default()),
            catalog: Arc::new(self.catalog.clone()),
            gateway: Arc::new(self.gateway.clone()),
            store: Arc::new(self.store.clone()),
            directory: Arc::new(self.directory.clone()),
        };
        Arc::new(IntakeService::new(
            FormSchema::standard(),
            collaborators,
            config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trip_intake::workflows::intake::PaymentStatus;

    fn paid(reference: &str) -> NewApplication {
        NewApplication {
            trip_id: TripId::from("sierra-2025"),
            applicant_id: ApplicantId::from("camper-1"),
            answers: Default::default(),
            payment: PaymentStatus::from_reference(PaymentReference::parse(reference)),
        }
    }

    #[tokio::test]
    async fn store_rejects_a_second_record_for_one_payment() {
        let store = InMemoryApplicationStore::default();
        store.insert(paid("ch_1")).await.expect("first insert");

        let error = store.insert(paid("ch_1")).await.expect_err("duplicate");
        assert!(matches!(error, StoreError::Conflict));
    }

    #[tokio::test]
    async fn store_can_simulate_an_outage() {
        let store = InMemoryApplicationStore::default();
        store.fail_next_writes(1);

        assert!(store.insert(paid("ch_1")).await.is_err());
        let record = store.insert(paid("ch_1")).await.expect("recovers");
        assert!(record.paid);
    }

    #[tokio::test]
    async fn simulated_gateway_records_confirmed_payments() {
        let gateway = SimulatedPaymentGateway::default();
        let authorization = gateway
            .create_authorization(55_000)
            .await
            .expect("authorization");
        let handle = authorization.handle.expect("handle issued");

        let confirmation = gateway.confirm(&handle).await.expect("confirmation");
        assert_eq!(confirmation.status, GatewayStatus::Succeeded);

        let ledger = gateway.recent_payments().await.expect("ledger");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].amount_minor_units, 55_000);
    }

    #[tokio::test]
    async fn confirming_an_intent_twice_charges_once() {
        let gateway = SimulatedPaymentGateway::default();
        let handle = gateway
            .create_authorization(40_000)
            .await
            .expect("authorization")
            .handle
            .expect("handle issued");

        let first = gateway.confirm(&handle).await.expect("first confirmation");
        let second = gateway.confirm(&handle).await.expect("second confirmation");

        assert_eq!(first.reference, second.reference);
        assert_eq!(gateway.recent_payments().await.expect("ledger").len(), 1);
    }

    #[tokio::test]
    async fn unknown_handles_are_rejected() {
        let gateway = SimulatedPaymentGateway::default();
        let error = gateway.confirm("pi_missing").await.expect_err("unknown");
        assert!(matches!(error, GatewayError::Rejected(_)));
    }
}
