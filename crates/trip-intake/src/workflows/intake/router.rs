use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::commit::CommitError;
use super::domain::{ApplicantId, ApplicationId, TripId};
use super::draft::Answers;
use super::payment::{AuthSetupError, ConfirmationError};
use super::policy::Subject;
use super::service::{IntakeError, IntakeService};

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Router exposing the applicant flow and the per-trip submission review.
pub fn intake_router(service: Arc<IntakeService>) -> Router {
    Router::new()
        .route("/api/v1/trips/:trip_id/application", get(open_handler))
        .route(
            "/api/v1/trips/:trip_id/application/advance",
            post(advance_handler),
        )
        .route(
            "/api/v1/trips/:trip_id/application/retreat",
            post(retreat_handler),
        )
        .route("/api/v1/trips/:trip_id/application/quote", get(quote_handler))
        .route(
            "/api/v1/trips/:trip_id/application/commit",
            post(commit_handler),
        )
        .route("/api/v1/trips/:trip_id/payment", post(prepare_payment_handler))
        .route(
            "/api/v1/trips/:trip_id/payment/confirm",
            post(confirm_payment_handler),
        )
        .route("/api/v1/trips/:trip_id/submissions", get(submissions_handler))
        .route(
            "/api/v1/trips/:trip_id/submissions/:application_id",
            get(submission_handler),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub answers: Answers,
}

#[derive(Debug, Deserialize)]
pub struct PaymentQuery {
    pub amount: Option<f64>,
}

pub(crate) async fn open_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.open(&subject, &trip_id).await, StatusCode::OK)
}

pub(crate) async fn advance_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
    axum::Json(request): axum::Json<AdvanceRequest>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.advance(&subject, &trip_id, request.answers).await, StatusCode::OK)
}

pub(crate) async fn retreat_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.retreat(&subject, &trip_id).await, StatusCode::OK)
}

pub(crate) async fn quote_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.quote(&subject, &trip_id).await, StatusCode::OK)
}

pub(crate) async fn prepare_payment_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
    Query(query): Query<PaymentQuery>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    let result = service
        .prepare_payment(&subject, &trip_id, query.amount)
        .await;
    respond(result, StatusCode::OK)
}

pub(crate) async fn confirm_payment_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.confirm_payment(&subject, &trip_id).await, StatusCode::CREATED)
}

pub(crate) async fn commit_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.commit(&subject, &trip_id).await, StatusCode::CREATED)
}

pub(crate) async fn submissions_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
) -> Response {
    let trip_id = TripId(trip_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    respond(service.submissions(&subject, &trip_id).await, StatusCode::OK)
}

pub(crate) async fn submission_handler(
    State(service): State<Arc<IntakeService>>,
    headers: HeaderMap,
    Path((trip_id, application_id)): Path<(String, String)>,
) -> Response {
    let trip_id = TripId(trip_id);
    let application_id = ApplicationId(application_id);
    let subject = match resolve_subject(&service, &headers).await {
        Ok(subject) => subject,
        Err(error) => return error_response(&error),
    };
    let result = service
        .submission(&subject, &trip_id, &application_id)
        .await;
    respond(result, StatusCode::OK)
}

async fn resolve_subject(
    service: &IntakeService,
    headers: &HeaderMap,
) -> Result<Subject, IntakeError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ApplicantId::from);
    service.subject_for(user_id).await
}

fn respond<T: serde::Serialize>(result: Result<T, IntakeError>, success: StatusCode) -> Response {
    match result {
        Ok(body) => (success, axum::Json(body)).into_response(),
        Err(error) => error_response(&error),
    }
}

impl IntakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IntakeError::Unauthenticated => StatusCode::UNAUTHORIZED,
            IntakeError::Forbidden(_) => StatusCode::FORBIDDEN,
            IntakeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IntakeError::FormIncomplete
            | IntakeError::AmountMismatch { .. }
            | IntakeError::MissingDraft
            | IntakeError::Busy
            | IntakeError::PaymentLocked => StatusCode::CONFLICT,
            IntakeError::AuthSetup(error) => match error {
                AuthSetupError::UnknownTotal
                | AuthSetupError::NothingToCharge
                | AuthSetupError::AlreadyPaid => StatusCode::CONFLICT,
                AuthSetupError::Gateway(_) | AuthSetupError::Malformed(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            IntakeError::Confirmation(error) => match error {
                ConfirmationError::NotReady(_) | ConfirmationError::AmountChanged { .. } => {
                    StatusCode::CONFLICT
                }
                ConfirmationError::Declined(_) => StatusCode::PAYMENT_REQUIRED,
                ConfirmationError::MissingReference(_)
                | ConfirmationError::Gateway(_)
                | ConfirmationError::Reauthorize(_) => StatusCode::BAD_GATEWAY,
            },
            IntakeError::Commit(error) => match error {
                CommitError::IncompleteDraft(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CommitError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
                CommitError::AlreadySubmitted(_) => StatusCode::CONFLICT,
                CommitError::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            IntakeError::NotFound => StatusCode::NOT_FOUND,
            IntakeError::Session(_)
            | IntakeError::Directory(_)
            | IntakeError::Store(_)
            | IntakeError::Draft(_) => StatusCode::SERVICE_UNAVAILABLE,
            IntakeError::Reconcile(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub(crate) fn error_response(error: &IntakeError) -> Response {
    let mut payload = BTreeMap::from([("error".to_string(), json!(error.to_string()))]);

    match error {
        IntakeError::Validation(validation) => {
            payload.insert("section".to_string(), json!(validation.section));
            payload.insert("violations".to_string(), json!(validation.violations));
        }
        IntakeError::Confirmation(ConfirmationError::AmountChanged {
            new_amount_minor_units,
        }) => {
            payload.insert(
                "new_amount_minor_units".to_string(),
                json!(new_amount_minor_units),
            );
        }
        IntakeError::Commit(commit) => {
            payload.insert("retryable".to_string(), json!(commit.is_retryable()));
            if let CommitError::AlreadySubmitted(existing) = commit {
                payload.insert(
                    "application_id".to_string(),
                    json!(existing.application_id),
                );
            }
            if let CommitError::IncompleteDraft(missing) = commit {
                payload.insert("missing_fields".to_string(), json!(missing));
            }
        }
        _ => {}
    }

    let body: Value = payload.into_iter().collect::<serde_json::Map<_, _>>().into();
    (error.status_code(), axum::Json(body)).into_response()
}
