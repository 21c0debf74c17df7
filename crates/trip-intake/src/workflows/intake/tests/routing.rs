use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;

use crate::workflows::intake::router::USER_ID_HEADER;

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn open_without_a_user_is_unauthorized() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(get("/api/v1/trips/sierra-2025/application", None))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "sign in to continue");
}

#[tokio::test]
async fn invalid_section_returns_violations() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/application/advance",
            Some(APPLICANT),
            json!({ "answers": { "first_name": "Ada" } }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["section"], "personal");
    let violations = payload["violations"].as_array().expect("violations list");
    assert!(violations
        .iter()
        .any(|violation| violation["field"] == "last_name"));
}

#[tokio::test]
async fn full_flow_over_http_redirects_to_the_trip() {
    let harness = harness();

    let response = harness
        .router()
        .oneshot(get("/api/v1/trips/sierra-2025/application", Some(APPLICANT)))
        .await
        .expect("open");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["progress"]["label"], "Step 1 of 3");

    let mut last = Value::Null;
    for index in 0..harness.schema().len() {
        let answers = section_answers(harness.schema(), index, "yes");
        let response = harness
            .router()
            .oneshot(post(
                "/api/v1/trips/sierra-2025/application/advance",
                Some(APPLICANT),
                json!({ "answers": answers }),
            ))
            .await
            .expect("advance");
        assert_eq!(response.status(), StatusCode::OK);
        last = read_json_body(response).await;
    }
    assert_eq!(last["outcome"], "complete");
    assert_eq!(last["quote"]["total"], 550.0);
    assert_eq!(
        last["payment_path"],
        "/api/v1/trips/sierra-2025/payment?amount=550"
    );

    let response = harness
        .router()
        .oneshot(get(
            "/api/v1/trips/sierra-2025/application/quote",
            Some(APPLICANT),
        ))
        .await
        .expect("quote");
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/payment?amount=550",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("prepare payment");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["amount_minor_units"], 55_000);
    assert_eq!(payload["client_secret"], "pi_1_secret");

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/payment/confirm",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("confirm payment");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["redirect_to"], "/trips/sierra-2025");
    assert_eq!(payload["record"]["paid"], true);
    assert_eq!(payload["record"]["payment"]["reference"], "ch_pi_1");
}

#[tokio::test]
async fn stale_amount_is_a_conflict() {
    let harness = harness();
    harness.complete_form("yes").await;

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/payment?amount=400",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(harness.gateway.authorized_amounts().is_empty());
}

#[tokio::test]
async fn declined_card_is_payment_required() {
    let harness = harness();
    harness.complete_form("no").await;
    harness
        .gateway
        .queue_confirmation(Ok(declined(Some("Your card was declined."))));
    harness
        .service
        .prepare_payment(&participant(), &trip(), None)
        .await
        .expect("authorization");

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/payment/confirm",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "Your card was declined.");
}

#[tokio::test]
async fn failed_write_is_retryable_over_http() {
    let harness = harness();
    harness.complete_form("no").await;
    harness
        .service
        .prepare_payment(&participant(), &trip(), None)
        .await
        .expect("authorization");
    harness.store.fail_next_inserts(1);

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/payment/confirm",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let payload = read_json_body(response).await;
    assert_eq!(payload["retryable"], true);

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/application/retreat",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = harness
        .router()
        .oneshot(post(
            "/api/v1/trips/sierra-2025/application/commit",
            Some(APPLICANT),
            Value::Null,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(harness.store.records().len(), 1);
}

#[tokio::test]
async fn participants_cannot_list_submissions() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(get("/api/v1/trips/sierra-2025/submissions", Some(APPLICANT)))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admins_can_open_a_submission() {
    let harness = harness();
    harness.directory.set_capacity("admin-1", "admin");
    harness.complete_form("no").await;
    harness
        .service
        .prepare_payment(&participant(), &trip(), None)
        .await
        .expect("authorization");
    let submission = harness
        .service
        .confirm_payment(&participant(), &trip())
        .await
        .expect("submitted");

    let uri = format!(
        "/api/v1/trips/sierra-2025/submissions/{}",
        submission.record.application_id
    );
    let response = harness
        .router()
        .oneshot(get(&uri, Some("admin-1")))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["applicant_id"], APPLICANT);
    assert_eq!(payload["answers"]["needs_rental_gear"], "no");
}
