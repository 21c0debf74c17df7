use std::sync::Arc;

use super::common::*;

use crate::workflows::intake::payment::{FailureKind, PaymentOrchestrator};
use crate::workflows::intake::{
    AuthSetupError, AuthorizationResponse, Checkout, CheckoutPhase, ConfirmationError, FeeQuote,
    GatewayError, IntakeError,
};

fn quote(total: f64) -> FeeQuote {
    FeeQuote {
        trip_id: trip(),
        base_fee: Some(total),
        add_on_fee: 0.0,
        total: Some(total),
    }
}

fn orchestrator() -> (PaymentOrchestrator, Arc<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::default());
    (PaymentOrchestrator::new(gateway.clone()), gateway)
}

#[tokio::test]
async fn prepare_reuses_an_authorization_for_the_same_amount() {
    let (payments, gateway) = orchestrator();
    let mut checkout = Checkout::default();

    let first = payments
        .prepare(&mut checkout, &quote(550.0))
        .await
        .expect("first authorization");
    let second = payments
        .prepare(&mut checkout, &quote(550.0))
        .await
        .expect("reused authorization");

    assert_eq!(first, second);
    assert_eq!(gateway.authorized_amounts(), vec![55_000]);
    assert_eq!(checkout.phase().label(), "ready");
}

#[tokio::test]
async fn changed_total_discards_the_previous_authorization() {
    let (payments, gateway) = orchestrator();
    let mut checkout = Checkout::default();

    payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect("initial authorization");
    let renewed = payments
        .prepare(&mut checkout, &quote(550.0))
        .await
        .expect("renewed authorization");

    assert_eq!(renewed.amount_minor_units, 55_000);
    assert_eq!(gateway.authorized_amounts(), vec![40_000, 55_000]);
    assert_eq!(
        checkout.phase().authorization().map(|auth| auth.handle.as_str()),
        Some("pi_2")
    );
}

#[tokio::test]
async fn malformed_authorization_fails_setup() {
    let (payments, gateway) = orchestrator();
    gateway.queue_authorization(Ok(AuthorizationResponse {
        handle: Some("pi_9".to_string()),
        client_secret: None,
    }));
    let mut checkout = Checkout::default();

    let error = payments
        .prepare(&mut checkout, &quote(550.0))
        .await
        .expect_err("missing client secret");

    assert!(matches!(error, AuthSetupError::Malformed("client secret")));
    match checkout.phase() {
        CheckoutPhase::Failed {
            failure,
            authorization,
        } => {
            assert_eq!(failure.kind, FailureKind::AuthSetup);
            assert!(authorization.is_none());
        }
        other => panic!("expected failed checkout, got {other:?}"),
    }
}

#[tokio::test]
async fn gateway_outage_during_setup_is_reported() {
    let (payments, gateway) = orchestrator();
    gateway.queue_authorization(Err(GatewayError::Unavailable("503".to_string())));
    let mut checkout = Checkout::default();

    let error = payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect_err("gateway down");
    assert!(matches!(error, AuthSetupError::Gateway(_)));
    assert_eq!(checkout.phase().label(), "failed");
}

#[tokio::test]
async fn confirm_requires_a_ready_checkout() {
    let (payments, gateway) = orchestrator();
    let mut checkout = Checkout::default();

    let error = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect_err("nothing to confirm");
    assert!(matches!(error, ConfirmationError::NotReady("idle")));
    assert_eq!(gateway.confirm_calls(), 0);
}

#[tokio::test]
async fn succeeded_checkout_always_carries_a_reference() {
    let (payments, gateway) = orchestrator();
    let mut checkout = Checkout::default();
    payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect("authorization");

    let reference = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect("payment succeeds");
    assert_eq!(reference.as_str(), "ch_pi_1");
    assert!(matches!(
        checkout.phase(),
        CheckoutPhase::Succeeded { reference, .. } if reference.as_str() == "ch_pi_1"
    ));

    let again = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect("terminal state replays its reference");
    assert_eq!(again, reference);
    assert_eq!(gateway.confirm_calls(), 1);
}

#[tokio::test]
async fn success_without_reference_is_an_anomaly() {
    let (payments, gateway) = orchestrator();
    gateway.queue_confirmation(Ok(succeeded_without_reference()));
    let mut checkout = Checkout::default();
    payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect("authorization");

    let error = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect_err("no reference");

    assert!(matches!(
        error,
        ConfirmationError::MissingReference("succeeded")
    ));
    assert!(checkout.reference().is_none());
    match checkout.phase() {
        CheckoutPhase::Failed {
            failure,
            authorization,
        } => {
            assert_eq!(failure.kind, FailureKind::Anomaly);
            assert!(authorization.is_none());
        }
        other => panic!("expected anomaly, got {other:?}"),
    }
}

#[tokio::test]
async fn decline_keeps_the_authorization_for_retry() {
    let (payments, gateway) = orchestrator();
    gateway.queue_confirmation(Ok(declined(None)));
    let mut checkout = Checkout::default();
    payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect("authorization");

    let error = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect_err("card declined");
    match &error {
        ConfirmationError::Declined(message) => {
            assert_eq!(message, "Payment could not be completed. Please try again.");
        }
        other => panic!("expected decline, got {other:?}"),
    }
    assert!(checkout.phase().authorization().is_some());

    let reference = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect("retry succeeds");
    assert_eq!(reference.as_str(), "ch_pi_1");
    assert_eq!(gateway.authorized_amounts().len(), 1);
    assert_eq!(gateway.confirm_calls(), 2);
}

#[tokio::test]
async fn gateway_decline_message_is_surfaced() {
    let (payments, gateway) = orchestrator();
    gateway.queue_confirmation(Ok(declined(Some("Your card has insufficient funds."))));
    let mut checkout = Checkout::default();
    payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect("authorization");

    let error = payments
        .confirm(&mut checkout, &quote(400.0))
        .await
        .expect_err("declined");
    assert_eq!(error.to_string(), "Your card has insufficient funds.");
}

#[tokio::test]
async fn changed_total_at_confirm_reauthorizes_without_charging() {
    let (payments, gateway) = orchestrator();
    let mut checkout = Checkout::default();
    payments
        .prepare(&mut checkout, &quote(400.0))
        .await
        .expect("authorization");

    let error = payments
        .confirm(&mut checkout, &quote(550.0))
        .await
        .expect_err("amount changed");

    assert!(matches!(
        error,
        ConfirmationError::AmountChanged {
            new_amount_minor_units: 55_000
        }
    ));
    assert_eq!(gateway.confirm_calls(), 0);
    assert_eq!(
        checkout
            .phase()
            .authorization()
            .map(|auth| auth.amount_minor_units),
        Some(55_000)
    );
}

#[tokio::test]
async fn missing_reference_never_reaches_the_store() {
    let harness = harness();
    harness.complete_form("no").await;
    harness
        .gateway
        .queue_confirmation(Ok(succeeded_without_reference()));
    harness
        .service
        .prepare_payment(&participant(), &trip(), Some(400.0))
        .await
        .expect("authorization");

    let error = harness
        .service
        .confirm_payment(&participant(), &trip())
        .await
        .expect_err("anomaly halts the flow");

    assert!(matches!(
        error,
        IntakeError::Confirmation(ConfirmationError::MissingReference(_))
    ));
    assert_eq!(harness.store.insert_attempts(), 0);
    assert!(harness.drafts.contains(&draft_key()));
}
