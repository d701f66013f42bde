//! Stripe webhook handler with signature verification

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::store::appointments::{Appointment, AppointmentStatus, PaymentStatus};
use crate::store::supabase::SupabaseError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed event, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Handle Stripe webhook events
pub async fn stripe_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    // Get the Stripe-Signature header
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    // Get the raw body as string for verification
    let payload = std::str::from_utf8(&body).map_err(|_| WebhookError::InvalidPayload)?;

    verify_stripe_signature(
        payload,
        signature,
        &state.config.stripe_webhook_secret,
        chrono::Utc::now().timestamp(),
    )?;

    // Parse the event
    let event: StripeEvent = serde_json::from_str(payload).map_err(|e| {
        error!(error = %e, "Failed to parse Stripe event");
        WebhookError::InvalidPayload
    })?;

    info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    match payment_status_for_event(&event.event_type) {
        Some(target) => {
            let intent: PaymentIntentData = serde_json::from_value(event.data.object)
                .map_err(|e| {
                    error!(error = %e, "Event object is not a PaymentIntent");
                    WebhookError::InvalidPayload
                })?;
            apply_payment_event(&state, &intent, target).await?;
        }
        None => {
            info!(event_type = %event.event_type, "Unhandled event type");
        }
    }

    Ok(StatusCode::OK)
}

/// Verify a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`)
pub fn verify_stripe_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now: i64,
) -> Result<(), WebhookError> {
    // Parse signature header
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        if let (Some(key), Some(value)) = (kv.next(), kv.next()) {
            match key {
                "t" => timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }

    // Create signed payload
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(signed_payload.as_bytes());

    // Check if any signature matches, in constant time
    let valid = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !valid {
        return Err(WebhookError::InvalidSignature);
    }

    let ts: i64 = timestamp.parse().map_err(|_| WebhookError::InvalidSignature)?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        warn!(timestamp = ts, "Webhook timestamp outside tolerance");
        return Err(WebhookError::StaleTimestamp);
    }

    Ok(())
}

/// Payment status an event moves an appointment to
fn payment_status_for_event(event_type: &str) -> Option<PaymentStatus> {
    match event_type {
        "payment_intent.amount_capturable_updated" => Some(PaymentStatus::Authorized),
        "payment_intent.succeeded" => Some(PaymentStatus::Captured),
        "payment_intent.payment_failed" => Some(PaymentStatus::Failed),
        "payment_intent.canceled" => Some(PaymentStatus::Canceled),
        _ => None,
    }
}

/// What to do with an event given the appointment's current state
#[derive(Debug, PartialEq, Eq)]
enum EventDecision {
    Apply(PaymentStatus),
    AlreadyApplied,
    Ignore,
}

fn decide(
    appointment: AppointmentStatus,
    current: PaymentStatus,
    event: PaymentStatus,
) -> EventDecision {
    // Money taken from a missed session is the no-show fee, never a full capture
    let target = match (appointment, event) {
        (AppointmentStatus::NoShow, PaymentStatus::Captured) => PaymentStatus::NoShowCharged,
        _ => event,
    };

    if current == target {
        return EventDecision::AlreadyApplied;
    }
    // A partial no-show capture also reports `succeeded`
    if current == PaymentStatus::NoShowCharged && target == PaymentStatus::Captured {
        return EventDecision::AlreadyApplied;
    }
    if current.is_terminal() {
        return EventDecision::Ignore;
    }
    if current.can_transition_to(target) {
        EventDecision::Apply(target)
    } else {
        EventDecision::Ignore
    }
}

async fn find_appointment(
    state: &AppState,
    intent: &PaymentIntentData,
) -> Result<Option<Appointment>, SupabaseError> {
    let by_metadata = intent
        .metadata
        .get("appointment_id")
        .and_then(|s| s.parse::<Uuid>().ok());

    if let Some(id) = by_metadata {
        if let Some(appointment) = state.appointment_store.get(id).await? {
            return Ok(Some(appointment));
        }
    }

    state
        .appointment_store
        .find_by_payment_intent(&intent.id)
        .await
}

async fn apply_payment_event(
    state: &AppState,
    intent: &PaymentIntentData,
    event_status: PaymentStatus,
) -> Result<(), WebhookError> {
    let Some(appointment) = find_appointment(state, intent).await? else {
        warn!(payment_intent_id = %intent.id, "No appointment for payment intent");
        return Ok(());
    };

    match decide(appointment.status, appointment.payment_status, event_status) {
        EventDecision::AlreadyApplied => {
            info!(
                appointment_id = %appointment.id,
                status = event_status.as_str(),
                "Payment event already applied (idempotent)"
            );
        }
        EventDecision::Ignore => {
            warn!(
                appointment_id = %appointment.id,
                from = appointment.payment_status.as_str(),
                to = event_status.as_str(),
                "Ignoring payment event that does not fit current state"
            );
        }
        EventDecision::Apply(target) => {
            let moved = state
                .appointment_store
                .transition_payment(appointment.id, appointment.payment_status, target)
                .await?;
            info!(
                appointment_id = %appointment.id,
                payment_intent_id = %intent.id,
                status = target.as_str(),
                moved,
                "Payment status updated from webhook"
            );
        }
    }

    Ok(())
}

// ============================================================================
// Stripe Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentData {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Invalid request payload")]
    InvalidPayload,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("Database error: {0}")]
    Database(#[from] SupabaseError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            WebhookError::MissingSignature => StatusCode::BAD_REQUEST,
            WebhookError::InvalidPayload => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::StaleTimestamp => StatusCode::UNAUTHORIZED,
            WebhookError::Database(e) => {
                error!(error = %e, "Webhook processing failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}

/// Build a valid `Stripe-Signature` header for a payload
#[cfg(test)]
pub(crate) fn sign_for_tests(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn valid_signature_passes() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign_for_tests(payload, SECRET, NOW);
        assert_ok!(verify_stripe_signature(payload, &header, SECRET, NOW + 10));
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let payload = "{}";
        let good = sign_for_tests(payload, SECRET, NOW);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v0=abc,v1={}", NOW, good_sig);
        assert_ok!(verify_stripe_signature(payload, &header, SECRET, NOW));
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign_for_tests(r#"{"amount":1}"#, SECRET, NOW);
        let result = verify_stripe_signature(r#"{"amount":2}"#, &header, SECRET, NOW);
        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[test]
    fn wrong_secret_fails() {
        let header = sign_for_tests("{}", "other", NOW);
        assert_err!(verify_stripe_signature("{}", &header, SECRET, NOW));
    }

    #[test]
    fn stale_event_fails() {
        let header = sign_for_tests("{}", SECRET, NOW);
        let result = verify_stripe_signature("{}", &header, SECRET, NOW + SIGNATURE_TOLERANCE_SECS + 1);
        assert!(matches!(result, Err(WebhookError::StaleTimestamp)));
    }

    #[test]
    fn malformed_headers_fail() {
        for header in ["", "t=123", "v1=abc", "garbage", "t=abc,v1=zz"] {
            assert_err!(verify_stripe_signature("{}", header, SECRET, NOW));
        }
    }

    #[test]
    fn event_mapping() {
        assert_eq!(
            payment_status_for_event("payment_intent.amount_capturable_updated"),
            Some(PaymentStatus::Authorized)
        );
        assert_eq!(
            payment_status_for_event("payment_intent.canceled"),
            Some(PaymentStatus::Canceled)
        );
        assert_eq!(payment_status_for_event("charge.refunded"), None);
    }

    #[test]
    fn decisions_are_idempotent() {
        use PaymentStatus::*;
        let scheduled = AppointmentStatus::Scheduled;
        let completed = AppointmentStatus::Completed;
        assert_eq!(decide(scheduled, Pending, Authorized), EventDecision::Apply(Authorized));
        assert_eq!(decide(scheduled, Authorized, Authorized), EventDecision::AlreadyApplied);
        assert_eq!(decide(completed, Authorized, Captured), EventDecision::Apply(Captured));
        assert_eq!(decide(completed, NoShowCharged, Captured), EventDecision::AlreadyApplied);
        assert_eq!(decide(completed, Captured, Failed), EventDecision::Ignore);
        assert_eq!(decide(scheduled, Canceled, Authorized), EventDecision::Ignore);
    }

    #[test]
    fn capture_on_missed_session_records_the_fee() {
        use PaymentStatus::*;
        let no_show = AppointmentStatus::NoShow;
        // succeeded lands before the fee job writes its own status
        assert_eq!(decide(no_show, Authorized, Captured), EventDecision::Apply(NoShowCharged));
        assert_eq!(decide(no_show, NoShowCharged, Captured), EventDecision::AlreadyApplied);
        assert_eq!(decide(no_show, Authorized, Canceled), EventDecision::Apply(Canceled));
    }

    mod events {
        use axum::body::Body;
        use axum::http::{Method, Request};
        use serde_json::json;
        use tower::ServiceExt;

        use super::*;
        use crate::http::build_router;
        use crate::test_support::{appointment_row, json as reply, Stub, StubRequest};

        const APPOINTMENTS: &str = "/rest/v1/appointments";
        const APPOINTMENT_ID: &str = "33333333-3333-3333-3333-333333333333";

        async fn stub(status: &'static str, payment_status: &'static str) -> Stub {
            Stub::start(move |req: &StubRequest| {
                if req.is(Method::GET, APPOINTMENTS) && req.param("id").is_some() {
                    reply(appointment_row(status, payment_status))
                } else if req.is(Method::GET, APPOINTMENTS) {
                    reply(json!([appointment_row(status, payment_status)]))
                } else if req.is(Method::PATCH, APPOINTMENTS) {
                    reply(json!([appointment_row(status, payment_status)]))
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            })
            .await
        }

        async fn deliver(stub: &Stub, event_type: &str, intent: serde_json::Value) -> StatusCode {
            let payload = json!({
                "id": "evt_1",
                "type": event_type,
                "data": { "object": intent }
            })
            .to_string();
            let request = Request::builder()
                .method(Method::POST)
                .uri("/api/stripe/webhook")
                .header(
                    "Stripe-Signature",
                    sign_for_tests(&payload, SECRET, chrono::Utc::now().timestamp()),
                )
                .body(Body::from(payload))
                .unwrap();
            build_router(AppState::new(stub.config()))
                .oneshot(request)
                .await
                .unwrap()
                .status()
        }

        #[tokio::test]
        async fn authorization_moves_pending_to_authorized() {
            let stub = stub("scheduled", "pending").await;
            let status = deliver(
                &stub,
                "payment_intent.amount_capturable_updated",
                json!({ "id": "pi_123", "metadata": { "appointment_id": APPOINTMENT_ID } }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);

            let patch = &stub.matching(Method::PATCH, APPOINTMENTS)[0];
            assert_eq!(patch.json()["payment_status"], "authorized");
            assert_eq!(patch.param("payment_status"), Some("eq.pending"));
            assert_eq!(patch.param("id"), Some(format!("eq.{}", APPOINTMENT_ID).as_str()));
        }

        #[tokio::test]
        async fn intent_id_is_used_when_metadata_is_missing() {
            let stub = stub("scheduled", "pending").await;
            let status = deliver(
                &stub,
                "payment_intent.amount_capturable_updated",
                json!({ "id": "pi_123" }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);

            let lookup = &stub.matching(Method::GET, APPOINTMENTS)[0];
            assert_eq!(lookup.param("stripe_payment_intent"), Some("eq.pi_123"));
            assert_eq!(stub.matching(Method::PATCH, APPOINTMENTS).len(), 1);
        }

        #[tokio::test]
        async fn capture_of_missed_session_is_stored_as_fee() {
            let stub = stub("no_show", "authorized").await;
            let status = deliver(
                &stub,
                "payment_intent.succeeded",
                json!({ "id": "pi_123", "metadata": { "appointment_id": APPOINTMENT_ID } }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);

            let patch = &stub.matching(Method::PATCH, APPOINTMENTS)[0];
            assert_eq!(patch.json()["payment_status"], "no_show_charged");
        }

        #[tokio::test]
        async fn replayed_event_writes_nothing() {
            let stub = stub("completed", "captured").await;
            let status = deliver(
                &stub,
                "payment_intent.succeeded",
                json!({ "id": "pi_123", "metadata": { "appointment_id": APPOINTMENT_ID } }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert!(stub.matching(Method::PATCH, APPOINTMENTS).is_empty());
        }
    }
}
