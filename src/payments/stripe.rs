//! Stripe PaymentIntent operations for appointment fees

use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;

/// Stripe service for payment operations
#[derive(Clone)]
pub struct StripeService {
    client: Client,
    api_url: String,
    stripe_secret_key: String,
    currency: String,
}

impl StripeService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_url: config.stripe_api_url.trim_end_matches('/').to_string(),
            stripe_secret_key: config.stripe_secret_key.clone(),
            currency: config.currency.clone(),
        }
    }

    /// Authorize (but do not capture) the session fee for an appointment
    pub async fn create_payment_intent(
        &self,
        appointment_id: Uuid,
        amount_cents: i64,
        receipt_email: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let form_data = payment_intent_form(appointment_id, amount_cents, &self.currency, receipt_email);
        self.post_form("payment_intents", &form_data).await
    }

    /// Capture an authorized intent, optionally only part of it
    pub async fn capture(
        &self,
        payment_intent_id: &str,
        amount_to_capture: Option<i64>,
    ) -> Result<PaymentIntent, StripeError> {
        let mut form_data: Vec<(&str, String)> = Vec::new();
        if let Some(amount) = amount_to_capture {
            form_data.push(("amount_to_capture", amount.to_string()));
        }
        self.post_form(&format!("payment_intents/{}/capture", payment_intent_id), &form_data)
            .await
    }

    /// Release an uncaptured authorization
    pub async fn cancel(&self, payment_intent_id: &str) -> Result<PaymentIntent, StripeError> {
        let form_data = [("cancellation_reason", "requested_by_customer".to_string())];
        self.post_form(&format!("payment_intents/{}/cancel", payment_intent_id), &form_data)
            .await
    }

    async fn post_form(
        &self,
        path: &str,
        form_data: &[(&str, String)],
    ) -> Result<PaymentIntent, StripeError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_url, path))
            .basic_auth(&self.stripe_secret_key, None::<&str>)
            .form(form_data)
            .send()
            .await
            .map_err(StripeError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StripeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(StripeError::Request)
    }
}

fn payment_intent_form(
    appointment_id: Uuid,
    amount_cents: i64,
    currency: &str,
    receipt_email: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("amount", amount_cents.to_string()),
        ("currency", currency.to_string()),
        ("capture_method", "manual".to_string()),
        ("receipt_email", receipt_email.to_string()),
        ("automatic_payment_methods[enabled]", "true".to_string()),
        ("metadata[appointment_id]", appointment_id.to_string()),
    ]
}

/// Subset of the Stripe PaymentIntent object we rely on
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub amount: i64,
}

/// Stripe-related errors
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Stripe API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("No client secret returned")]
    NoClientSecret,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_is_manual_capture_with_appointment_metadata() {
        let id = Uuid::nil();
        let form = payment_intent_form(id, 15_000, "usd", "c@x.co");
        assert!(form.contains(&("capture_method", "manual".to_string())));
        assert!(form.contains(&("amount", "15000".to_string())));
        assert!(form.contains(&("metadata[appointment_id]", id.to_string())));
    }

    #[test]
    fn intent_parses_with_missing_optional_fields() {
        let intent: PaymentIntent =
            serde_json::from_str(r#"{"id":"pi_1","status":"requires_capture"}"#).unwrap();
        assert_eq!(intent.id, "pi_1");
        assert!(intent.client_secret.is_none());
        assert_eq!(intent.amount, 0);
    }
}
