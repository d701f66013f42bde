//! Resend transactional email client

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::store::templates::EmailTemplate;

use super::template::{render, TemplateVars};

/// Outgoing email
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            html: html.into(),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Build from a stored template. Subjects are plain text so values go in
    /// unescaped; bodies are HTML.
    pub fn from_template(template: &EmailTemplate, to: impl Into<String>, vars: &TemplateVars) -> Self {
        Self::new(
            to,
            render(&template.subject, vars, false),
            render(&template.html_body, vars, true),
        )
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    email: &'a OutgoingEmail,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Resend API client
#[derive(Clone)]
pub struct EmailClient {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_url: config.resend_api_url.clone(),
            api_key: config.resend_api_key.clone(),
            from: config.email_from.clone(),
        }
    }

    /// Send an email, returning the Resend message id
    pub async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                from: &self.from,
                email,
            })
            .send()
            .await
            .map_err(EmailError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response.json().await.map_err(EmailError::Request)?;
        info!(email_id = %sent.id, to = ?email.to, "Email sent");
        Ok(sent.id)
    }

    /// Render a stored template and send it
    pub async fn send_template(
        &self,
        template: &EmailTemplate,
        to: &str,
        vars: &TemplateVars,
    ) -> Result<String, EmailError> {
        self.send(&OutgoingEmail::from_template(template, to, vars))
            .await
    }
}

/// Email delivery errors
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Resend API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

impl EmailError {
    /// Rejected in a way that resending the same message will not fix
    pub fn is_permanent(&self) -> bool {
        match self {
            EmailError::Api { status, .. } => (400..500).contains(status) && *status != 429,
            EmailError::Request(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn request_body_shape() {
        let email = OutgoingEmail::new("a@b.co", "Hello", "<p>Hi</p>").reply_to("me@b.co");
        let body = serde_json::to_value(SendRequest {
            from: "Practice <hello@example.com>",
            email: &email,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "from": "Practice <hello@example.com>",
                "to": ["a@b.co"],
                "subject": "Hello",
                "html": "<p>Hi</p>",
                "reply_to": "me@b.co"
            })
        );
    }

    #[test]
    fn client_errors_are_permanent_except_throttling() {
        let api = |status| EmailError::Api {
            status,
            body: String::new(),
        };
        assert!(api(422).is_permanent());
        assert!(api(403).is_permanent());
        assert!(!api(429).is_permanent());
        assert!(!api(500).is_permanent());
    }

    #[test]
    fn reply_to_is_omitted_when_unset() {
        let email = OutgoingEmail::new("a@b.co", "s", "h");
        let body = serde_json::to_value(&email).unwrap();
        assert!(body.get("reply_to").is_none());
    }

    #[test]
    fn template_subject_is_not_escaped() {
        let template = EmailTemplate {
            id: Uuid::nil(),
            slug: "welcome".into(),
            subject: "Welcome, {{name}}".into(),
            html_body: "<p>Hello {{name}}</p>".into(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let mut vars = TemplateVars::new();
        vars.insert("name", "Tom & Jerry".to_string());

        let email = OutgoingEmail::from_template(&template, "t@j.co", &vars);
        assert_eq!(email.subject, "Welcome, Tom & Jerry");
        assert_eq!(email.html, "<p>Hello Tom &amp; Jerry</p>");
        assert_eq!(email.to, vec!["t@j.co".to_string()]);
    }
}
