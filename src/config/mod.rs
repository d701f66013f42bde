//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com/v1";
pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Supabase project URL
    pub supabase_url: String,
    /// Supabase anonymous key (used for the password grant)
    pub supabase_anon_key: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: String,
    /// Supabase JWT secret for token verification
    pub supabase_jwt_secret: String,

    /// Stripe secret API key
    pub stripe_secret_key: String,
    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,
    /// Stripe API base, overridable for local stubs
    pub stripe_api_url: String,

    /// Resend API key
    pub resend_api_key: String,
    /// Resend send-email endpoint
    pub resend_api_url: String,
    /// Sender used for every outgoing email, e.g. `Practice <hello@example.com>`
    pub email_from: String,
    /// Inbox that receives contact form notifications
    pub practice_email: String,

    /// Emails allowed into the admin panel
    pub admin_emails: Vec<String>,
    /// Shared secret the cron host sends as a bearer token
    pub cron_secret: String,

    /// Public base URL for links in emails
    pub public_base_url: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Session fee authorized at booking, in the smallest currency unit
    pub session_fee_cents: i64,
    /// Fee captured when a client does not show up
    pub no_show_fee_cents: i64,
    /// ISO currency code passed to Stripe
    pub currency: String,
    /// How far ahead appointment reminders go out
    pub reminder_window_hours: i64,
    /// Public form submissions allowed per client per minute
    pub form_rate_limit_per_minute: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            supabase_url: required("SUPABASE_URL")?,
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            supabase_service_role_key: required("SUPABASE_SERVICE_ROLE_KEY")?,
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET")?,

            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            stripe_api_url: env::var("STRIPE_API_URL")
                .unwrap_or_else(|_| DEFAULT_STRIPE_API_URL.to_string()),

            resend_api_key: required("RESEND_API_KEY")?,
            resend_api_url: env::var("RESEND_API_URL")
                .unwrap_or_else(|_| DEFAULT_RESEND_API_URL.to_string()),
            email_from: required("EMAIL_FROM")?,
            practice_email: required("PRACTICE_EMAIL")?,

            admin_emails: parse_list(&required("ADMIN_EMAILS")?),
            cron_secret: required("CRON_SECRET")?,

            public_base_url: required("PUBLIC_BASE_URL")?,
            client_origin: required("CLIENT_ORIGIN")?,

            session_fee_cents: optional("SESSION_FEE_CENTS", 15_000)?,
            no_show_fee_cents: optional("NO_SHOW_FEE_CENTS", 7_500)?,
            currency: env::var("CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            reminder_window_hours: optional("REMINDER_WINDOW_HOURS", 24)?,
            form_rate_limit_per_minute: optional("FORM_RATE_LIMIT_PER_MINUTE", 5)?,
        })
    }

    /// Whether the email belongs to a practice administrator
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim();
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }

    /// Public link that unsubscribes the holder of `token`
    pub fn unsubscribe_url(&self, token: &uuid::Uuid) -> String {
        format!(
            "{}/api/newsletter/unsubscribe?token={}",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "debug".to_string(),
        supabase_url: "http://127.0.0.1:9".to_string(),
        supabase_anon_key: "anon".to_string(),
        supabase_service_role_key: "service".to_string(),
        supabase_jwt_secret: "jwt-secret".to_string(),
        stripe_secret_key: "sk_test".to_string(),
        stripe_webhook_secret: "whsec_test".to_string(),
        stripe_api_url: DEFAULT_STRIPE_API_URL.to_string(),
        resend_api_key: "re_test".to_string(),
        resend_api_url: DEFAULT_RESEND_API_URL.to_string(),
        email_from: "Practice <hello@example.com>".to_string(),
        practice_email: "office@example.com".to_string(),
        admin_emails: vec!["Admin@Example.com".to_string()],
        cron_secret: "cron-secret".to_string(),
        public_base_url: "https://practice.example.com/".to_string(),
        client_origin: "https://practice.example.com".to_string(),
        session_fee_cents: 15_000,
        no_show_fee_cents: 7_500,
        currency: "usd".to_string(),
        reminder_window_hours: 24,
        form_rate_limit_per_minute: 3,
    }
}
