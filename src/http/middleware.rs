//! Admin and cron authentication middleware

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::{TypedHeaderRejection, TypedHeaderRejectionReason},
    TypedHeader,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::error::AppError;
use crate::util::rate_limit::client_key;

type HmacSha256 = Hmac<Sha256>;

/// Admin paths reachable without a session
pub const PUBLIC_ADMIN_PATHS: &[&str] = &["/api/admin/login"];

pub fn is_public_admin_path(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    PUBLIC_ADMIN_PATHS.contains(&path)
}

/// JWT claims from Supabase auth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Audience
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Email (if available)
    #[serde(default)]
    pub email: Option<String>,
    /// Role
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Deserialize)]
struct JwtHeader {
    alg: String,
}

/// Verify an HS256 JWT and extract claims
pub fn verify_jwt(token: &str, secret: &str, now: i64) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let header: JwtHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(AuthError::InvalidToken)?;
    if header.alg != "HS256" {
        return Err(AuthError::InvalidToken);
    }

    // Verify signature (HMAC-SHA256)
    let message = format!("{}.{}", header_b64, payload_b64);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(message.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

type BearerHeader = Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>;

/// Bearer credentials from the Authorization header
fn bearer(header: BearerHeader) -> Result<Bearer, AuthError> {
    match header {
        Ok(TypedHeader(Authorization(bearer))) => Ok(bearer),
        Err(rejection) if matches!(rejection.reason(), TypedHeaderRejectionReason::Missing) => {
            Err(AuthError::MissingHeader)
        }
        Err(_) => Err(AuthError::InvalidFormat),
    }
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Admin access required")]
    NotAdmin,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingHeader => StatusCode::UNAUTHORIZED,
            AuthError::InvalidFormat => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthError::NotAdmin => StatusCode::FORBIDDEN,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Admin identity attached to request extensions
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub user_id: Uuid,
    pub email: String,
}

/// Middleware guarding the admin panel API
pub async fn require_admin(
    State(state): State<AppState>,
    header: BearerHeader,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if is_public_admin_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let token = bearer(header)?;

    let claims = verify_jwt(
        token.token(),
        &state.config.supabase_jwt_secret,
        chrono::Utc::now().timestamp(),
    )?;

    let email = claims.email.clone().unwrap_or_default();
    if !state.config.is_admin_email(&email) {
        warn!(user_id = %claims.sub, "Non-admin user attempted admin access");
        return Err(AuthError::NotAdmin);
    }

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(AdminUser {
        user_id: claims.sub,
        email,
    });

    Ok(next.run(request).await)
}

/// Middleware guarding cron endpoints with the shared secret
pub async fn require_cron(
    State(state): State<AppState>,
    header: BearerHeader,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let secret = bearer(header)?;

    if !constant_time_eq(secret.token().as_bytes(), state.config.cron_secret.as_bytes()) {
        warn!(path = %request.uri().path(), "Rejected cron call with bad secret");
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

/// Middleware applying the per-client quota to public forms
pub async fn require_form_quota(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_key(request.headers());
    if !state.form_limiter.check(&client) {
        warn!(client = %client, path = %request.uri().path(), "Form rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }

    Ok(next.run(request).await)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Mint an HS256 token the way Supabase does
#[cfg(test)]
pub(crate) fn sign_jwt_for_tests(claims: &serde_json::Value, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}
