//! Supabase REST API client using service_role key

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;

/// Query parameters for a PostgREST request, e.g. `[("id", "eq.42".into())]`
pub type Query<'a> = [(&'a str, String)];

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            service_role_key: config.supabase_service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach service role credentials
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
    ) -> Result<Vec<T>, SupabaseError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)))
            .query(query)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// Make an authenticated GET request expecting a single row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
    ) -> Result<Option<T>, SupabaseError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)))
            .header("Accept", "application/vnd.pgrst.object+json")
            .query(query)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        if response.status() == StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        let response = check_status(response).await?;
        response.json().await.map(Some).map_err(SupabaseError::Parse)
    }

    /// Count rows matching a filter without fetching them
    pub async fn count(&self, table: &str, query: &Query<'_>) -> Result<u64, SupabaseError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)))
            .header("Prefer", "count=exact")
            .header("Range-Unit", "items")
            .header("Range", "0-0")
            .query(&[("select", "id")])
            .query(query)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        // An empty table answers 416 for a 0-0 range but still carries the total
        let status = response.status();
        if !status.is_success() && status != StatusCode::RANGE_NOT_SATISFIABLE {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body));
        }

        response
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or(SupabaseError::MissingCount)
    }

    /// Make an authenticated POST request (insert)
    pub async fn insert<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;

        // PostgREST returns an array, get first element
        let results: Vec<R> = response.json().await.map_err(SupabaseError::Parse)?;
        results
            .into_iter()
            .next()
            .ok_or(SupabaseError::NoRowReturned)
    }

    /// Make an authenticated PATCH request (update)
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &Query<'_>,
        data: &T,
    ) -> Result<(), SupabaseError> {
        let response = self
            .authed(self.client.patch(self.rest_url(table)))
            .query(query)
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        check_status(response).await?;
        Ok(())
    }

    /// PATCH and return the updated rows
    pub async fn update_returning<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
        data: &T,
    ) -> Result<Vec<R>, SupabaseError> {
        let response = self
            .authed(self.client.patch(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(query)
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// Upsert (insert or update on conflict)
    pub async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", on_conflict)])
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        check_status(response).await?;
        Ok(())
    }

    /// Delete matching rows, returning how many were removed
    pub async fn delete(&self, table: &str, query: &Query<'_>) -> Result<usize, SupabaseError> {
        let response = self
            .authed(self.client.delete(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&[("select", "id")])
            .query(query)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        let rows: Vec<serde_json::Value> = response.json().await.map_err(SupabaseError::Parse)?;
        Ok(rows.len())
    }

    /// Exchange email and password for a session via Supabase Auth
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, SupabaseError> {
        #[derive(Serialize)]
        struct PasswordGrant<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(SupabaseError::InvalidCredentials);
        }

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }
}

/// Session returned by the password grant
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub expires_in: u64,
}

async fn check_status(response: Response) -> Result<Response, SupabaseError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, body))
}

fn api_error(status: StatusCode, body: String) -> SupabaseError {
    // 23505 = unique_violation
    if status == StatusCode::CONFLICT || body.contains("\"23505\"") {
        return SupabaseError::Conflict(body);
    }
    SupabaseError::Api {
        status: status.as_u16(),
        body,
    }
}

/// Parse the total out of a `Content-Range` header such as `0-24/573` or `*/0`
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Build an `eq.` filter value
pub fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,

    #[error("Count missing from response")]
    MissingCount,

    #[error("Invalid login credentials")]
    InvalidCredentials,
}
