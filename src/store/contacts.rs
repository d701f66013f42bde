//! Contact form submissions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page::{Page, Paged};
use super::supabase::{eq, SupabaseClient, SupabaseError};

const TABLE: &str = "contact_submissions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    New,
    Read,
    Replied,
    Archived,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::New => "new",
            ContactStatus::Read => "read",
            ContactStatus::Replied => "replied",
            ContactStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub status: ContactStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewContactSubmission {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub status: ContactStatus,
}

#[derive(Clone)]
pub struct ContactStore {
    client: SupabaseClient,
}

impl ContactStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn create(
        &self,
        name: String,
        email: String,
        phone: Option<String>,
        message: String,
    ) -> Result<ContactSubmission, SupabaseError> {
        let submission = NewContactSubmission {
            id: Uuid::new_v4(),
            name,
            email,
            phone,
            message,
            status: ContactStatus::New,
        };
        self.client.insert(TABLE, &submission).await
    }

    pub async fn list(
        &self,
        page: Page,
        status: Option<ContactStatus>,
    ) -> Result<Paged<ContactSubmission>, SupabaseError> {
        let mut filter = Vec::new();
        if let Some(status) = status {
            filter.push(("status", eq(status.as_str())));
        }
        let total = self.client.count(TABLE, &filter).await?;

        let mut query = filter;
        query.push(("order", "created_at.desc".to_string()));
        query.extend(page.params());
        let items = self.client.get(TABLE, &query).await?;

        Ok(Paged::new(items, page, total))
    }

    /// Returns the updated row, or `None` when the id does not exist
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> Result<Option<ContactSubmission>, SupabaseError> {
        #[derive(Serialize)]
        struct StatusUpdate {
            status: ContactStatus,
        }

        let rows: Vec<ContactSubmission> = self
            .client
            .update_returning(TABLE, &[("id", eq(id))], &StatusUpdate { status })
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, SupabaseError> {
        Ok(self.client.delete(TABLE, &[("id", eq(id))]).await? > 0)
    }

    pub async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, SupabaseError> {
        self.client
            .count(TABLE, &[("created_at", format!("gte.{}", since.to_rfc3339()))])
            .await
    }

    pub async fn count_unread(&self) -> Result<u64, SupabaseError> {
        self.client
            .count(TABLE, &[("status", eq(ContactStatus::New.as_str()))])
            .await
    }
}
