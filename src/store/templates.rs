//! Email templates editable from the admin panel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::{eq, SupabaseClient, SupabaseError};

const TABLE: &str = "email_templates";

/// Slugs the server looks up by name
pub const WELCOME: &str = "welcome";
pub const APPOINTMENT_REMINDER: &str = "appointment-reminder";
pub const NO_SHOW_FEE: &str = "no-show-fee";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub slug: String,
    pub subject: String,
    pub html_body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTemplate {
    pub id: Uuid,
    pub slug: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TemplateStore {
    client: SupabaseClient,
}

impl TemplateStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<EmailTemplate>, SupabaseError> {
        self.client
            .get(TABLE, &[("order", "slug.asc".to_string())])
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<EmailTemplate>, SupabaseError> {
        self.client.get_one(TABLE, &[("id", eq(id))]).await
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<EmailTemplate>, SupabaseError> {
        self.client.get_one(TABLE, &[("slug", eq(slug))]).await
    }

    pub async fn create(&self, template: &NewTemplate) -> Result<EmailTemplate, SupabaseError> {
        self.client.insert(TABLE, template).await
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: &TemplateUpdate,
    ) -> Result<Option<EmailTemplate>, SupabaseError> {
        let rows: Vec<EmailTemplate> = self
            .client
            .update_returning(TABLE, &[("id", eq(id))], update)
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, SupabaseError> {
        Ok(self.client.delete(TABLE, &[("id", eq(id))]).await? > 0)
    }
}
