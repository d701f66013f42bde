//! Newsletter subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page::{Page, Paged};
use super::supabase::{eq, SupabaseClient, SupabaseError};

const TABLE: &str = "subscribers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Active,
    Unsubscribed,
}

impl SubscriberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberStatus::Active => "active",
            SubscriberStatus::Unsubscribed => "unsubscribed",
        }
    }
}

/// Subscriber row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    pub source: Option<String>,
    pub unsubscribe_token: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    pub fn is_active(&self) -> bool {
        self.status == SubscriberStatus::Active
    }

    /// Name used in greetings, falling back to a neutral salutation
    pub fn greeting_name(&self) -> &str {
        self.name.as_deref().unwrap_or("there")
    }
}

/// New subscriber for insertion
#[derive(Debug, Clone, Serialize)]
pub struct NewSubscriber {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    pub source: Option<String>,
    pub unsubscribe_token: Uuid,
}

/// Subscriber store operations
#[derive(Clone)]
pub struct SubscriberStore {
    client: SupabaseClient,
}

impl SubscriberStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Subscriber>, SupabaseError> {
        self.client.get_one(TABLE, &[("id", eq(id))]).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>, SupabaseError> {
        self.client.get_one(TABLE, &[("email", eq(email))]).await
    }

    pub async fn find_by_token(&self, token: Uuid) -> Result<Option<Subscriber>, SupabaseError> {
        self.client
            .get_one(TABLE, &[("unsubscribe_token", eq(token))])
            .await
    }

    pub async fn create(
        &self,
        email: &str,
        name: Option<String>,
        source: Option<String>,
    ) -> Result<Subscriber, SupabaseError> {
        let subscriber = NewSubscriber {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name,
            status: SubscriberStatus::Active,
            source,
            unsubscribe_token: Uuid::new_v4(),
        };
        self.client.insert(TABLE, &subscriber).await
    }

    /// Flip an unsubscribed row back to active, keeping a newer name if given
    pub async fn reactivate(
        &self,
        id: Uuid,
        name: Option<String>,
    ) -> Result<(), SupabaseError> {
        #[derive(Serialize)]
        struct Reactivate {
            status: SubscriberStatus,
            unsubscribed_at: Option<DateTime<Utc>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            name: Option<String>,
        }

        self.client
            .update(
                TABLE,
                &[("id", eq(id))],
                &Reactivate {
                    status: SubscriberStatus::Active,
                    unsubscribed_at: None,
                    name,
                },
            )
            .await
    }

    pub async fn unsubscribe(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), SupabaseError> {
        #[derive(Serialize)]
        struct Unsubscribe {
            status: SubscriberStatus,
            unsubscribed_at: DateTime<Utc>,
        }

        self.client
            .update(
                TABLE,
                &[("id", eq(id))],
                &Unsubscribe {
                    status: SubscriberStatus::Unsubscribed,
                    unsubscribed_at: at,
                },
            )
            .await
    }

    pub async fn list(
        &self,
        page: Page,
        status: Option<SubscriberStatus>,
    ) -> Result<Paged<Subscriber>, SupabaseError> {
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

    pub async fn delete(&self, id: Uuid) -> Result<bool, SupabaseError> {
        Ok(self.client.delete(TABLE, &[("id", eq(id))]).await? > 0)
    }

    pub async fn count_active(&self) -> Result<u64, SupabaseError> {
        self.client
            .count(TABLE, &[("status", eq(SubscriberStatus::Active.as_str()))])
            .await
    }

    pub async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, SupabaseError> {
        self.client
            .count(TABLE, &[("created_at", format!("gte.{}", since.to_rfc3339()))])
            .await
    }

    pub async fn count_unsubscribed_since(&self, since: DateTime<Utc>) -> Result<u64, SupabaseError> {
        self.client
            .count(
                TABLE,
                &[("unsubscribed_at", format!("gte.{}", since.to_rfc3339()))],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_json() {
        let json = serde_json::to_string(&SubscriberStatus::Unsubscribed).unwrap();
        assert_eq!(json, "\"unsubscribed\"");
        let status: SubscriberStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(status, SubscriberStatus::Active);
    }

    #[test]
    fn greeting_falls_back() {
        let row = serde_json::json!({
            "id": Uuid::nil(),
            "email": "a@b.co",
            "name": null,
            "status": "active",
            "source": null,
            "unsubscribe_token": Uuid::nil(),
            "created_at": "2024-05-01T10:00:00Z"
        });
        let subscriber: Subscriber = serde_json::from_value(row).unwrap();
        assert_eq!(subscriber.greeting_name(), "there");
        assert!(subscriber.is_active());
        assert!(subscriber.unsubscribed_at.is_none());
    }
}
