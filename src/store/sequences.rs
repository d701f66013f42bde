//! Email drip sequences, their steps, enrollments and the send log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page::{Page, Paged};
use super::supabase::{eq, SupabaseClient, SupabaseError};

const SEQUENCES: &str = "email_sequences";
const STEPS: &str = "sequence_steps";
const ENROLLMENTS: &str = "sequence_enrollments";
const LOGS: &str = "email_logs";

/// Trigger fired when someone joins the newsletter
pub const TRIGGER_NEWSLETTER_SIGNUP: &str = "newsletter_signup";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub trigger: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub position: i32,
    pub delay_hours: i64,
    pub template_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

/// A subscriber's membership in a sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub subscriber_id: Uuid,
    /// Index into the sequence's ordered steps
    pub current_step: i32,
    pub status: EnrollmentStatus,
    pub next_send_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
struct NewEnrollment {
    sequence_id: Uuid,
    subscriber_id: Uuid,
    current_step: i32,
    status: EnrollmentStatus,
    next_send_at: DateTime<Utc>,
    enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailLogStatus {
    Sent,
    Failed,
}

impl EmailLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailLogStatus::Sent => "sent",
            EmailLogStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEmailLog {
    pub subscriber_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub recipient: String,
    pub resend_id: Option<String>,
    pub status: EmailLogStatus,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct SequenceStore {
    client: SupabaseClient,
}

impl SequenceStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Sequence>, SupabaseError> {
        self.client
            .get(SEQUENCES, &[("order", "name.asc".to_string())])
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Sequence>, SupabaseError> {
        self.client.get_one(SEQUENCES, &[("id", eq(id))]).await
    }

    pub async fn create(&self, name: &str, trigger: &str, active: bool) -> Result<Sequence, SupabaseError> {
        let sequence = Sequence {
            id: Uuid::new_v4(),
            name: name.to_string(),
            trigger: trigger.to_string(),
            active,
        };
        self.client.insert(SEQUENCES, &sequence).await
    }

    pub async fn active_for_trigger(&self, trigger: &str) -> Result<Vec<Sequence>, SupabaseError> {
        self.client
            .get(SEQUENCES, &[("trigger", eq(trigger)), ("active", eq(true))])
            .await
    }

    /// Steps in send order
    pub async fn steps(&self, sequence_id: Uuid) -> Result<Vec<SequenceStep>, SupabaseError> {
        self.client
            .get(
                STEPS,
                &[
                    ("sequence_id", eq(sequence_id)),
                    ("order", "position.asc".to_string()),
                ],
            )
            .await
    }

    pub async fn add_step(
        &self,
        sequence_id: Uuid,
        position: i32,
        delay_hours: i64,
        template_id: Uuid,
    ) -> Result<SequenceStep, SupabaseError> {
        let step = SequenceStep {
            id: Uuid::new_v4(),
            sequence_id,
            position,
            delay_hours,
            template_id,
        };
        self.client.insert(STEPS, &step).await
    }

    /// Start (or restart) a subscriber at the first step
    pub async fn enroll(
        &self,
        sequence_id: Uuid,
        subscriber_id: Uuid,
        now: DateTime<Utc>,
        next_send_at: DateTime<Utc>,
    ) -> Result<(), SupabaseError> {
        let enrollment = NewEnrollment {
            sequence_id,
            subscriber_id,
            current_step: 0,
            status: EnrollmentStatus::Active,
            next_send_at,
            enrolled_at: now,
        };
        self.client
            .upsert(ENROLLMENTS, &enrollment, "sequence_id,subscriber_id")
            .await
    }

    /// Active enrollments whose next send time has passed, oldest first
    pub async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Enrollment>, SupabaseError> {
        self.client
            .get(
                ENROLLMENTS,
                &[
                    ("status", eq(EnrollmentStatus::Active.as_str())),
                    ("next_send_at", format!("lte.{}", now.to_rfc3339())),
                    ("order", "next_send_at.asc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
    }

    pub async fn advance(
        &self,
        id: Uuid,
        step_index: i32,
        next_send_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<(), SupabaseError> {
        #[derive(Serialize)]
        struct Advance {
            current_step: i32,
            next_send_at: DateTime<Utc>,
            last_sent_at: DateTime<Utc>,
        }

        self.client
            .update(
                ENROLLMENTS,
                &[("id", eq(id))],
                &Advance {
                    current_step: step_index,
                    next_send_at,
                    last_sent_at: sent_at,
                },
            )
            .await
    }

    pub async fn finish(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), SupabaseError> {
        #[derive(Serialize)]
        struct Finish {
            status: EnrollmentStatus,
            next_send_at: Option<DateTime<Utc>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            last_sent_at: Option<DateTime<Utc>>,
        }

        self.client
            .update(
                ENROLLMENTS,
                &[("id", eq(id))],
                &Finish {
                    status,
                    next_send_at: None,
                    last_sent_at: sent_at,
                },
            )
            .await
    }

    pub async fn cancel_for_subscriber(&self, subscriber_id: Uuid) -> Result<(), SupabaseError> {
        #[derive(Serialize)]
        struct Cancel {
            status: EnrollmentStatus,
            next_send_at: Option<DateTime<Utc>>,
        }

        self.client
            .update(
                ENROLLMENTS,
                &[
                    ("subscriber_id", eq(subscriber_id)),
                    ("status", eq(EnrollmentStatus::Active.as_str())),
                ],
                &Cancel {
                    status: EnrollmentStatus::Cancelled,
                    next_send_at: None,
                },
            )
            .await
    }

    pub async fn enrollments(
        &self,
        sequence_id: Uuid,
        page: Page,
    ) -> Result<Paged<Enrollment>, SupabaseError> {
        let filter = vec![("sequence_id", eq(sequence_id))];
        let total = self.client.count(ENROLLMENTS, &filter).await?;

        let mut query = filter;
        query.push(("order", "enrolled_at.desc".to_string()));
        query.extend(page.params());
        let items = self.client.get(ENROLLMENTS, &query).await?;

        Ok(Paged::new(items, page, total))
    }

    pub async fn log_email(&self, log: &NewEmailLog) -> Result<(), SupabaseError> {
        self.client
            .insert::<_, serde_json::Value>(LOGS, log)
            .await
            .map(|_| ())
    }

    pub async fn count_emails_since(
        &self,
        status: EmailLogStatus,
        since: DateTime<Utc>,
    ) -> Result<u64, SupabaseError> {
        self.client
            .count(
                LOGS,
                &[
                    ("status", eq(status.as_str())),
                    ("created_at", format!("gte.{}", since.to_rfc3339())),
                ],
            )
            .await
    }

    pub async fn count_active_enrollments(&self) -> Result<u64, SupabaseError> {
        self.client
            .count(ENROLLMENTS, &[("status", eq(EnrollmentStatus::Active.as_str()))])
            .await
    }
}
