//! Appointments and their payment state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page::{Page, Paged};
use super::supabase::{eq, SupabaseClient, SupabaseError};

const TABLE: &str = "appointments";

/// Lifecycle of a booked session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Only scheduled appointments move; the outcome is final
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (
                AppointmentStatus::Scheduled,
                AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
            )
        )
    }
}

/// State of the Stripe PaymentIntent backing an appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    NoShowCharged,
    Canceled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::NoShowCharged => "no_show_charged",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Captured
                | PaymentStatus::NoShowCharged
                | PaymentStatus::Canceled
                | PaymentStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Authorized | Failed | Canceled)
                | (Authorized, Captured | NoShowCharged | Canceled | Failed)
        )
    }
}

/// Appointment row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub stripe_payment_intent: Option<String>,
    pub amount_cents: i64,
    pub no_show_fee_cents: i64,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    /// Amount captured when the client does not attend
    pub fn no_show_charge(&self) -> i64 {
        self.no_show_fee_cents.clamp(0, self.amount_cents)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAppointment {
    pub id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: i64,
    pub no_show_fee_cents: i64,
    pub notes: Option<String>,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppointmentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_payment_intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct AppointmentStore {
    client: SupabaseClient,
}

impl AppointmentStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Appointment>, SupabaseError> {
        self.client.get_one(TABLE, &[("id", eq(id))]).await
    }

    pub async fn find_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<Appointment>, SupabaseError> {
        let rows: Vec<Appointment> = self
            .client
            .get(TABLE, &[("stripe_payment_intent", eq(payment_intent))])
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn create(&self, appointment: &NewAppointment) -> Result<Appointment, SupabaseError> {
        self.client.insert(TABLE, appointment).await
    }

    pub async fn update(&self, id: Uuid, update: &AppointmentUpdate) -> Result<(), SupabaseError> {
        self.client.update(TABLE, &[("id", eq(id))], update).await
    }

    /// Apply `update` only while the appointment is still in `from`.
    /// Returns false when another writer changed the status first.
    pub async fn update_if_status(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        update: &AppointmentUpdate,
    ) -> Result<bool, SupabaseError> {
        let rows: Vec<serde_json::Value> = self
            .client
            .update_returning(
                TABLE,
                &[("id", eq(id)), ("status", eq(from.as_str()))],
                update,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Move the payment status only if the row is still in `from`.
    /// Returns false when another writer got there first.
    pub async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool, SupabaseError> {
        let update = AppointmentUpdate {
            payment_status: Some(to),
            ..Default::default()
        };
        let rows: Vec<serde_json::Value> = self
            .client
            .update_returning(
                TABLE,
                &[("id", eq(id)), ("payment_status", eq(from.as_str()))],
                &update,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn list(
        &self,
        page: Page,
        status: Option<AppointmentStatus>,
    ) -> Result<Paged<Appointment>, SupabaseError> {
        let mut filter = Vec::new();
        if let Some(status) = status {
            filter.push(("status", eq(status.as_str())));
        }
        let total = self.client.count(TABLE, &filter).await?;

        let mut query = filter;
        query.push(("order", "starts_at.desc".to_string()));
        query.extend(page.params());
        let items = self.client.get(TABLE, &query).await?;

        Ok(Paged::new(items, page, total))
    }

    /// Scheduled sessions starting within `window` that have not been reminded
    pub async fn reminders_due(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Appointment>, SupabaseError> {
        self.client
            .get(
                TABLE,
                &[
                    ("status", eq(AppointmentStatus::Scheduled.as_str())),
                    ("reminder_sent_at", "is.null".to_string()),
                    ("starts_at", format!("gt.{}", now.to_rfc3339())),
                    ("starts_at", format!("lte.{}", (now + window).to_rfc3339())),
                    ("order", "starts_at.asc".to_string()),
                ],
            )
            .await
    }

    pub async fn with_statuses(
        &self,
        status: AppointmentStatus,
        payment_status: PaymentStatus,
    ) -> Result<Vec<Appointment>, SupabaseError> {
        self.client
            .get(
                TABLE,
                &[
                    ("status", eq(status.as_str())),
                    ("payment_status", eq(payment_status.as_str())),
                    ("order", "starts_at.asc".to_string()),
                ],
            )
            .await
    }

    /// Rows touching the analytics window
    pub async fn since(&self, since: DateTime<Utc>) -> Result<Vec<AppointmentSummaryRow>, SupabaseError> {
        self.client
            .get(
                TABLE,
                &[
                    ("select", "status,payment_status,amount_cents,no_show_fee_cents".to_string()),
                    ("starts_at", format!("gte.{}", since.to_rfc3339())),
                ],
            )
            .await
    }
}

/// Narrow projection used by the analytics dashboard
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentSummaryRow {
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: i64,
    pub no_show_fee_cents: i64,
}
