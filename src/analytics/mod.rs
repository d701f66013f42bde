//! Admin dashboard figures

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::appointments::{AppointmentStatus, AppointmentSummaryRow, PaymentStatus};
use crate::store::sequences::EmailLogStatus;
use crate::store::supabase::SupabaseError;
use crate::store::{AppointmentStore, ContactStore, SequenceStore, SubscriberStore};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const MAX_WINDOW_DAYS: i64 = 365;

pub fn window_days(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_WINDOW_DAYS)
        .clamp(1, MAX_WINDOW_DAYS)
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub window_days: i64,
    pub since: DateTime<Utc>,
    pub subscribers: SubscriberFigures,
    pub contacts: ContactFigures,
    pub appointments: AppointmentFigures,
    pub emails: EmailFigures,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberFigures {
    pub active: u64,
    pub new_in_window: u64,
    pub unsubscribed_in_window: u64,
    pub active_enrollments: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactFigures {
    pub unread: u64,
    pub new_in_window: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppointmentFigures {
    pub scheduled: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub no_show: u64,
    /// Full session fees captured
    pub revenue_cents: i64,
    /// No-show fees captured
    pub no_show_fees_cents: i64,
    /// Completed sessions whose payment still waits for capture
    pub pending_capture_cents: i64,
    /// Share of finished sessions the client missed, 0.0 to 1.0
    pub no_show_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailFigures {
    pub sent: u64,
    pub failed: u64,
}

/// Fold appointment rows into dashboard figures
pub fn summarize_appointments(rows: &[AppointmentSummaryRow]) -> AppointmentFigures {
    let mut figures = AppointmentFigures::default();

    for row in rows {
        match row.status {
            AppointmentStatus::Scheduled => figures.scheduled += 1,
            AppointmentStatus::Completed => figures.completed += 1,
            AppointmentStatus::Cancelled => figures.cancelled += 1,
            AppointmentStatus::NoShow => figures.no_show += 1,
        }

        match row.payment_status {
            PaymentStatus::Captured => figures.revenue_cents += row.amount_cents,
            PaymentStatus::NoShowCharged => {
                figures.no_show_fees_cents += row.no_show_fee_cents.clamp(0, row.amount_cents)
            }
            PaymentStatus::Authorized if row.status == AppointmentStatus::Completed => {
                figures.pending_capture_cents += row.amount_cents
            }
            _ => {}
        }
    }

    let finished = figures.completed + figures.no_show;
    if finished > 0 {
        figures.no_show_rate = figures.no_show as f64 / finished as f64;
    }

    figures
}

/// Gather every dashboard figure for the trailing window
pub async fn build_dashboard(
    subscribers: &SubscriberStore,
    contacts: &ContactStore,
    appointments: &AppointmentStore,
    sequences: &SequenceStore,
    now: DateTime<Utc>,
    days: i64,
) -> Result<Dashboard, SupabaseError> {
    let since = now - Duration::days(days);

    let (
        active,
        new_subscribers,
        unsubscribed,
        active_enrollments,
        unread,
        new_contacts,
        appointment_rows,
        sent,
        failed,
    ) = futures::try_join!(
        subscribers.count_active(),
        subscribers.count_since(since),
        subscribers.count_unsubscribed_since(since),
        sequences.count_active_enrollments(),
        contacts.count_unread(),
        contacts.count_since(since),
        appointments.since(since),
        sequences.count_emails_since(EmailLogStatus::Sent, since),
        sequences.count_emails_since(EmailLogStatus::Failed, since),
    )?;

    Ok(Dashboard {
        window_days: days,
        since,
        subscribers: SubscriberFigures {
            active,
            new_in_window: new_subscribers,
            unsubscribed_in_window: unsubscribed,
            active_enrollments,
        },
        contacts: ContactFigures {
            unread,
            new_in_window: new_contacts,
        },
        appointments: summarize_appointments(&appointment_rows),
        emails: EmailFigures { sent, failed },
    })
}
