//! Appointment cron jobs: reminders, payment capture and no-show fees

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::email::{EmailClient, OutgoingEmail, TemplateVars};
use crate::payments::StripeService;
use crate::store::appointments::{Appointment, AppointmentStatus, AppointmentUpdate, PaymentStatus};
use crate::store::supabase::SupabaseError;
use crate::store::templates::{self, EmailTemplate};
use crate::store::{AppointmentStore, TemplateStore};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub checked: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub captured: usize,
    pub released: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct NoShowSummary {
    pub charged: usize,
    /// Zero fee: hold released, nothing charged
    pub waived: usize,
    pub failed: usize,
}

/// Runs the appointment jobs the cron host triggers
#[derive(Clone)]
pub struct AppointmentJobs {
    config: Arc<Config>,
    appointments: AppointmentStore,
    templates: TemplateStore,
    email: EmailClient,
    stripe: StripeService,
}

impl AppointmentJobs {
    pub fn new(
        config: Arc<Config>,
        appointments: AppointmentStore,
        templates: TemplateStore,
        email: EmailClient,
        stripe: StripeService,
    ) -> Self {
        Self {
            config,
            appointments,
            templates,
            email,
            stripe,
        }
    }

    /// Email clients whose session starts within the reminder window
    pub async fn send_appointment_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReminderSummary, SupabaseError> {
        let window = Duration::hours(self.config.reminder_window_hours.max(1));
        let due = self.appointments.reminders_due(now, window).await?;
        let template = self
            .templates
            .get_by_slug(templates::APPOINTMENT_REMINDER)
            .await?;

        let mut summary = ReminderSummary {
            checked: due.len(),
            ..Default::default()
        };

        for appointment in &due {
            let email = reminder_email(template.as_ref(), appointment, &self.config.currency);
            if let Err(e) = self.email.send(&email).await {
                summary.failed += 1;
                error!(appointment_id = %appointment.id, error = %e, "Reminder email failed");
                continue;
            }

            let update = AppointmentUpdate {
                reminder_sent_at: Some(now),
                ..Default::default()
            };
            match self.appointments.update(appointment.id, &update).await {
                Ok(()) => summary.sent += 1,
                Err(e) => {
                    // Sent but not recorded; the next run may remind again
                    summary.failed += 1;
                    error!(appointment_id = %appointment.id, error = %e, "Failed to record reminder");
                }
            }
        }

        info!(checked = summary.checked, sent = summary.sent, failed = summary.failed, "Reminder run finished");
        Ok(summary)
    }

    /// Capture completed sessions and release cancelled ones
    pub async fn capture_completed_payments(&self) -> Result<CaptureSummary, SupabaseError> {
        let mut summary = CaptureSummary::default();

        let completed = self
            .appointments
            .with_statuses(AppointmentStatus::Completed, PaymentStatus::Authorized)
            .await?;
        for appointment in &completed {
            match self.settle(appointment, PaymentStatus::Captured, None).await {
                Ok(()) => summary.captured += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(appointment_id = %appointment.id, error = %e, "Payment capture failed");
                }
            }
        }

        let cancelled = self
            .appointments
            .with_statuses(AppointmentStatus::Cancelled, PaymentStatus::Authorized)
            .await?;
        for appointment in &cancelled {
            match self.settle(appointment, PaymentStatus::Canceled, None).await {
                Ok(()) => summary.released += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(appointment_id = %appointment.id, error = %e, "Releasing authorization failed");
                }
            }
        }

        info!(captured = summary.captured, released = summary.released, failed = summary.failed, "Capture run finished");
        Ok(summary)
    }

    /// Capture the no-show fee from the held authorization
    pub async fn charge_no_show_fees(&self) -> Result<NoShowSummary, SupabaseError> {
        let mut summary = NoShowSummary::default();
        let no_shows = self
            .appointments
            .with_statuses(AppointmentStatus::NoShow, PaymentStatus::Authorized)
            .await?;
        let notice = self.templates.get_by_slug(templates::NO_SHOW_FEE).await?;

        for appointment in &no_shows {
            let fee = appointment.no_show_charge();
            if fee == 0 {
                match self.settle(appointment, PaymentStatus::Canceled, None).await {
                    Ok(()) => summary.waived += 1,
                    Err(e) => {
                        summary.failed += 1;
                        error!(appointment_id = %appointment.id, error = %e, "Releasing no-show hold failed");
                    }
                }
                continue;
            }

            if let Err(e) = self
                .settle(appointment, PaymentStatus::NoShowCharged, Some(fee))
                .await
            {
                summary.failed += 1;
                error!(appointment_id = %appointment.id, error = %e, "No-show fee failed");
                continue;
            }
            summary.charged += 1;

            // Best effort: the charge already went through
            let email = no_show_email(notice.as_ref(), appointment, &self.config.currency);
            if let Err(e) = self.email.send(&email).await {
                warn!(appointment_id = %appointment.id, error = %e, "No-show notice failed");
            }
        }

        info!(
            charged = summary.charged,
            waived = summary.waived,
            failed = summary.failed,
            "No-show run finished"
        );
        Ok(summary)
    }

    /// Move money at Stripe, then record the new payment status
    async fn settle(
        &self,
        appointment: &Appointment,
        to: PaymentStatus,
        amount: Option<i64>,
    ) -> Result<(), JobError> {
        let intent_id = appointment
            .stripe_payment_intent
            .as_deref()
            .ok_or(JobError::NoPaymentIntent)?;

        let intent = match to {
            PaymentStatus::Canceled => self.stripe.cancel(intent_id).await?,
            _ => self.stripe.capture(intent_id, amount).await?,
        };

        let moved = self
            .appointments
            .transition_payment(appointment.id, PaymentStatus::Authorized, to)
            .await?;
        if !moved {
            // The Stripe webhook may have recorded the same outcome first
            let current = self
                .appointments
                .get(appointment.id)
                .await?
                .map(|row| row.payment_status);
            if current != Some(to) {
                return Err(JobError::StatusChanged {
                    expected: to,
                    found: current,
                });
            }
        }

        info!(
            appointment_id = %appointment.id,
            payment_intent_id = %intent_id,
            stripe_status = %intent.status,
            status = to.as_str(),
            "Payment settled"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error("Appointment has no payment intent")]
    NoPaymentIntent,

    #[error("Stripe error: {0}")]
    Stripe(#[from] crate::payments::StripeError),

    #[error("Database error: {0}")]
    Database(#[from] SupabaseError),

    #[error("Payment status is {found:?}, expected {expected:?}")]
    StatusChanged {
        expected: PaymentStatus,
        found: Option<PaymentStatus>,
    },
}

/// Format an amount in the smallest currency unit for display
pub fn format_money(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let amount = format!("{}.{:02}", abs / 100, abs % 100);
    match currency.to_ascii_lowercase().as_str() {
        "usd" | "cad" | "aud" => format!("{}${}", sign, amount),
        "eur" => format!("{}€{}", sign, amount),
        "gbp" => format!("{}£{}", sign, amount),
        other => format!("{}{} {}", sign, amount, other.to_ascii_uppercase()),
    }
}

fn appointment_vars(appointment: &Appointment, currency: &str) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert("name", appointment.client_name.clone());
    vars.insert("email", appointment.client_email.clone());
    vars.insert(
        "starts_at",
        appointment.starts_at.format("%A, %B %-d at %H:%M UTC").to_string(),
    );
    vars.insert("fee", format_money(appointment.no_show_charge(), currency));
    vars.insert("amount", format_money(appointment.amount_cents, currency));
    vars
}

fn reminder_email(template: Option<&EmailTemplate>, appointment: &Appointment, currency: &str) -> OutgoingEmail {
    let vars = appointment_vars(appointment, currency);
    match template {
        Some(template) => OutgoingEmail::from_template(template, &appointment.client_email, &vars),
        None => OutgoingEmail::new(
            &appointment.client_email,
            "Reminder: your upcoming session",
            crate::email::template::render(
                "<p>Hi {{name}},</p><p>This is a reminder of your session on {{starts_at}}.</p>\
                 <p>If you need to reschedule, please reply to this email.</p>",
                &vars,
                true,
            ),
        ),
    }
}

fn no_show_email(template: Option<&EmailTemplate>, appointment: &Appointment, currency: &str) -> OutgoingEmail {
    let vars = appointment_vars(appointment, currency);
    match template {
        Some(template) => OutgoingEmail::from_template(template, &appointment.client_email, &vars),
        None => OutgoingEmail::new(
            &appointment.client_email,
            "Missed session fee",
            crate::email::template::render(
                "<p>Hi {{name}},</p><p>We missed you at your session on {{starts_at}}. \
                 As per our cancellation policy, a fee of {{fee}} has been charged.</p>",
                &vars,
                true,
            ),
        ),
    }
}
