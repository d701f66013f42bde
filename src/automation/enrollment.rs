//! Drip sequence enrollment and delivery
//!
//! Enrollments are plain rows: `current_step` indexes the sequence's steps
//! ordered by position, and `next_send_at` says when that step is due. Each
//! cron run sends whatever is due and moves the row forward.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::email::{EmailClient, EmailError, TemplateVars};
use crate::store::sequences::{EmailLogStatus, Enrollment, EnrollmentStatus, NewEmailLog, SequenceStep};
use crate::store::subscribers::Subscriber;
use crate::store::supabase::SupabaseError;
use crate::store::templates::EmailTemplate;
use crate::store::{SequenceStore, SubscriberStore, TemplateStore};

/// Upper bound on enrollments handled per run
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Wall-clock time a run may spend before leaving the rest for the next one
pub const DEFAULT_RUN_BUDGET: std::time::Duration = std::time::Duration::from_secs(50);

/// What to do with an enrollment whose step is due
#[derive(Debug, PartialEq, Eq)]
pub enum StepPlan<'a> {
    Send { step: &'a SequenceStep, after: AfterSend },
    Complete,
}

/// Enrollment state once the current step has been sent
#[derive(Debug, PartialEq, Eq)]
pub enum AfterSend {
    Advance { step_index: i32, send_at: DateTime<Utc> },
    Complete,
}

/// Decide the next action for an enrollment at `current_step`.
/// Each step's delay counts from the previous send.
pub fn plan_step(current_step: i32, steps: &[SequenceStep], now: DateTime<Utc>) -> StepPlan<'_> {
    let Ok(index) = usize::try_from(current_step) else {
        return StepPlan::Complete;
    };
    let Some(step) = steps.get(index) else {
        return StepPlan::Complete;
    };

    let after = match steps.get(index + 1) {
        Some(next) => AfterSend::Advance {
            step_index: current_step + 1,
            send_at: now + Duration::hours(next.delay_hours.max(0)),
        },
        None => AfterSend::Complete,
    };

    StepPlan::Send { step, after }
}

/// Counts reported back to the cron caller
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceRunSummary {
    pub processed: usize,
    pub sent: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Closed because the step can never be delivered
    pub abandoned: usize,
    /// Transient failures, retried next run
    pub failed: usize,
    /// Due but left for the next run once the budget ran out
    pub deferred: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("Database error: {0}")]
    Database(#[from] SupabaseError),

    #[error("Email error: {0}")]
    Email(#[from] EmailError),

    #[error("Template {0} not found")]
    MissingTemplate(Uuid),
}

/// Outcome for a single enrollment
enum Processed {
    Sent { completed: bool },
    Completed,
    Cancelled,
    Abandoned,
}

/// Enrolls subscribers into sequences and delivers due steps
#[derive(Clone)]
pub struct EnrollmentManager {
    config: Arc<Config>,
    subscribers: SubscriberStore,
    sequences: SequenceStore,
    templates: TemplateStore,
    email: EmailClient,
}

impl EnrollmentManager {
    pub fn new(
        config: Arc<Config>,
        subscribers: SubscriberStore,
        sequences: SequenceStore,
        templates: TemplateStore,
        email: EmailClient,
    ) -> Self {
        Self {
            config,
            subscribers,
            sequences,
            templates,
            email,
        }
    }

    /// Enroll a subscriber in every active sequence for `trigger`.
    /// Returns how many sequences they joined.
    pub async fn enroll_for_trigger(
        &self,
        subscriber: &Subscriber,
        trigger: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, EnrollmentError> {
        let sequences = self.sequences.active_for_trigger(trigger).await?;
        let mut enrolled = 0;

        for sequence in sequences {
            let steps = self.sequences.steps(sequence.id).await?;
            let Some(first) = steps.first() else {
                warn!(sequence_id = %sequence.id, "Skipping sequence without steps");
                continue;
            };

            let send_at = now + Duration::hours(first.delay_hours.max(0));
            self.sequences
                .enroll(sequence.id, subscriber.id, now, send_at)
                .await?;
            enrolled += 1;

            info!(
                subscriber_id = %subscriber.id,
                sequence_id = %sequence.id,
                first_send_at = %send_at,
                "Subscriber enrolled"
            );
        }

        Ok(enrolled)
    }

    /// Deliver due steps until `budget` is spent. Individual failures are
    /// logged and counted; the run stops only between enrollments.
    pub async fn process_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        budget: std::time::Duration,
    ) -> Result<SequenceRunSummary, EnrollmentError> {
        let started = Instant::now();
        let due = self.sequences.due(now, limit).await?;
        let mut summary = SequenceRunSummary::default();
        let mut steps_cache: HashMap<Uuid, Vec<SequenceStep>> = HashMap::new();
        let mut template_cache: HashMap<Uuid, EmailTemplate> = HashMap::new();

        for enrollment in &due {
            if started.elapsed() >= budget {
                summary.deferred = due.len() - summary.processed;
                warn!(deferred = summary.deferred, "Sequence run out of time");
                break;
            }
            summary.processed += 1;
            match self
                .process_one(enrollment, now, &mut steps_cache, &mut template_cache)
                .await
            {
                Ok(Processed::Sent { completed }) => {
                    summary.sent += 1;
                    if completed {
                        summary.completed += 1;
                    }
                }
                Ok(Processed::Completed) => summary.completed += 1,
                Ok(Processed::Cancelled) => summary.cancelled += 1,
                Ok(Processed::Abandoned) => summary.abandoned += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        enrollment_id = %enrollment.id,
                        error = %e,
                        "Failed to process enrollment"
                    );
                }
            }
        }

        info!(
            processed = summary.processed,
            sent = summary.sent,
            completed = summary.completed,
            cancelled = summary.cancelled,
            abandoned = summary.abandoned,
            failed = summary.failed,
            deferred = summary.deferred,
            "Sequence run finished"
        );

        Ok(summary)
    }

    async fn process_one(
        &self,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
        steps_cache: &mut HashMap<Uuid, Vec<SequenceStep>>,
        template_cache: &mut HashMap<Uuid, EmailTemplate>,
    ) -> Result<Processed, EnrollmentError> {
        let subscriber = match self.subscribers.get(enrollment.subscriber_id).await? {
            Some(s) if s.is_active() => s,
            _ => {
                self.sequences
                    .finish(enrollment.id, EnrollmentStatus::Cancelled, None)
                    .await?;
                info!(enrollment_id = %enrollment.id, "Enrollment cancelled, subscriber inactive");
                return Ok(Processed::Cancelled);
            }
        };

        if !steps_cache.contains_key(&enrollment.sequence_id) {
            let steps = self.sequences.steps(enrollment.sequence_id).await?;
            steps_cache.insert(enrollment.sequence_id, steps);
        }
        let steps = steps_cache
            .get(&enrollment.sequence_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let (step, after) = match plan_step(enrollment.current_step, steps, now) {
            StepPlan::Complete => {
                self.sequences
                    .finish(enrollment.id, EnrollmentStatus::Completed, None)
                    .await?;
                return Ok(Processed::Completed);
            }
            StepPlan::Send { step, after } => (step, after),
        };

        if !template_cache.contains_key(&step.template_id) {
            let Some(template) = self.templates.get(step.template_id).await? else {
                warn!(
                    enrollment_id = %enrollment.id,
                    template_id = %step.template_id,
                    "Template missing, abandoning enrollment"
                );
                self.sequences
                    .finish(enrollment.id, EnrollmentStatus::Cancelled, None)
                    .await?;
                return Ok(Processed::Abandoned);
            };
            template_cache.insert(step.template_id, template);
        }
        let template = template_cache
            .get(&step.template_id)
            .ok_or(EnrollmentError::MissingTemplate(step.template_id))?;

        let vars = subscriber_vars(&self.config, &subscriber);
        let sent = self
            .email
            .send_template(template, &subscriber.email, &vars)
            .await;

        let mut log = NewEmailLog {
            subscriber_id: Some(subscriber.id),
            template_id: Some(template.id),
            enrollment_id: Some(enrollment.id),
            recipient: subscriber.email.clone(),
            resend_id: None,
            status: EmailLogStatus::Sent,
            error: None,
        };

        let resend_id = match sent {
            Ok(id) => id,
            Err(e) => {
                log.status = EmailLogStatus::Failed;
                log.error = Some(e.to_string());
                if let Err(log_err) = self.sequences.log_email(&log).await {
                    warn!(error = %log_err, "Failed to record email failure");
                }
                if e.is_permanent() {
                    warn!(enrollment_id = %enrollment.id, error = %e, "Abandoning enrollment");
                    self.sequences
                        .finish(enrollment.id, EnrollmentStatus::Cancelled, None)
                        .await?;
                    return Ok(Processed::Abandoned);
                }
                // Row stays due and is retried on the next run
                return Err(e.into());
            }
        };

        log.resend_id = Some(resend_id);
        if let Err(e) = self.sequences.log_email(&log).await {
            warn!(error = %e, "Failed to record sent email");
        }

        match after {
            AfterSend::Advance { step_index, send_at } => {
                self.sequences
                    .advance(enrollment.id, step_index, send_at, now)
                    .await?;
                Ok(Processed::Sent { completed: false })
            }
            AfterSend::Complete => {
                self.sequences
                    .finish(enrollment.id, EnrollmentStatus::Completed, Some(now))
                    .await?;
                Ok(Processed::Sent { completed: true })
            }
        }
    }
}

/// Template variables describing a subscriber
pub fn subscriber_vars(config: &Config, subscriber: &Subscriber) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert("name", subscriber.greeting_name().to_string());
    vars.insert("email", subscriber.email.clone());
    vars.insert(
        "unsubscribe_url",
        config.unsubscribe_url(&subscriber.unsubscribe_token),
    );
    vars
}
