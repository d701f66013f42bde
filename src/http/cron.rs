//! Cron endpoints. Each call runs one job to completion and reports counts.

use axum::{extract::State, response::Json};
use chrono::Utc;

use crate::app::AppState;
use crate::automation::enrollment::{DEFAULT_BATCH_SIZE, DEFAULT_RUN_BUDGET};
use crate::automation::jobs::{CaptureSummary, NoShowSummary, ReminderSummary};
use crate::automation::SequenceRunSummary;
use crate::http::error::AppError;

pub async fn process_sequences_handler(
    State(state): State<AppState>,
) -> Result<Json<SequenceRunSummary>, AppError> {
    let summary = state
        .enrollment
        .process_due(Utc::now(), DEFAULT_BATCH_SIZE, DEFAULT_RUN_BUDGET)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(summary))
}

pub async fn reminders_handler(
    State(state): State<AppState>,
) -> Result<Json<ReminderSummary>, AppError> {
    Ok(Json(
        state
            .appointment_jobs
            .send_appointment_reminders(Utc::now())
            .await?,
    ))
}

pub async fn capture_payments_handler(
    State(state): State<AppState>,
) -> Result<Json<CaptureSummary>, AppError> {
    Ok(Json(state.appointment_jobs.capture_completed_payments().await?))
}

pub async fn no_show_fees_handler(
    State(state): State<AppState>,
) -> Result<Json<NoShowSummary>, AppError> {
    Ok(Json(state.appointment_jobs.charge_no_show_fees().await?))
}
