//! Admin panel endpoints: CRUD over practice data plus analytics

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::analytics::{self, Dashboard};
use crate::app::AppState;
use crate::domain::{self, EmailAddress, ValidationError};
use crate::http::error::AppError;
use crate::http::extract::{AppJson, AppPath, AppQuery};
use crate::http::middleware::AdminUser;
use crate::store::appointments::{Appointment, AppointmentStatus, AppointmentUpdate};
use crate::store::contacts::{ContactStatus, ContactSubmission};
use crate::store::courses::{Course, CourseUpdate, Lesson, LessonUpdate, NewCourse, NewLesson};
use crate::store::page::{Page, PageQuery, Paged};
use crate::store::sequences::{Enrollment, Sequence, SequenceStep};
use crate::store::subscribers::{Subscriber, SubscriberStatus};
use crate::store::templates::{EmailTemplate, NewTemplate, TemplateUpdate};

const MAX_SUBJECT_CHARS: usize = 200;
const MAX_TITLE_CHARS: usize = 200;

#[derive(Serialize)]
pub struct DeletedResponse {
    deleted: bool,
}

fn deleted(found: bool, what: &str) -> Result<Json<DeletedResponse>, AppError> {
    if found {
        Ok(Json(DeletedResponse { deleted: true }))
    } else {
        Err(AppError::not_found(what))
    }
}

fn required_text(raw: &str, field: &'static str, max: usize) -> Result<String, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::Required(field));
    }
    if text.chars().count() > max {
        return Err(ValidationError::TooLong(field, max));
    }
    Ok(text.to_string())
}

/// `?page=&per_page=&status=` for list endpoints
#[derive(Deserialize)]
pub struct ListQuery<S> {
    page: Option<u32>,
    per_page: Option<u32>,
    status: Option<S>,
}

impl<S> ListQuery<S> {
    fn page(&self) -> Page {
        Page::from(PageQuery {
            page: self.page,
            per_page: self.per_page,
        })
    }
}

// ============================================================================
// Login
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    access_token: String,
    expires_in: u64,
}

pub async fn login_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = EmailAddress::parse(&req.email)?;
    if req.password.is_empty() {
        return Err(ValidationError::Required("password").into());
    }
    if !state.config.is_admin_email(email.as_str()) {
        return Err(AppError::Forbidden);
    }

    let session = state
        .supabase
        .sign_in_with_password(email.as_str(), &req.password)
        .await?;

    info!(email = %email, "Admin signed in");
    Ok(Json(LoginResponse {
        access_token: session.access_token,
        expires_in: session.expires_in,
    }))
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Deserialize)]
pub struct AnalyticsQuery {
    days: Option<i64>,
}

pub async fn analytics_handler(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<AnalyticsQuery>,
) -> Result<Json<Dashboard>, AppError> {
    let dashboard = analytics::build_dashboard(
        &state.subscriber_store,
        &state.contact_store,
        &state.appointment_store,
        &state.sequence_store,
        Utc::now(),
        analytics::window_days(query.days),
    )
    .await?;
    Ok(Json(dashboard))
}

// ============================================================================
// Subscribers
// ============================================================================

pub async fn list_subscribers_handler(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery<SubscriberStatus>>,
) -> Result<Json<Paged<Subscriber>>, AppError> {
    let page = query.page();
    Ok(Json(state.subscriber_store.list(page, query.status).await?))
}

pub async fn delete_subscriber_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminUser>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    state.sequence_store.cancel_for_subscriber(id).await?;
    let found = state.subscriber_store.delete(id).await?;
    if found {
        info!(subscriber_id = %id, admin = %admin.email, "Subscriber deleted");
    }
    deleted(found, "Subscriber")
}

// ============================================================================
// Contact submissions
// ============================================================================

pub async fn list_contacts_handler(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery<ContactStatus>>,
) -> Result<Json<Paged<ContactSubmission>>, AppError> {
    let page = query.page();
    Ok(Json(state.contact_store.list(page, query.status).await?))
}

#[derive(Deserialize)]
pub struct ContactStatusRequest {
    status: ContactStatus,
}

pub async fn update_contact_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<ContactStatusRequest>,
) -> Result<Json<ContactSubmission>, AppError> {
    state
        .contact_store
        .set_status(id, req.status)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Contact submission"))
}

pub async fn delete_contact_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    deleted(state.contact_store.delete(id).await?, "Contact submission")
}

// ============================================================================
// Appointments
// ============================================================================

pub async fn list_appointments_handler(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery<AppointmentStatus>>,
) -> Result<Json<Paged<Appointment>>, AppError> {
    let page = query.page();
    Ok(Json(state.appointment_store.list(page, query.status).await?))
}

#[derive(Deserialize)]
pub struct AppointmentPatch {
    #[serde(default)]
    status: Option<AppointmentStatus>,
    #[serde(default)]
    notes: Option<String>,
}

/// Work out the row update for an admin edit
fn appointment_update(
    current: AppointmentStatus,
    patch: AppointmentPatch,
) -> Result<AppointmentUpdate, AppError> {
    let status = match patch.status {
        Some(next) if next == current => None,
        Some(next) if current.can_transition_to(next) => Some(next),
        Some(next) => {
            return Err(AppError::Conflict(format!(
                "Cannot change appointment from {} to {}",
                current.as_str(),
                next.as_str()
            )))
        }
        None => None,
    };

    Ok(AppointmentUpdate {
        status,
        notes: domain::optional_text(patch.notes, "notes", 2000)?,
        ..Default::default()
    })
}

pub async fn update_appointment_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminUser>,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<AppointmentPatch>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state
        .appointment_store
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Appointment"))?;

    let update = appointment_update(appointment.status, patch)?;
    if update.status.is_none() && update.notes.is_none() {
        return Ok(Json(appointment));
    }

    match update.status {
        Some(_) => {
            let applied = state
                .appointment_store
                .update_if_status(id, appointment.status, &update)
                .await?;
            if !applied {
                return Err(AppError::Conflict(
                    "Appointment was changed by someone else, reload and try again".to_string(),
                ));
            }
        }
        None => state.appointment_store.update(id, &update).await?,
    }
    if let Some(status) = update.status {
        info!(
            appointment_id = %id,
            status = status.as_str(),
            admin = %admin.email,
            admin_id = %admin.user_id,
            "Appointment status changed"
        );
    }

    state
        .appointment_store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Appointment"))
}

// ============================================================================
// Email templates
// ============================================================================

pub async fn list_templates_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmailTemplate>>, AppError> {
    Ok(Json(state.template_store.list().await?))
}

#[derive(Deserialize)]
pub struct TemplateRequest {
    slug: String,
    subject: String,
    html_body: String,
}

pub async fn create_template_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<TemplateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let template = NewTemplate {
        id: Uuid::new_v4(),
        slug: domain::parse_slug(&req.slug)?,
        subject: required_text(&req.subject, "subject", MAX_SUBJECT_CHARS)?,
        html_body: required_text(&req.html_body, "html_body", usize::MAX)?,
    };

    let created = state.template_store.create(&template).await?;
    info!(template_id = %created.id, slug = %created.slug, "Template created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
pub struct TemplatePatch {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    html_body: Option<String>,
}

pub async fn update_template_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<TemplatePatch>,
) -> Result<Json<EmailTemplate>, AppError> {
    let update = TemplateUpdate {
        slug: patch.slug.as_deref().map(domain::parse_slug).transpose()?,
        subject: patch
            .subject
            .as_deref()
            .map(|s| required_text(s, "subject", MAX_SUBJECT_CHARS))
            .transpose()?,
        html_body: patch
            .html_body
            .as_deref()
            .map(|s| required_text(s, "html_body", usize::MAX))
            .transpose()?,
        updated_at: Utc::now(),
    };

    state
        .template_store
        .update(id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Template"))
}

pub async fn delete_template_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    deleted(state.template_store.delete(id).await?, "Template")
}

// ============================================================================
// Sequences
// ============================================================================

pub async fn list_sequences_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Sequence>>, AppError> {
    Ok(Json(state.sequence_store.list().await?))
}

#[derive(Deserialize)]
pub struct SequenceRequest {
    name: String,
    trigger: String,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_sequence_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<SequenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = required_text(&req.name, "name", MAX_TITLE_CHARS)?;
    let trigger = required_text(&req.trigger, "trigger", 100)?;
    let sequence = state
        .sequence_store
        .create(&name, &trigger, req.active)
        .await?;
    Ok((StatusCode::CREATED, Json(sequence)))
}

#[derive(Deserialize)]
pub struct StepRequest {
    template_id: Uuid,
    #[serde(default)]
    delay_hours: i64,
    #[serde(default)]
    position: Option<i32>,
}

pub async fn add_step_handler(
    State(state): State<AppState>,
    AppPath(sequence_id): AppPath<Uuid>,
    AppJson(req): AppJson<StepRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.delay_hours < 0 {
        return Err(ValidationError::Invalid("delay_hours must not be negative".to_string()).into());
    }

    state
        .sequence_store
        .get(sequence_id)
        .await?
        .ok_or_else(|| AppError::not_found("Sequence"))?;
    state
        .template_store
        .get(req.template_id)
        .await?
        .ok_or_else(|| AppError::not_found("Template"))?;

    let position = match req.position {
        Some(position) => position,
        None => {
            let steps = state.sequence_store.steps(sequence_id).await?;
            steps.last().map_or(1, |s| s.position + 1)
        }
    };

    let step: SequenceStep = state
        .sequence_store
        .add_step(sequence_id, position, req.delay_hours, req.template_id)
        .await?;
    Ok((StatusCode::CREATED, Json(step)))
}

pub async fn list_enrollments_handler(
    State(state): State<AppState>,
    AppPath(sequence_id): AppPath<Uuid>,
    AppQuery(query): AppQuery<PageQuery>,
) -> Result<Json<Paged<Enrollment>>, AppError> {
    let page = Page::from(query);
    Ok(Json(state.sequence_store.enrollments(sequence_id, page).await?))
}

// ============================================================================
// Courses
// ============================================================================

pub async fn list_courses_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Course>>, AppError> {
    Ok(Json(state.course_store.list_all().await?))
}

#[derive(Deserialize)]
pub struct CourseRequest {
    slug: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    published: bool,
}

pub async fn create_course_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<CourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let course = NewCourse {
        id: Uuid::new_v4(),
        slug: domain::parse_slug(&req.slug)?,
        title: required_text(&req.title, "title", MAX_TITLE_CHARS)?,
        description: domain::optional_text(req.description, "description", 5000)?,
        published: req.published,
    };
    let created = state.course_store.create(&course).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_course_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(update): AppJson<CourseUpdate>,
) -> Result<Json<Course>, AppError> {
    let update = CourseUpdate {
        title: update
            .title
            .as_deref()
            .map(|t| required_text(t, "title", MAX_TITLE_CHARS))
            .transpose()?,
        description: domain::optional_text(update.description, "description", 5000)?,
        published: update.published,
    };

    state
        .course_store
        .update(id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Course"))
}

#[derive(Deserialize)]
pub struct LessonRequest {
    title: String,
    content: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    position: Option<i32>,
    #[serde(default)]
    published: bool,
}

pub async fn create_lesson_handler(
    State(state): State<AppState>,
    AppPath(course_id): AppPath<Uuid>,
    AppJson(req): AppJson<LessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let title = required_text(&req.title, "title", MAX_TITLE_CHARS)?;
    let content = required_text(&req.content, "content", usize::MAX)?;
    let video_url = domain::optional_text(req.video_url, "video_url", 500)?;

    let position = match req.position {
        Some(position) => position,
        None => state.course_store.next_lesson_position(course_id).await?,
    };

    let lesson = state
        .course_store
        .create_lesson(&NewLesson {
            id: Uuid::new_v4(),
            course_id,
            position,
            title,
            content,
            video_url,
            published: req.published,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

pub async fn update_lesson_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(update): AppJson<LessonUpdate>,
) -> Result<Json<Lesson>, AppError> {
    let update = LessonUpdate {
        title: update
            .title
            .as_deref()
            .map(|t| required_text(t, "title", MAX_TITLE_CHARS))
            .transpose()?,
        content: update
            .content
            .as_deref()
            .map(|c| required_text(c, "content", usize::MAX))
            .transpose()?,
        video_url: domain::optional_text(update.video_url, "video_url", 500)?,
        ..update
    };

    state
        .course_store
        .update_lesson(id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Lesson"))
}

pub async fn delete_lesson_handler(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    deleted(state.course_store.delete_lesson(id).await?, "Lesson")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_appointment_can_be_completed() {
        let update = appointment_update(
            AppointmentStatus::Scheduled,
            AppointmentPatch {
                status: Some(AppointmentStatus::Completed),
                notes: None,
            },
        )
        .unwrap();
        assert_eq!(update.status, Some(AppointmentStatus::Completed));
    }

    #[test]
    fn finished_appointment_cannot_reopen() {
        let result = appointment_update(
            AppointmentStatus::Completed,
            AppointmentPatch {
                status: Some(AppointmentStatus::Scheduled),
                notes: None,
            },
        );
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn same_status_is_a_no_op() {
        let update = appointment_update(
            AppointmentStatus::NoShow,
            AppointmentPatch {
                status: Some(AppointmentStatus::NoShow),
                notes: Some("  left voicemail ".into()),
            },
        )
        .unwrap();
        assert_eq!(update.status, None);
        assert_eq!(update.notes.as_deref(), Some("left voicemail"));
    }

    #[test]
    fn required_text_rules() {
        assert_eq!(required_text("  Title ", "title", 10).unwrap(), "Title");
        assert_eq!(required_text(" ", "title", 10), Err(ValidationError::Required("title")));
        assert_eq!(
            required_text("x".repeat(11).as_str(), "title", 10),
            Err(ValidationError::TooLong("title", 10))
        );
    }

    #[test]
    fn list_query_accepts_page_and_status() {
        let query: ListQuery<ContactStatus> =
            serde_json::from_value(serde_json::json!({ "page": 2, "status": "replied" })).unwrap();
        assert_eq!(query.status, Some(ContactStatus::Replied));
        assert_eq!(query.page(), Page { page: 2, per_page: 20 });
    }

    mod appointment_edits {
        use axum::body::{to_bytes, Body};
        use axum::http::{Method, Request};
        use serde_json::json;
        use tower::ServiceExt;

        use super::*;
        use crate::http::build_router;
        use crate::http::middleware::sign_jwt_for_tests;
        use crate::test_support::{appointment_row, json as reply, Stub, StubRequest};

        const APPOINTMENTS: &str = "/rest/v1/appointments";
        const APPOINTMENT_ID: &str = "33333333-3333-3333-3333-333333333333";

        fn admin_token() -> String {
            sign_jwt_for_tests(
                &json!({
                    "sub": Uuid::new_v4(),
                    "exp": Utc::now().timestamp() + 600,
                    "email": "admin@example.com"
                }),
                "jwt-secret",
            )
        }

        async fn patch(stub: &Stub, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
            let request = Request::builder()
                .method(Method::PATCH)
                .uri(format!("/api/admin/appointments/{}", APPOINTMENT_ID))
                .header("Authorization", format!("Bearer {}", admin_token()))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            let response = build_router(AppState::new(stub.config()))
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or_default())
        }

        #[tokio::test]
        async fn status_change_is_filtered_on_the_status_it_was_read_in() {
            let stub = Stub::start(|req: &StubRequest| {
                if req.is(Method::GET, APPOINTMENTS) {
                    reply(appointment_row("scheduled", "authorized"))
                } else if req.is(Method::PATCH, APPOINTMENTS) {
                    reply(json!([appointment_row("completed", "authorized")]))
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            })
            .await;

            let (status, _) = patch(&stub, json!({ "status": "completed" })).await;
            assert_eq!(status, StatusCode::OK);

            let write = &stub.matching(Method::PATCH, APPOINTMENTS)[0];
            assert_eq!(write.param("status"), Some("eq.scheduled"));
            assert_eq!(write.json()["status"], "completed");
        }

        #[tokio::test]
        async fn concurrent_status_change_is_a_conflict() {
            // The row moved on between the read and the write
            let stub = Stub::start(|req: &StubRequest| {
                if req.is(Method::GET, APPOINTMENTS) {
                    reply(appointment_row("scheduled", "authorized"))
                } else if req.is(Method::PATCH, APPOINTMENTS) {
                    reply(json!([]))
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            })
            .await;

            let (status, body) = patch(&stub, json!({ "status": "no_show" })).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert!(body["error"].as_str().unwrap().contains("changed by someone else"));
        }
    }
}
