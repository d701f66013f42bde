//! Application state shared across routes

use std::sync::Arc;

use crate::automation::{AppointmentJobs, EnrollmentManager};
use crate::config::Config;
use crate::email::EmailClient;
use crate::payments::StripeService;
use crate::store::{
    AppointmentStore, ContactStore, CourseStore, SequenceStore, SubscriberStore, SupabaseClient,
    TemplateStore,
};
use crate::util::rate_limit::FormRateLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supabase: SupabaseClient,
    pub subscriber_store: SubscriberStore,
    pub contact_store: ContactStore,
    pub appointment_store: AppointmentStore,
    pub course_store: CourseStore,
    pub template_store: TemplateStore,
    pub sequence_store: SequenceStore,
    pub email: EmailClient,
    pub stripe: StripeService,
    pub enrollment: EnrollmentManager,
    pub appointment_jobs: AppointmentJobs,
    pub form_limiter: FormRateLimiter,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize Supabase client
        let supabase = SupabaseClient::new(&config);

        // Initialize stores
        let subscriber_store = SubscriberStore::new(supabase.clone());
        let contact_store = ContactStore::new(supabase.clone());
        let appointment_store = AppointmentStore::new(supabase.clone());
        let course_store = CourseStore::new(supabase.clone());
        let template_store = TemplateStore::new(supabase.clone());
        let sequence_store = SequenceStore::new(supabase.clone());

        // Initialize outbound services
        let email = EmailClient::new(&config);
        let stripe = StripeService::new(&config);

        let enrollment = EnrollmentManager::new(
            config.clone(),
            subscriber_store.clone(),
            sequence_store.clone(),
            template_store.clone(),
            email.clone(),
        );
        let appointment_jobs = AppointmentJobs::new(
            config.clone(),
            appointment_store.clone(),
            template_store.clone(),
            email.clone(),
            stripe.clone(),
        );

        let form_limiter = FormRateLimiter::new(config.form_rate_limit_per_minute);

        Self {
            config,
            supabase,
            subscriber_store,
            contact_store,
            appointment_store,
            course_store,
            template_store,
            sequence_store,
            email,
            stripe,
            enrollment,
            appointment_jobs,
            form_limiter,
        }
    }
}
