//! Data store modules for Supabase integration

pub mod appointments;
pub mod contacts;
pub mod courses;
pub mod page;
pub mod sequences;
pub mod subscribers;
pub mod supabase;
pub mod templates;

pub use appointments::AppointmentStore;
pub use contacts::ContactStore;
pub use courses::CourseStore;
pub use sequences::SequenceStore;
pub use subscribers::SubscriberStore;
pub use supabase::SupabaseClient;
pub use templates::TemplateStore;
