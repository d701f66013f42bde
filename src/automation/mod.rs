//! Work triggered by the external cron host

pub mod enrollment;
pub mod jobs;

pub use enrollment::{EnrollmentManager, SequenceRunSummary};
pub use jobs::AppointmentJobs;
