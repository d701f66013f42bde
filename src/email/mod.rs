//! Outgoing email: Resend client and template rendering

pub mod resend;
pub mod template;

pub use resend::{EmailClient, EmailError, OutgoingEmail};
pub use template::TemplateVars;
