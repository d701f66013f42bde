//! Stripe payments for appointment fees

pub mod stripe;
pub mod webhook;

pub use stripe::{StripeError, StripeService};
