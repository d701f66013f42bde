//! HTTP surface: router, handlers and auth middleware

pub mod admin;
pub mod cron;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;

pub use routes::build_router;
