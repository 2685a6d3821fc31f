//! city_events Library
//!
//! Event admission control and review aggregate consistency for the city
//! lifestyle platform. Re-exports modules for the server binary, the load
//! test and integration tests.

pub mod admission;
pub mod api;
pub mod consistency;
pub mod domain;
pub mod jobs;
pub mod notifications;
pub mod reviews;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorResponse};
pub use domain::DomainError;
