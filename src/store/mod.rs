//! Store module
//!
//! Persistence layer: the [`Repository`] interface and its backends.

mod error;
mod memory;
mod postgres;
mod repository;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use repository::{RecomputeFn, Repository, TransactionCapability};
