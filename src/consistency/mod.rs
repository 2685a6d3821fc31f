//! Consistency module
//!
//! Derived rating aggregates and the strategies that keep them in step
//! with their reviews.

mod engine;
mod strategy;

pub use engine::{AggregateConsistencyEngine, ReconcileReport, RecomputeReport};
pub use strategy::{OptimisticRetryRecompute, RecomputeStrategy, TransactionalRecompute};
