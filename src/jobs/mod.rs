//! Scheduled Jobs
//!
//! Background maintenance. The reconciliation job retries aggregate
//! recomputes that failed after a review write, so place ratings and user
//! stats converge even when no further review arrives.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::consistency::{AggregateConsistencyEngine, ReconcileReport};

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for aggregate reconciliation (default: 30 seconds)
    pub reconcile_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    consistency: Arc<AggregateConsistencyEngine>,
    config: JobSchedulerConfig,
}

/// Running scheduler; stop it to end the loop after the current pass
pub struct JobSchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl JobSchedulerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Job scheduler task failed");
        }
    }
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(consistency: Arc<AggregateConsistencyEngine>) -> Self {
        Self {
            consistency,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(consistency: Arc<AggregateConsistencyEngine>, config: JobSchedulerConfig) -> Self {
        Self {
            consistency,
            config,
        }
    }

    /// Start the job scheduler in the background
    pub fn start(self) -> JobSchedulerHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.run(rx).await;
        });
        JobSchedulerHandle { shutdown, task }
    }

    /// Run the scheduler loop
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.reconcile_interval.as_secs(),
            "Job scheduler started"
        );

        let mut reconcile_interval = interval(self.config.reconcile_interval);
        reconcile_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    self.reconcile().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    async fn reconcile(&self) -> ReconcileReport {
        let report = self.consistency.reconcile_pending().await;
        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                repaired = report.repaired,
                still_pending = report.still_pending,
                "Reconciled pending aggregates"
            );
        }
        report
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let reconcile = self.reconcile().await;

        let mut report = MaintenanceReport {
            aggregates_repaired: reconcile.repaired,
            aggregates_pending: reconcile.still_pending,
            ..Default::default()
        };
        if reconcile.still_pending > 0 {
            report.errors.push(format!(
                "Aggregate reconciliation: {} aggregate(s) still inconsistent",
                reconcile.still_pending
            ));
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub aggregates_repaired: usize,
    pub aggregates_pending: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}
