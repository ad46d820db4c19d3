//! Background maintenance task scheduler.
//!
//! Jobs are injected at construction; each enabled job gets its own
//! `tokio::time::interval` loop. A job anchored to a UTC time of day first
//! fires at the next occurrence of that time, then every interval after it.
//! Unanchored jobs first fire one interval after start. A job runs at most
//! once at a time, both for scheduled ticks and manual triggers.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::health::{self, HealthCheck};
use crate::metrics::VaultMetrics;
use crate::{Error, Result};

/// A unit of maintenance work. Running it again after success must be safe.
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// Stable job name used for status and manual triggers.
    fn name(&self) -> &str;

    /// Run once; returns the number of items processed.
    async fn run(&self) -> Result<usize>;
}

/// Status of a maintenance task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task is idle, waiting for next run
    Idle,
    /// Task is currently running
    Running,
    /// Task completed successfully
    Completed { duration_ms: u64, processed: usize },
    /// Task failed
    Failed { error: String },
    /// Task is disabled
    Disabled,
}

/// Information about a scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    /// Task name
    pub name: String,
    /// Current status
    pub status: TaskStatus,
    /// Interval between scheduled runs
    pub interval_seconds: u64,
    /// UTC time of day of the first scheduled run, when anchored
    pub start_at: Option<NaiveTime>,
    /// Last run time
    pub last_run: Option<DateTime<Utc>>,
    /// Total successful runs
    pub success_count: u64,
    /// Total failed runs
    pub failure_count: u64,
}

/// A job with its schedule.
pub struct ScheduledJob {
    job: Arc<dyn MaintenanceJob>,
    interval: Duration,
    enabled: bool,
    start_at: Option<NaiveTime>,
    /// Held for the duration of a run
    running: Mutex<()>,
}

impl ScheduledJob {
    pub fn new(job: Arc<dyn MaintenanceJob>, interval: Duration, enabled: bool) -> Self {
        Self {
            job,
            interval,
            enabled,
            start_at: None,
            running: Mutex::new(()),
        }
    }

    /// Anchor the first scheduled run to a UTC time of day.
    pub fn with_start_at(mut self, start_at: Option<NaiveTime>) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }
}

/// Maintenance task scheduler.
pub struct MaintenanceScheduler {
    jobs: Vec<Arc<ScheduledJob>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: RwLock<HashMap<String, TaskInfo>>,
    handles: RwLock<Vec<JoinHandle<()>>>,
    metrics: Option<Arc<VaultMetrics>>,
    health: Option<Arc<HealthCheck>>,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler over the given jobs.
    pub fn new(jobs: Vec<ScheduledJob>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let scheduler = Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            shutdown_tx,
            tasks: RwLock::new(HashMap::new()),
            handles: RwLock::new(Vec::new()),
            metrics: None,
            health: None,
        };

        for job in &scheduler.jobs {
            let status = if job.enabled {
                TaskStatus::Idle
            } else {
                TaskStatus::Disabled
            };
            scheduler.register_task(job, status);
        }
        scheduler
    }

    /// Count failures in the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report run outcomes to the health check.
    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    /// Start the maintenance scheduler.
    pub async fn start(self: Arc<Self>) {
        info!("Starting maintenance scheduler");

        for job in self.jobs.iter().filter(|j| j.enabled) {
            let handle = self.spawn_job(Arc::clone(job));
            self.handles.write().push(handle);
        }

        if let Some(ref health) = self.health {
            health.mark_healthy(health::SCHEDULER);
        }

        info!(
            jobs = ?self.jobs.iter().map(|j| (j.name().to_string(), j.enabled)).collect::<Vec<_>>(),
            "Maintenance scheduler started"
        );
    }

    /// Stop the maintenance scheduler gracefully.
    pub async fn stop(&self) {
        info!("Stopping maintenance scheduler");

        // Send shutdown signal to all tasks
        let _ = self.shutdown_tx.send(());

        // Wait for all tasks to complete (with timeout)
        let handles: Vec<_> = std::mem::take(&mut *self.handles.write());
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }

        info!("Maintenance scheduler stopped");
    }

    fn register_task(&self, job: &ScheduledJob, status: TaskStatus) {
        let info = TaskInfo {
            name: job.name().to_string(),
            status,
            interval_seconds: job.interval.as_secs(),
            start_at: job.start_at,
            last_run: None,
            success_count: 0,
            failure_count: 0,
        };
        self.tasks.write().insert(job.name().to_string(), info);
    }

    /// Update task status.
    fn update_task_status(&self, name: &str, status: TaskStatus) {
        if let Some(task) = self.tasks.write().get_mut(name) {
            match &status {
                TaskStatus::Completed { .. } => {
                    task.success_count += 1;
                    task.last_run = Some(Utc::now());
                }
                TaskStatus::Failed { .. } => {
                    task.failure_count += 1;
                    task.last_run = Some(Utc::now());
                }
                _ => {}
            }
            task.status = status;
        }
    }

    /// Get status of all tasks.
    pub fn get_task_statuses(&self) -> HashMap<String, TaskInfo> {
        self.tasks.read().clone()
    }

    /// Get status of a specific task.
    pub fn get_task_status(&self, name: &str) -> Option<TaskInfo> {
        self.tasks.read().get(name).cloned()
    }

    fn spawn_job(self: &Arc<Self>, job: Arc<ScheduledJob>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = job.interval;
        let start_at = job.start_at;

        tokio::spawn(async move {
            let mut interval_timer = match start_at {
                Some(at) => {
                    let delay = delay_until(Utc::now(), at);
                    debug!(job = %job.name(), delay_secs = delay.as_secs(), "Anchored first run");
                    tokio::time::interval_at(tokio::time::Instant::now() + delay, interval)
                }
                None => {
                    let mut timer = tokio::time::interval(interval);
                    // Skip the first immediate tick
                    timer.tick().await;
                    timer
                }
            };

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        // Failures are recorded in task status; the loop keeps going
                        let _ = scheduler.run_job(&job).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(job = %job.name(), "Maintenance job received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    async fn run_job(&self, job: &ScheduledJob) -> Result<usize> {
        let _running = job.running.lock().await;
        let name = job.name();
        self.update_task_status(name, TaskStatus::Running);
        let start = Instant::now();

        debug!(job = %name, "Starting maintenance job");

        match job.job.run().await {
            Ok(processed) => {
                let duration = start.elapsed();
                info!(
                    job = %name,
                    processed = processed,
                    duration_ms = duration.as_millis() as u64,
                    "Maintenance job completed"
                );
                self.update_task_status(
                    name,
                    TaskStatus::Completed {
                        duration_ms: duration.as_millis() as u64,
                        processed,
                    },
                );
                if let Some(ref health) = self.health {
                    health.mark_healthy(health::SCHEDULER);
                }
                Ok(processed)
            }
            Err(e) => {
                error!(job = %name, error = %e, "Maintenance job failed");
                self.update_task_status(
                    name,
                    TaskStatus::Failed {
                        error: e.to_string(),
                    },
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_maintenance_failure(name);
                }
                if let Some(ref health) = self.health {
                    health.mark_degraded(health::SCHEDULER, &format!("{} job failed: {}", name, e));
                }
                Err(e)
            }
        }
    }

    /// Run a job by name now, waiting for any in-flight run of it to finish first.
    pub async fn trigger(&self, name: &str) -> Result<usize> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name() == name)
            .ok_or_else(|| Error::NotFound(format!("maintenance job '{}'", name)))?;
        self.run_job(job).await
    }

    /// Names of all registered jobs.
    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name().to_string()).collect()
    }
}

/// Time from `now` until the next occurrence of `at` (UTC), today if still ahead.
pub fn delay_until(now: DateTime<Utc>, at: NaiveTime) -> Duration {
    let today = now.date_naive();
    let mut next = today.and_time(at).and_utc();
    if next <= now {
        next = today
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at).and_utc())
            .unwrap_or(next);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
