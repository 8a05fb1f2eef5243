//! Named recurring jobs over tokio timers.
//!
//! Jobs are registered paused and started explicitly. Every firing runs
//! the callback in its own task: a failing callback is logged and never
//! unschedules the job, and two firings of one job are not prevented from
//! overlapping. Stopping a job aborts its timer loop only; a firing
//! already in flight runs to completion.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ScheduleError;

/// Work run on every firing. Called once per firing so each future owns
/// its captures.
pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`JobCallback`].
pub fn callback<F, Fut>(f: F) -> JobCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// When a job fires.
#[derive(Debug, Clone)]
pub enum TimerSpec {
    /// Fixed period between firings, exact at any granularity from one
    /// second up.
    Every(Duration),
    /// Once a day at a fixed UTC hour.
    Daily { hour: u32, schedule: cron::Schedule },
    /// Full cron expression (seconds field included).
    Cron {
        expr: String,
        schedule: cron::Schedule,
    },
}

impl TimerSpec {
    pub fn every_seconds(seconds: u64) -> Result<Self, ScheduleError> {
        if seconds == 0 {
            return Err(ScheduleError::ZeroInterval);
        }
        Ok(TimerSpec::Every(Duration::from_secs(seconds)))
    }

    pub fn daily(hour: u32) -> Result<Self, ScheduleError> {
        if hour > 23 {
            return Err(ScheduleError::InvalidHour(hour));
        }
        let expr = format!("0 0 {hour} * * *");
        let schedule =
            cron::Schedule::from_str(&expr).map_err(|error| ScheduleError::InvalidSpec {
                spec: expr.clone(),
                reason: error.to_string(),
            })?;
        Ok(TimerSpec::Daily { hour, schedule })
    }

    pub fn cron(expr: &str) -> Result<Self, ScheduleError> {
        let schedule =
            cron::Schedule::from_str(expr).map_err(|error| ScheduleError::InvalidSpec {
                spec: expr.to_string(),
                reason: error.to_string(),
            })?;
        Ok(TimerSpec::Cron {
            expr: expr.to_string(),
            schedule,
        })
    }

    /// Wall-clock wait until the next calendar firing. `None` when the
    /// schedule has no upcoming fire times (or for period specs, which
    /// never call this).
    fn until_next(&self) -> Option<Duration> {
        let next = match self {
            TimerSpec::Every(_) => return None,
            TimerSpec::Daily { schedule, .. } | TimerSpec::Cron { schedule, .. } => {
                schedule.upcoming(Utc).next()?
            }
        };
        Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

impl fmt::Display for TimerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerSpec::Every(period) => write!(f, "every {}s", period.as_secs()),
            TimerSpec::Daily { hour, .. } => write!(f, "daily at {hour:02}:00 UTC"),
            TimerSpec::Cron { expr, .. } => write!(f, "cron {expr}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub running: bool,
    pub spec: String,
}

struct JobEntry {
    spec: TimerSpec,
    callback: JobCallback,
    runner: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn is_running(&self) -> bool {
        self.runner
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Registry of named timer jobs. Share behind an `Arc`; all methods take
/// `&self`.
pub struct JobScheduler {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a fixed-period job. The period is taken as given, so 3600
    /// seconds is one hourly firing, never sixty minute-drifts.
    pub async fn schedule_recurring(
        &self,
        name: &str,
        every_seconds: u64,
        callback: JobCallback,
    ) -> Result<(), ScheduleError> {
        self.insert(name, TimerSpec::every_seconds(every_seconds)?, callback)
            .await
    }

    /// Register a once-a-day job at a fixed UTC hour.
    pub async fn schedule_daily(
        &self,
        name: &str,
        hour: u32,
        callback: JobCallback,
    ) -> Result<(), ScheduleError> {
        self.insert(name, TimerSpec::daily(hour)?, callback).await
    }

    /// Register a job with an already-built spec.
    pub async fn schedule_custom(
        &self,
        name: &str,
        spec: TimerSpec,
        callback: JobCallback,
    ) -> Result<(), ScheduleError> {
        self.insert(name, spec, callback).await
    }

    async fn insert(
        &self,
        name: &str,
        spec: TimerSpec,
        callback: JobCallback,
    ) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(name) {
            return Err(ScheduleError::DuplicateJob(name.to_string()));
        }
        info!(job = name, spec = %spec, "registered job");
        jobs.insert(
            name.to_string(),
            JobEntry {
                spec,
                callback,
                runner: None,
            },
        );
        Ok(())
    }

    /// Begin firing. Starting a running job is a no-op.
    pub async fn start(&self, name: &str) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(name)
            .ok_or_else(|| ScheduleError::UnknownJob(name.to_string()))?;
        if entry.is_running() {
            debug!(job = name, "job already running");
            return Ok(());
        }
        entry.runner = Some(spawn_runner(
            name.to_string(),
            entry.spec.clone(),
            Arc::clone(&entry.callback),
        ));
        info!(job = name, spec = %entry.spec, "started job");
        Ok(())
    }

    /// Stop future firings. The job stays registered and can be started
    /// again.
    pub async fn stop(&self, name: &str) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(name)
            .ok_or_else(|| ScheduleError::UnknownJob(name.to_string()))?;
        if let Some(handle) = entry.runner.take() {
            if !handle.is_finished() {
                handle.abort();
            }
            info!(job = name, "stopped job");
        }
        Ok(())
    }

    /// Stop and forget a job.
    pub async fn remove(&self, name: &str) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .remove(name)
            .ok_or_else(|| ScheduleError::UnknownJob(name.to_string()))?;
        if let Some(handle) = entry.runner {
            handle.abort();
        }
        info!(job = name, "removed job");
        Ok(())
    }

    pub async fn start_all(&self) {
        for name in self.names().await {
            let _ = self.start(&name).await;
        }
    }

    pub async fn stop_all(&self) {
        for name in self.names().await {
            let _ = self.stop(&name).await;
        }
    }

    /// Stop and release every job. Idempotent.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.write().await;
        for (name, entry) in jobs.drain() {
            if let Some(handle) = entry.runner {
                handle.abort();
            }
            debug!(job = %name, "released job");
        }
        info!("scheduler shut down");
    }

    pub async fn status(&self, name: &str) -> Option<JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.get(name).map(|entry| JobStatus {
            name: name.to_string(),
            running: entry.is_running(),
            spec: entry.spec.to_string(),
        })
    }

    pub async fn all_statuses(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.read().await;
        let mut statuses: Vec<JobStatus> = jobs
            .iter()
            .map(|(name, entry)| JobStatus {
                name: name.clone(),
                running: entry.is_running(),
                spec: entry.spec.to_string(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    async fn names(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_runner(name: String, spec: TimerSpec, callback: JobCallback) -> JoinHandle<()> {
    tokio::spawn(async move {
        match spec {
            TimerSpec::Every(period) => {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                tick.tick().await; // Skip immediate first tick
                loop {
                    tick.tick().await;
                    fire(&name, &callback);
                }
            }
            calendar => loop {
                let Some(wait) = calendar.until_next() else {
                    warn!(job = %name, "spec has no upcoming firings, runner exiting");
                    break;
                };
                tokio::time::sleep(wait).await;
                fire(&name, &callback);
            },
        }
    })
}

/// Run one firing in its own task so the timer loop is never blocked and
/// callback errors stay contained.
fn fire(name: &str, callback: &JobCallback) {
    let future = callback();
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(error) = future.await {
            warn!(job = %name, %error, "job firing failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(count: &Arc<AtomicUsize>) -> JobCallback {
        let count = Arc::clone(count);
        callback(move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    /// Let spawned firing tasks run after the clock moves.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_job_fires_at_its_period() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_recurring("text", 5, counting(&count))
            .await
            .unwrap();

        // Registered paused: nothing fires before start.
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.start("text").await.unwrap();
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hour_long_period_fires_once_an_hour() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_recurring("hourly", 3_600, counting(&count))
            .await
            .unwrap();
        scheduler.start("hourly").await.unwrap();

        tokio::time::advance(Duration::from_secs(3_599)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_keeps_the_job_scheduled() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        scheduler
            .schedule_recurring(
                "flaky",
                1,
                callback(move || {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("generator offline")
                    }
                }),
            )
            .await
            .unwrap();
        scheduler.start("flaky").await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_firing_and_start_resumes() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_recurring("text", 2, counting(&count))
            .await
            .unwrap();
        scheduler.start("text").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.stop("text").await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.status("text").await.unwrap().running);

        scheduler.start("text").await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_until_removed() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_recurring("text", 5, counting(&count))
            .await
            .unwrap();

        let duplicate = scheduler
            .schedule_recurring("text", 9, counting(&count))
            .await;
        assert!(matches!(duplicate, Err(ScheduleError::DuplicateJob(_))));

        scheduler.remove("text").await.unwrap();
        scheduler
            .schedule_recurring("text", 9, counting(&count))
            .await
            .unwrap();
        assert_eq!(scheduler.status("text").await.unwrap().spec, "every 9s");
    }

    #[tokio::test]
    async fn unknown_job_operations_report_the_name() {
        let scheduler = JobScheduler::new();
        assert!(matches!(
            scheduler.start("ghost").await,
            Err(ScheduleError::UnknownJob(name)) if name == "ghost"
        ));
        assert!(scheduler.status("ghost").await.is_none());
    }

    #[tokio::test]
    async fn statuses_cover_all_jobs_sorted() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_recurring("voice", 60, counting(&count))
            .await
            .unwrap();
        scheduler
            .schedule_daily("morning", 9, counting(&count))
            .await
            .unwrap();
        scheduler.start("voice").await.unwrap();

        let statuses = scheduler.all_statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "morning");
        assert_eq!(statuses[0].spec, "daily at 09:00 UTC");
        assert!(!statuses[0].running);
        assert!(statuses[1].running);
    }

    #[tokio::test]
    async fn shutdown_releases_everything_and_is_idempotent() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_recurring("text", 5, counting(&count))
            .await
            .unwrap();
        scheduler.start("text").await.unwrap();

        scheduler.shutdown().await;
        assert!(scheduler.all_statuses().await.is_empty());
        scheduler.shutdown().await;
    }

    #[test]
    fn specs_validate_their_inputs() {
        assert!(matches!(
            TimerSpec::every_seconds(0),
            Err(ScheduleError::ZeroInterval)
        ));
        assert!(matches!(
            TimerSpec::daily(24),
            Err(ScheduleError::InvalidHour(24))
        ));
        assert!(matches!(
            TimerSpec::cron("not a cron"),
            Err(ScheduleError::InvalidSpec { .. })
        ));
        assert!(TimerSpec::cron("0 */10 * * * *").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cron_job_fires_on_schedule_boundaries() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let spec = TimerSpec::cron("* * * * * *").unwrap();
        scheduler
            .schedule_custom("pulse", spec, counting(&count))
            .await
            .unwrap();
        scheduler.start("pulse").await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
