//! Refresh Scheduler
//!
//! Runs named refresh tasks on jittered timers:
//! - While the app is hidden, runs are skipped and the interval stretches
//! - A task's condition can hold it back
//! - A name already in flight is never started twice, including by
//!   `trigger` and `run_exclusive`
//! - A failing task is logged and rescheduled; other tasks never notice

use async_trait::async_trait;
use dashmap::DashSet;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Errors from the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown refresh task: {0}")]
    UnknownTask(String),

    #[error("Refresh {name} failed: {message}")]
    TaskFailed { name: String, message: String },

    #[error("Scheduler has been shut down")]
    ShutDown,
}

/// A unit of periodic work
#[async_trait]
pub trait RefreshTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> RefreshTask for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

/// Gate evaluated before each run
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval multiplier while hidden
    pub hidden_multiplier: u32,
    /// Delays vary by up to this fraction either way
    pub jitter_fraction: f64,
    pub min_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hidden_multiplier: 4,
            jitter_fraction: 0.1,
            min_delay: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    /// Next delay for a base interval
    pub fn delay(&self, base: Duration, hidden: bool) -> Duration {
        let multiplier = if hidden { self.hidden_multiplier.max(1) } else { 1 };
        let adjusted = base.as_secs_f64() * multiplier as f64;
        let jitter = if self.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0) * adjusted * self.jitter_fraction
        } else {
            0.0
        };
        Duration::from_secs_f64((adjusted + jitter).max(0.0)).max(self.min_delay)
    }
}

struct Shared {
    config: SchedulerConfig,
    in_flight: DashSet<String>,
    hidden: AtomicBool,
    stopped: AtomicBool,
}

/// Releases an in-flight name when dropped, even if the task panicked
struct InFlightGuard<'a> {
    set: &'a DashSet<String>,
    name: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.name);
    }
}

impl Shared {
    fn acquire(&self, name: &str) -> Option<InFlightGuard<'_>> {
        self.in_flight.insert(name.to_string()).then(|| InFlightGuard {
            set: &self.in_flight,
            name: name.to_string(),
        })
    }
}

struct Registered {
    task: Arc<dyn RefreshTask>,
    handle: JoinHandle<()>,
}

/// The scheduler
pub struct RefreshScheduler {
    shared: Arc<Shared>,
    tasks: Mutex<HashMap<String, Registered>>,
}

impl RefreshScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                in_flight: DashSet::new(),
                hidden: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a periodic task. Replaces any task with the same name. Must be
    /// called from within a tokio runtime.
    pub fn schedule(
        &self,
        name: &str,
        task: Arc<dyn RefreshTask>,
        interval: Duration,
        condition: Option<Condition>,
    ) {
        if self.shared.stopped.load(Ordering::SeqCst) {
            debug!("Ignoring schedule of {} after shutdown", name);
            return;
        }

        let shared = Arc::clone(&self.shared);
        let loop_task = Arc::clone(&task);
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut delay = shared
                .config
                .delay(interval, shared.hidden.load(Ordering::SeqCst));

            loop {
                tokio::time::sleep(delay).await;
                if shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                delay = shared.config.delay(interval, false);

                if shared.hidden.load(Ordering::SeqCst) {
                    debug!("Refresh {} deferred: hidden", task_name);
                    delay = shared.config.delay(interval, true);
                    continue;
                }
                if condition.as_ref().is_some_and(|c| !c()) {
                    debug!("Refresh {} skipped: condition not met", task_name);
                    continue;
                }
                let Some(_guard) = shared.acquire(&task_name) else {
                    debug!("Refresh {} skipped: already in flight", task_name);
                    continue;
                };

                if let Err(e) = loop_task.run().await {
                    error!("Refresh {} failed: {:#}", task_name, e);
                }
            }
        });

        let previous = self
            .tasks
            .lock()
            .insert(name.to_string(), Registered { task, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        info!("Scheduled refresh {} every {:?}", name, interval);
    }

    /// Run a task now. `Ok(false)` when it was already in flight.
    pub async fn trigger(&self, name: &str) -> Result<bool, SchedulerError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        let task = self
            .tasks
            .lock()
            .get(name)
            .map(|r| Arc::clone(&r.task))
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;

        match self.run_exclusive(name, task.run()).await {
            None => Ok(false),
            Some(Ok(())) => Ok(true),
            Some(Err(e)) => Err(SchedulerError::TaskFailed {
                name: name.to_string(),
                message: format!("{:#}", e),
            }),
        }
    }

    /// Run every scheduled task once, concurrently. Used for the initial load.
    pub async fn trigger_all(&self) -> Vec<(String, Result<bool, SchedulerError>)> {
        let names = self.task_names();
        let results = join_all(names.iter().map(|name| self.trigger(name))).await;
        names.into_iter().zip(results).collect()
    }

    /// Run arbitrary work under a name, sharing the in-flight set with the
    /// scheduled tasks. `None` when the name is already busy.
    pub async fn run_exclusive<F, T>(&self, name: &str, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _guard = self.shared.acquire(name)?;
        Some(work.await)
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.shared.hidden.store(hidden, Ordering::SeqCst);
    }

    pub fn is_hidden(&self) -> bool {
        self.shared.hidden.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.shared.in_flight.contains(name)
    }

    /// Names of scheduled tasks, sorted
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every timer. Runs already in progress are aborted at their next
    /// await point.
    pub fn shutdown(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let tasks: Vec<Registered> = self.tasks.lock().drain().map(|(_, r)| r).collect();
        for registered in &tasks {
            registered.handle.abort();
        }
        info!("Refresh scheduler stopped ({} tasks)", tasks.len());
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for registered in self.tasks.get_mut().values() {
            registered.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast() -> SchedulerConfig {
        SchedulerConfig {
            min_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn fail(message: &'static str) -> anyhow::Result<()> {
        anyhow::bail!(message)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn RefreshTask> {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
    }

    #[test]
    fn test_delay_bounds() {
        let config = SchedulerConfig::default();
        for _ in 0..100 {
            let d = config.delay(Duration::from_secs(10), false);
            assert!(d >= Duration::from_secs(9) && d <= Duration::from_secs(11));
            let d = config.delay(Duration::from_secs(10), true);
            assert!(d >= Duration::from_secs(36) && d <= Duration::from_secs(44));
        }
        assert_eq!(config.delay(Duration::from_millis(100), false), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let scheduler = Arc::new(RefreshScheduler::new(fast()));
        let starts = Arc::new(AtomicUsize::new(0));
        let task_starts = Arc::clone(&starts);
        scheduler.schedule(
            "slow",
            Arc::new(move || {
                let starts = Arc::clone(&task_starts);
                async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    anyhow::Ok(())
                }
            }),
            Duration::from_secs(3600),
            None,
        );

        let background = Arc::clone(&scheduler);
        let first = tokio::spawn(async move { background.trigger("slow").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(scheduler.is_in_flight("slow"));
        assert!(!scheduler.trigger("slow").await.unwrap());
        assert!(first.await.unwrap().unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_in_flight("slow"));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_trigger_all_runs_each_task() {
        let scheduler = RefreshScheduler::new(fast());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("a", counting(&a), Duration::from_secs(3600), None);
        scheduler.schedule("b", counting(&b), Duration::from_secs(3600), None);

        let results = scheduler.trigger_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(true))));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_failing_task_does_not_stop_others() {
        let scheduler = RefreshScheduler::new(fast());
        let good = Arc::new(AtomicUsize::new(0));
        let bad_attempts = Arc::new(AtomicUsize::new(0));

        let attempts = Arc::clone(&bad_attempts);
        scheduler.schedule(
            "bad",
            Arc::new(move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                fail("feed unreachable")
            }),
            Duration::from_millis(10),
            None,
        );
        scheduler.schedule("good", counting(&good), Duration::from_millis(10), None);

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown();

        assert!(good.load(Ordering::SeqCst) >= 3);
        assert!(bad_attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_trigger_reports_failure() {
        let scheduler = RefreshScheduler::new(fast());
        scheduler.schedule(
            "bad",
            Arc::new(|| fail("boom")),
            Duration::from_secs(3600),
            None,
        );

        let err = scheduler.trigger("bad").await.unwrap_err();
        assert!(matches!(err, SchedulerError::TaskFailed { .. }));
        assert!(matches!(
            scheduler.trigger("missing").await.unwrap_err(),
            SchedulerError::UnknownTask(_)
        ));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_hidden_defers_runs() {
        let scheduler = RefreshScheduler::new(fast());
        scheduler.set_hidden(true);
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("feeds", counting(&count), Duration::from_millis(10), None);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.set_hidden(false);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_condition_holds_task_back() {
        let scheduler = RefreshScheduler::new(fast());
        let enabled = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));

        let gate = Arc::clone(&enabled);
        scheduler.schedule(
            "layer",
            counting(&count),
            Duration::from_millis(10),
            Some(Arc::new(move || gate.load(Ordering::SeqCst))),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        enabled.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_timers() {
        let scheduler = RefreshScheduler::new(fast());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("tick", counting(&count), Duration::from_millis(5), None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown();
        let stopped_at = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
        assert!(scheduler.task_names().is_empty());
        assert!(matches!(
            scheduler.trigger("tick").await.unwrap_err(),
            SchedulerError::ShutDown
        ));
    }
}
