//! Periodic scheduler.
//!
//! A cooperative driver for fixed-interval jobs. Each tick checks every job
//! and spawns the ones that are due; the tick never waits for a job. A job
//! whose previous run is still going is skipped rather than overlapped.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{CadenceError, Result};

pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type JobCallback = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

struct ScheduledJob {
    name: String,
    interval: Duration,
    next_due: Instant,
    in_flight: Arc<AtomicBool>,
    callback: JobCallback,
}

/// Clears a job's in-flight flag when its run ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub fired: Vec<String>,
    /// Due, but the previous run had not finished.
    pub skipped: Vec<String>,
}

pub struct PeriodicScheduler {
    jobs: Vec<ScheduledJob>,
    running: JoinSet<()>,
    tick: Duration,
    shutdown_grace: Duration,
    jobs_cancel: CancellationToken,
}

impl PeriodicScheduler {
    pub fn new(tick: Duration, shutdown_grace: Duration) -> Result<Self> {
        if tick.is_zero() {
            return Err(CadenceError::Config("scheduler tick must be greater than zero".into()));
        }
        Ok(Self {
            jobs: Vec::new(),
            running: JoinSet::new(),
            tick,
            shutdown_grace,
            jobs_cancel: CancellationToken::new(),
        })
    }

    /// Register a recurring job. It first becomes due one `interval` from now.
    pub fn add_job<F, Fut>(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_job_from(name, Instant::now() + interval, interval, callback)
    }

    /// Register a recurring job whose first run is due at `first_due`.
    pub fn add_job_from<F, Fut>(
        &mut self,
        name: impl Into<String>,
        first_due: Instant,
        interval: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if interval.is_zero() {
            return Err(CadenceError::Config(format!("job `{name}` has a zero interval")));
        }
        tracing::debug!(job = %name, interval_secs = interval.as_secs(), "job added");
        self.jobs.push(ScheduledJob {
            name,
            interval,
            next_due: first_due,
            in_flight: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(move |token| callback(token).boxed()),
        });
        Ok(())
    }

    /// Name and interval of every job, in registration order.
    pub fn jobs(&self) -> Vec<(String, Duration)> {
        self.jobs.iter().map(|j| (j.name.clone(), j.interval)).collect()
    }

    /// Number of job runs that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub fn run_pending(&mut self) -> TickReport {
        self.run_pending_at(Instant::now())
    }

    /// Fire every job due at `now`.
    ///
    /// Missed intervals collapse into a single run.
    pub fn run_pending_at(&mut self, now: Instant) -> TickReport {
        self.reap();
        let mut report = TickReport::default();

        for job in &mut self.jobs {
            if now < job.next_due {
                continue;
            }

            if job.in_flight.load(Ordering::Acquire) {
                tracing::warn!(job = %job.name, "previous run still in flight, skipping");
                report.skipped.push(job.name.clone());
                continue;
            }

            let late = now.saturating_duration_since(job.next_due);
            let missed = (late.as_nanos() / job.interval.as_nanos()) as u64;
            if missed > 0 {
                tracing::info!(job = %job.name, missed, "collapsing missed intervals into one run");
            }

            job.next_due = now + job.interval;
            job.in_flight.store(true, Ordering::Release);
            let guard = InFlight(job.in_flight.clone());
            let name = job.name.clone();
            let callback = Arc::clone(&job.callback);
            let token = self.jobs_cancel.child_token();

            tracing::info!(job = %name, "job fired");
            self.running.spawn(async move {
                let _guard = guard;
                let run = AssertUnwindSafe(async move { callback(token).await });
                match run.catch_unwind().await {
                    Ok(Ok(())) => tracing::debug!(job = %name, "job finished"),
                    Ok(Err(e)) => {
                        tracing::warn!(job = %name, error = %e, "job failed, stays scheduled")
                    }
                    Err(_) => tracing::error!(job = %name, "job panicked, stays scheduled"),
                }
            });
            report.fired.push(job.name.clone());
        }

        report
    }

    fn reap(&mut self) {
        while let Some(done) = self.running.try_join_next() {
            if let Err(e) = done {
                tracing::error!(error = %e, "job task ended abnormally");
            }
        }
    }

    /// Tick until `cancel` fires, then shut down.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            jobs = self.jobs.len(),
            tick_ms = self.tick.as_millis() as u64,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pending();
                }
            }
        }

        self.shutdown().await;
    }

    /// Ask running jobs to stop, wait up to the grace period, then abort.
    pub async fn shutdown(mut self) {
        self.jobs_cancel.cancel();
        let pending = self.running.len();
        if pending > 0 {
            tracing::info!(
                pending,
                grace_secs = self.shutdown_grace.as_secs(),
                "waiting for running jobs"
            );
        }

        let running = &mut self.running;
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while running.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.running.len(), "grace period elapsed, aborting jobs");
            self.running.abort_all();
            while self.running.join_next().await.is_some() {}
        }
        tracing::info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const MS: Duration = Duration::from_millis(1);

    async fn explode() -> anyhow::Result<()> {
        panic!("bug in cycle")
    }

    fn ticking_every_second() -> PeriodicScheduler {
        PeriodicScheduler::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap()
    }

    async fn settle(scheduler: &mut PeriodicScheduler) {
        while scheduler.running.join_next().await.is_some() {}
    }

    fn counting_job(scheduler: &mut PeriodicScheduler, interval: Duration) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler
            .add_job("count", interval, move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        count
    }

    #[tokio::test]
    async fn nothing_is_due_initially() {
        let mut scheduler = ticking_every_second();
        let count = counting_job(&mut scheduler, Duration::from_secs(3600));
        let report = scheduler.run_pending();
        assert!(report.fired.is_empty());
        settle(&mut scheduler).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fires_once_per_elapsed_interval() {
        let mut scheduler = ticking_every_second();
        let count = counting_job(&mut scheduler, 100 * MS);
        let start = Instant::now();

        assert!(scheduler.run_pending_at(start + 50 * MS).fired.is_empty());
        assert!(scheduler.run_pending_at(start + 60 * MS).fired.is_empty());

        assert_eq!(scheduler.run_pending_at(start + 150 * MS).fired, vec!["count"]);
        settle(&mut scheduler).await;
        assert!(scheduler.run_pending_at(start + 150 * MS).fired.is_empty());
        assert!(scheduler.run_pending_at(start + 200 * MS).fired.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(scheduler.run_pending_at(start + 260 * MS).fired, vec!["count"]);
        settle(&mut scheduler).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missed_intervals_collapse_into_one_run() {
        let mut scheduler = ticking_every_second();
        let count = counting_job(&mut scheduler, 100 * MS);
        let start = Instant::now();

        assert_eq!(scheduler.run_pending_at(start + 550 * MS).fired.len(), 1);
        settle(&mut scheduler).await;
        assert!(scheduler.run_pending_at(start + 600 * MS).fired.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_flight_job_is_skipped_not_overlapped() {
        let mut scheduler = ticking_every_second();
        let release = Arc::new(Notify::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let (r, s) = (release.clone(), starts.clone());
        scheduler
            .add_job("slow", 100 * MS, move |_| {
                let (r, s) = (r.clone(), s.clone());
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    r.notified().await;
                    Ok(())
                }
            })
            .unwrap();
        let start = Instant::now();

        assert_eq!(scheduler.run_pending_at(start + 150 * MS).fired, vec!["slow"]);
        let report = scheduler.run_pending_at(start + 300 * MS);
        assert!(report.fired.is_empty());
        assert_eq!(report.skipped, vec!["slow"]);

        release.notify_one();
        settle(&mut scheduler).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        // next_due was not advanced by the skip, so it is still due.
        assert_eq!(scheduler.run_pending_at(start + 300 * MS).fired, vec!["slow"]);
        release.notify_one();
        settle(&mut scheduler).await;
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_and_panicking_jobs_stay_scheduled() {
        let mut scheduler = ticking_every_second();
        scheduler
            .add_job("fails", 100 * MS, |_| async { Err(anyhow::anyhow!("storage offline")) })
            .unwrap();
        scheduler
            .add_job("panics", 100 * MS, |_| explode())
            .unwrap();
        let start = Instant::now();

        assert_eq!(scheduler.run_pending_at(start + 150 * MS).fired.len(), 2);
        settle(&mut scheduler).await;
        let report = scheduler.run_pending_at(start + 300 * MS);
        assert_eq!(report.fired, vec!["fails", "panics"]);
        assert!(report.skipped.is_empty());
        settle(&mut scheduler).await;
    }

    #[tokio::test]
    async fn callback_panicking_before_its_future_keeps_ticking() {
        let mut scheduler = ticking_every_second();
        scheduler
            .add_job("eager", 100 * MS, |_| -> futures::future::Ready<anyhow::Result<()>> {
                panic!("bad job setup")
            })
            .unwrap();
        let count = counting_job(&mut scheduler, 100 * MS);
        let start = Instant::now();

        assert_eq!(scheduler.run_pending_at(start + 150 * MS).fired, vec!["eager", "count"]);
        settle(&mut scheduler).await;
        assert_eq!(scheduler.run_pending_at(start + 300 * MS).fired, vec!["eager", "count"]);
        settle(&mut scheduler).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_run_can_be_pinned() {
        let mut scheduler = ticking_every_second();
        let start = Instant::now();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler
            .add_job_from("weekly", start + 30 * MS, Duration::from_secs(3600), move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        assert!(scheduler.run_pending_at(start + 10 * MS).fired.is_empty());
        assert_eq!(scheduler.run_pending_at(start + 30 * MS).fired, vec!["weekly"]);
        settle(&mut scheduler).await;
        assert!(scheduler.run_pending_at(start + 60 * MS).fired.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let err = PeriodicScheduler::new(Duration::ZERO, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut scheduler = ticking_every_second();
        let err = scheduler
            .add_job("bad", Duration::ZERO, |_| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
        assert!(scheduler.jobs().is_empty());
    }

    #[tokio::test]
    async fn run_ticks_until_cancelled() {
        let mut scheduler = PeriodicScheduler::new(10 * MS, Duration::from_secs(1)).unwrap();
        let count = counting_job(&mut scheduler, 20 * MS);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(200 * MS).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn shutdown_signals_jobs_then_aborts_stragglers() {
        let mut scheduler = PeriodicScheduler::new(Duration::from_secs(1), 50 * MS).unwrap();
        let stopped_cleanly = Arc::new(AtomicBool::new(false));
        let flag = stopped_cleanly.clone();
        scheduler
            .add_job("cooperative", 100 * MS, move |cancel| {
                let flag = flag.clone();
                async move {
                    cancel.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        scheduler
            .add_job("stubborn", 100 * MS, |_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap();

        let start = Instant::now();
        assert_eq!(scheduler.run_pending_at(start + 150 * MS).fired.len(), 2);
        assert_eq!(scheduler.in_flight(), 2);

        let began = std::time::Instant::now();
        scheduler.shutdown().await;
        assert!(began.elapsed() < Duration::from_secs(5));
        assert!(stopped_cleanly.load(Ordering::SeqCst));
    }
}
