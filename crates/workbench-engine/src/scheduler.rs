//! Named timers and fire-and-forget background jobs.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Timelike, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};
use workbench_core::WorkbenchResult;

/// Body of a periodic job. Called once per tick.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Delay from `now` to the next wall-clock instant whose minute is a
/// multiple of `minutes` and whose second is zero.
///
/// An instant exactly on a boundary schedules the following one. Intervals
/// are clamped to `1..=60`.
pub fn next_aligned_delay(now: DateTime<Utc>, minutes: u32) -> Duration {
    let step = minutes.clamp(1, 60);
    let floored = now
        .duration_trunc(ChronoDuration::minutes(1))
        .unwrap_or(now);
    let mut next = floored + ChronoDuration::minutes(1);
    while next.minute() % step != 0 {
        next += ChronoDuration::minutes(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Process-wide timer registry.
///
/// Arming a name that is already armed replaces the pending timer. Cancel
/// only stops the timer loop: a tick body already running is a separate
/// task and completes normally.
#[derive(Default)]
pub struct Scheduler {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn install(&self, name: &str, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.insert(name.to_string(), handle) {
            previous.abort();
            debug!(timer = name, "Replaced pending timer");
        }
    }

    /// Fire `job` every `period`, first at now + `period`.
    pub fn arm_fixed(&self, name: &str, period: Duration, job: JobFn) {
        let period = period.max(Duration::from_secs(1));
        let timer = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                debug!(timer = %timer, "Timer fired");
                // A tick that outlives its period delays the next one.
                let _ = tokio::spawn(job()).await;
            }
        });
        self.install(name, handle);
        info!(timer = name, period_secs = period.as_secs(), "Armed fixed timer");
    }

    /// Fire `job` on wall-clock boundaries every `minutes`, recomputing the
    /// delay after each run.
    pub fn arm_aligned(&self, name: &str, minutes: u32, job: JobFn) {
        let timer = name.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let delay = next_aligned_delay(Utc::now(), minutes);
                tokio::time::sleep(delay).await;
                debug!(timer = %timer, "Aligned timer fired");
                let _ = tokio::spawn(job()).await;
            }
        });
        self.install(name, handle);
        info!(
            timer = name,
            minutes,
            first_in_secs = next_aligned_delay(Utc::now(), minutes).as_secs(),
            "Armed aligned timer"
        );
    }

    /// Stop a timer. Returns false when nothing was armed under `name`.
    pub fn cancel(&self, name: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.remove(name) {
            Some(handle) => {
                handle.abort();
                info!(timer = name, "Cancelled timer");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, name: &str) -> bool {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.get(name).is_some_and(|h| !h.is_finished())
    }

    /// Names of the armed timers, sorted.
    pub fn armed(&self) -> Vec<String> {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = timers
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Run `fut` in the background. Failures and panics are logged here and
    /// go no further.
    pub fn spawn_callback<F>(&self, name: impl Into<String>, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = WorkbenchResult<()>> + Send + 'static,
    {
        let name = name.into();
        tokio::spawn(async move {
            match tokio::spawn(fut).await {
                Ok(Ok(())) => debug!(job = %name, "Background job finished"),
                Ok(Err(e)) => error!(job = %name, kind = e.kind(), error = %e, "Background job failed"),
                Err(e) if e.is_panic() => error!(job = %name, "Background job panicked"),
                Err(_) => debug!(job = %name, "Background job cancelled"),
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, h, m, s).unwrap()
    }

    fn counter_job(counter: Arc<AtomicUsize>) -> JobFn {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[test]
    fn test_aligned_delay() {
        assert_eq!(next_aligned_delay(at(10, 7, 0), 30), Duration::from_secs(23 * 60));
        // on a boundary: a full interval later
        assert_eq!(next_aligned_delay(at(10, 30, 0), 30), Duration::from_secs(30 * 60));
        assert_eq!(next_aligned_delay(at(10, 59, 59), 30), Duration::from_secs(1));
        assert_eq!(next_aligned_delay(at(23, 50, 0), 15), Duration::from_secs(10 * 60));

        let half = at(10, 29, 59) + ChronoDuration::milliseconds(500);
        assert_eq!(next_aligned_delay(half, 30), Duration::from_millis(500));
    }

    #[test]
    fn test_aligned_fire_times_stay_on_grid() {
        let mut now = at(10, 7, 0);
        let mut fires = Vec::new();
        for _ in 0..3 {
            now += ChronoDuration::from_std(next_aligned_delay(now, 30)).unwrap();
            fires.push(now);
        }
        assert_eq!(fires, vec![at(10, 30, 0), at(11, 0, 0), at(11, 30, 0)]);
        assert!(fires.iter().all(|f| f.minute() % 30 == 0 && f.second() == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_timer_first_fire_after_period() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.arm_fixed("balance", Duration::from_secs(60 * 60), counter_job(count.clone()));

        tokio::time::sleep(Duration::from_secs(59 * 60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_armed("balance"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_pending_timer() {
        let scheduler = Scheduler::new();
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        scheduler.arm_fixed("balance", Duration::from_secs(60 * 60), counter_job(old.clone()));

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        scheduler.arm_fixed("balance", Duration::from_secs(15 * 60), counter_job(new.clone()));

        // re-armed at 10 min: fires at 25, 40, 55
        tokio::time::sleep(Duration::from_secs(51 * 60)).await;
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.armed(), vec!["balance".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_running_body() {
        let scheduler = Scheduler::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        let job: JobFn = Arc::new(move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        scheduler.arm_fixed("slow", Duration::from_secs(60), job);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(scheduler.cancel("slow"));
        assert!(!scheduler.cancel("slow"));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed("slow"));
    }

    #[tokio::test]
    async fn test_spawn_callback_swallows_errors() {
        let scheduler = Scheduler::new();
        let handle = scheduler.spawn_callback("failing", async {
            Err::<(), _>(workbench_core::WorkbenchError::Upstream("feed down".into()))
        });
        handle.await.unwrap();

        let explode = true;
        let handle = scheduler.spawn_callback("panicking", async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        });
        handle.await.unwrap();
    }
}
