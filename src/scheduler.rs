//! Timer primitives
//!
//! - `ScheduledTask`: a one-shot, cancellable task bound to a monotonic deadline
//! - `spawn_tick_loop`: the recurring tick driver
//!
//! The tick loop is not a fixed-rate clock: each tick runs to completion and
//! only then is the full interval waited again, so processing latency
//! accumulates as drift.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::error;

/// One-shot task that runs a future once its deadline passes.
#[derive(Debug)]
pub struct ScheduledTask {
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Schedule `task` to run after `delay`
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::at(Instant::now() + delay, task)
    }

    /// Schedule `task` to run at `deadline`
    pub fn at<F>(deadline: Instant, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            task.await;
        });
        Self { deadline, handle }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancel the task. Cancelling a task that already ran is a no-op.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn the recurring tick driver.
///
/// The first tick fires immediately. Each tick body runs in its own task so a
/// panic inside it is logged and the loop carries on with the next interval.
pub fn spawn_tick_loop<F, Fut>(interval: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::spawn(tick()).await {
                error!(error = %e, "tick aborted unexpectedly");
            }
            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_fires_at_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let scheduled_at = Instant::now();
        let task = ScheduledTask::after(Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(task.deadline(), scheduled_at + Duration::from_secs(10));

        sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let task = ScheduledTask::after(Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_secs(5)).await;
        task.cancel();
        sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let task = ScheduledTask::after(Duration::from_secs(1), async {});
        sleep(Duration::from_secs(2)).await;

        assert!(task.is_finished());
        task.cancel();
        task.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_waits_full_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = spawn_tick_loop(Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Ticks at t = 0, 60, 120
        sleep(Duration::from_secs(150)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_survives_panic() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = spawn_tick_loop(Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first tick blows up");
                }
            }
        });

        sleep(Duration::from_secs(25)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        handle.abort();
    }
}
