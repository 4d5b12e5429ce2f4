//! Cancellable countdown that ticks once per interval and expires once.
//!
//! Each run owns its own phase cell. The timer task must move the phase
//! from `Running` to `Expired` before calling `on_expire`, and `cancel()`
//! must move it from `Running` to `Cancelled`; whichever gets the lock
//! first decides the outcome.

use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Cancelled,
    Expired,
}

pub struct CountdownTimer {
    tick: Duration,
    phase: Arc<Mutex<Phase>>,
    task: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            phase: Arc::new(Mutex::new(Phase::Cancelled)),
            task: None,
        }
    }

    /// Run for `ticks` intervals. `on_tick(remaining)` fires after every
    /// interval except the last, with strictly decreasing values; the last
    /// interval fires `on_expire` instead. A timer that is already running
    /// is cancelled first.
    pub fn start<T, E>(&mut self, handle: &Handle, ticks: u64, on_tick: T, on_expire: E)
    where
        T: Fn(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.cancel();

        let phase = Arc::new(Mutex::new(Phase::Running));
        self.phase = Arc::clone(&phase);
        let tick = self.tick;

        self.task = Some(handle.spawn(async move {
            let started = Instant::now();

            for elapsed in 1..=ticks {
                let offset = tick.saturating_mul(u32::try_from(elapsed).unwrap_or(u32::MAX));
                let at = match started.checked_add(offset) {
                    Some(at) => at,
                    None => {
                        log::error!("[COUNTDOWN] Tick {} is beyond the clock range", elapsed);
                        return;
                    }
                };
                sleep_until(at).await;
                if !still_running(&phase) {
                    return;
                }
                let remaining = ticks - elapsed;
                if remaining > 0 {
                    on_tick(remaining);
                }
            }

            let claimed = match phase.lock() {
                Ok(mut p) if *p == Phase::Running => {
                    *p = Phase::Expired;
                    true
                }
                _ => false,
            };
            if claimed {
                log::debug!("[COUNTDOWN] Expired after {} ticks", ticks);
                on_expire();
            }
        }));
    }

    /// Stop the countdown. Returns true if this call prevented the expiry,
    /// false if the timer was not running or had already expired.
    /// Safe to call any number of times.
    pub fn cancel(&mut self) -> bool {
        let prevented = match self.phase.lock() {
            Ok(mut p) if *p == Phase::Running => {
                *p = Phase::Cancelled;
                true
            }
            _ => false,
        };

        if let Some(task) = self.task.take() {
            if prevented {
                task.abort();
            }
        }
        if prevented {
            log::debug!("[COUNTDOWN] Cancelled");
        }
        prevented
    }

    pub fn is_running(&self) -> bool {
        still_running(&self.phase)
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn still_running(phase: &Mutex<Phase>) -> bool {
    phase.lock().map(|p| *p == Phase::Running).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct Recorder {
        ticks: Arc<Mutex<Vec<u64>>>,
        expired: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                ticks: Arc::new(Mutex::new(Vec::new())),
                expired: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn start(&self, timer: &mut CountdownTimer, ticks: u64) {
            let seen = Arc::clone(&self.ticks);
            let expired = Arc::clone(&self.expired);
            timer.start(
                &Handle::current(),
                ticks,
                move |remaining| seen.lock().unwrap().push(remaining),
                move || {
                    expired.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        fn ticks(&self) -> Vec<u64> {
            self.ticks.lock().unwrap().clone()
        }

        fn expired(&self) -> usize {
            self.expired.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_then_expires_once() {
        let mut timer = CountdownTimer::new(Duration::from_secs(1));
        let recorder = Recorder::new();
        recorder.start(&mut timer, 5);
        assert!(timer.is_running());

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(recorder.ticks(), vec![4, 3]);
        assert_eq!(recorder.expired(), 0);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.ticks(), vec![4, 3, 2, 1]);
        assert_eq!(recorder.expired(), 1);
        assert!(!timer.is_running());

        // Cancelling after expiry changes nothing
        assert!(!timer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_expiry() {
        let mut timer = CountdownTimer::new(Duration::from_secs(1));
        let recorder = Recorder::new();
        recorder.start(&mut timer, 5);

        sleep(Duration::from_millis(3500)).await;
        assert!(timer.cancel());
        assert!(!timer.cancel());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.ticks(), vec![4, 3, 2]);
        assert_eq!(recorder.expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle_is_noop() {
        let mut timer = CountdownTimer::new(Duration::from_secs(1));
        assert!(!timer.is_running());
        assert!(!timer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_run() {
        let mut timer = CountdownTimer::new(Duration::from_secs(1));
        let first = Recorder::new();
        let second = Recorder::new();

        first.start(&mut timer, 3);
        sleep(Duration::from_millis(1500)).await;
        second.start(&mut timer, 3);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(first.ticks(), vec![2]);
        assert_eq!(first.expired(), 0);
        assert_eq!(second.ticks(), vec![2, 1]);
        assert_eq!(second.expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let recorder = Recorder::new();
        {
            let mut timer = CountdownTimer::new(Duration::from_secs(1));
            recorder.start(&mut timer, 2);
        }
        sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.expired(), 0);
    }
}
