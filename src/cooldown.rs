use std::sync::{Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

const MAX_CLOSE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Admission gate for new incidents. Closed until a reopen deadline; the
/// most recent `close_for` call sets the deadline.
pub struct CooldownGate {
    reopen_at: Mutex<Option<Instant>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self {
            reopen_at: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        match *self.deadline() {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }

    /// Close the gate for `duration` from now and return the reopen time.
    /// A duration past what the clock can represent is capped at one year.
    pub fn close_for(&self, duration: Duration) -> Instant {
        let now = Instant::now();
        let at = now
            .checked_add(duration)
            .unwrap_or_else(|| now + MAX_CLOSE);
        *self.deadline() = Some(at);
        log::debug!("[GATE] Closed for {:.0}s", duration.as_secs_f64());
        at
    }

    pub fn reopens_at(&self) -> Option<Instant> {
        *self.deadline()
    }

    /// Time left until the gate opens, zero when open.
    pub fn remaining(&self) -> Duration {
        let reopen_at = *self.deadline();
        reopen_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    // The guarded value is a plain deadline, so a poisoned lock is still usable.
    fn deadline(&self) -> MutexGuard<'_, Option<Instant>> {
        self.reopen_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_open_by_default() {
        let gate = CooldownGate::new();
        assert!(gate.is_open());
        assert_eq!(gate.remaining(), Duration::ZERO);
        assert!(gate.reopens_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_then_reopen() {
        let gate = CooldownGate::new();
        gate.close_for(Duration::from_secs(60));
        assert!(!gate.is_open());

        sleep(Duration::from_secs(59)).await;
        assert!(!gate.is_open());
        let left = gate.remaining();
        assert!(left > Duration::ZERO && left <= Duration::from_secs(1));

        sleep(Duration::from_secs(1)).await;
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_close_wins() {
        let gate = CooldownGate::new();
        gate.close_for(Duration::from_secs(60));

        sleep(Duration::from_secs(30)).await;
        let at = gate.close_for(Duration::from_secs(60));
        assert_eq!(gate.reopens_at(), Some(at));

        // The first deadline has passed, the second has not
        sleep(Duration::from_secs(45)).await;
        assert!(!gate.is_open());

        sleep(Duration::from_secs(15)).await;
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_close_does_not_overflow() {
        let gate = CooldownGate::new();
        let at = gate.close_for(Duration::MAX);
        assert!(!gate.is_open());
        assert!(at > Instant::now());

        // A later, normal close still takes over
        gate.close_for(Duration::from_secs(1));
        sleep(Duration::from_secs(1)).await;
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_close_shortens_deadline() {
        let gate = CooldownGate::new();
        gate.close_for(Duration::from_secs(60));
        gate.close_for(Duration::from_secs(5));

        sleep(Duration::from_secs(5)).await;
        assert!(gate.is_open());
    }
}
