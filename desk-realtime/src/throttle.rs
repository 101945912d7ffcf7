//! Cooldown gate for document subscribes.
//!
//! One gate per client, shared by every document key: while the cooldown
//! from the last admitted subscribe is running, all further subscribes are
//! refused, whichever document they target.

use std::time::{Duration, Instant};

/// Cooldown between two admitted document subscribes.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);

/// Admits at most one call per cooldown.
#[derive(Debug, Clone)]
pub struct ThrottleGuard {
    cooldown: Duration,
    last_admitted: Option<Instant>,
}

impl ThrottleGuard {
    /// Disarmed gate with the given cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_admitted: None,
        }
    }

    /// Admit a call at `now` unless the gate is armed. Admission re-arms it.
    pub fn try_admit(&mut self, now: Instant) -> bool {
        if self.is_armed(now) {
            return false;
        }
        self.last_admitted = Some(now);
        true
    }

    /// Whether a call at `now` would be refused.
    pub fn is_armed(&self, now: Instant) -> bool {
        self.last_admitted
            .is_some_and(|last| now.saturating_duration_since(last) < self.cooldown)
    }

    /// Configured cooldown.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Disarm, so the next call is admitted.
    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}

impl Default for ThrottleGuard {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_admitted() {
        let mut guard = ThrottleGuard::default();
        assert!(!guard.is_armed(Instant::now()));
        assert!(guard.try_admit(Instant::now()));
    }

    #[test]
    fn test_refuses_within_cooldown() {
        let mut guard = ThrottleGuard::default();
        let t0 = Instant::now();
        assert!(guard.try_admit(t0));
        assert!(!guard.try_admit(t0 + Duration::from_millis(999)));
        assert!(guard.is_armed(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_refusal_does_not_extend_window() {
        let mut guard = ThrottleGuard::default();
        let t0 = Instant::now();
        assert!(guard.try_admit(t0));
        assert!(!guard.try_admit(t0 + Duration::from_millis(900)));
        assert!(guard.try_admit(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_admission_rearms() {
        let mut guard = ThrottleGuard::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(guard.try_admit(t0));
        let t1 = t0 + Duration::from_millis(150);
        assert!(guard.try_admit(t1));
        assert!(!guard.try_admit(t1 + Duration::from_millis(50)));
    }

    #[test]
    fn test_reset_disarms() {
        let mut guard = ThrottleGuard::default();
        let t0 = Instant::now();
        guard.try_admit(t0);
        guard.reset();
        assert!(guard.try_admit(t0));
    }

    #[test]
    fn test_clock_going_backwards_counts_as_armed() {
        let mut guard = ThrottleGuard::default();
        let t0 = Instant::now() + Duration::from_secs(5);
        guard.try_admit(t0);
        assert!(guard.is_armed(t0 - Duration::from_secs(1)));
    }
}
