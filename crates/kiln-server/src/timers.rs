//! Deadline bookkeeping for the poll loop.
//!
//! A handful of timers exist at any moment (two per SOL instance plus the
//! session reaper), so a flat map beats heap bookkeeping: arming a key
//! replaces its deadline, cancelling removes it, and the loop polls with
//! the nearest deadline as its timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kiln_sol::SolTimerKind;

/// Everything the loop schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Sol { instance: u8, kind: SolTimerKind },
    /// Periodic sweep of stale and torn-down sessions.
    SessionReaper,
}

/// The pending deadlines.
#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) a timer.
    pub fn arm(&mut self, key: TimerKey, after: Duration) {
        self.deadlines.insert(key, Instant::now() + after);
    }

    pub fn cancel(&mut self, key: &TimerKey) {
        self.deadlines.remove(key);
    }

    /// Time until the nearest deadline; `None` when nothing is armed.
    /// Already-expired deadlines yield a zero timeout.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.deadlines
            .values()
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Removes and returns every key whose deadline has passed.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerKey> {
        let expired: Vec<TimerKey> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACC: TimerKey = TimerKey::Sol {
        instance: 1,
        kind: SolTimerKind::Accumulate,
    };
    const RETRY: TimerKey = TimerKey::Sol {
        instance: 1,
        kind: SolTimerKind::Retry,
    };

    #[test]
    fn arm_cancel_expire() {
        let mut queue = TimerQueue::new();
        assert!(queue.next_timeout(Instant::now()).is_none());

        queue.arm(ACC, Duration::from_millis(50));
        queue.arm(RETRY, Duration::from_millis(10));

        let timeout = queue.next_timeout(Instant::now()).unwrap();
        assert!(timeout <= Duration::from_millis(10));

        queue.cancel(&RETRY);
        let timeout = queue.next_timeout(Instant::now()).unwrap();
        assert!(timeout > Duration::from_millis(10));

        // Nothing expired yet.
        assert!(queue.pop_expired(Instant::now()).is_empty());

        // Past the accumulate deadline, it pops exactly once.
        let later = Instant::now() + Duration::from_millis(60);
        assert_eq!(queue.pop_expired(later), vec![ACC]);
        assert!(queue.pop_expired(later).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn rearm_replaces_deadline() {
        let mut queue = TimerQueue::new();
        queue.arm(ACC, Duration::from_millis(5));
        queue.arm(ACC, Duration::from_secs(60));

        let soon = Instant::now() + Duration::from_millis(10);
        assert!(queue.pop_expired(soon).is_empty());
    }

    #[test]
    fn expired_deadline_yields_zero_timeout() {
        let mut queue = TimerQueue::new();
        queue.arm(TimerKey::SessionReaper, Duration::ZERO);
        let timeout = queue
            .next_timeout(Instant::now() + Duration::from_millis(1))
            .unwrap();
        assert_eq!(timeout, Duration::ZERO);
    }
}
