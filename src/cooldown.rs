//! Post-event cooldown.
//!
//! Runs on the session worker thread: sleep one tick, decrement, check the
//! session's active flag. A stop request is therefore observed within one tick.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::session::ActiveFlag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownOutcome {
    Completed,
    /// Stopped early; `remaining` is the count that was still left.
    Cancelled { remaining: u32 },
}

#[derive(Debug)]
pub struct CooldownTimer {
    tick: Duration,
    remaining: Arc<AtomicU32>,
}

impl CooldownTimer {
    /// `remaining` is the counter other threads read for display.
    pub fn new(tick: Duration, remaining: Arc<AtomicU32>) -> Self {
        Self {
            tick,
            remaining,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Count down `seconds` ticks, calling `on_tick` with the value shown
    /// before each sleep (`seconds`, ..., 1).
    pub fn run(
        &self,
        seconds: u32,
        active: &ActiveFlag,
        mut on_tick: impl FnMut(u32),
    ) -> CooldownOutcome {
        let mut remaining = seconds;
        self.remaining.store(remaining, Ordering::SeqCst);

        while remaining > 0 {
            if !active.is_set() {
                self.remaining.store(0, Ordering::SeqCst);
                log::info!("cooldown: cancelled with {}s left", remaining);
                return CooldownOutcome::Cancelled { remaining };
            }
            on_tick(remaining);
            std::thread::sleep(self.tick);
            remaining -= 1;
            self.remaining.store(remaining, Ordering::SeqCst);
        }

        CooldownOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn timer(tick_ms: u64) -> CooldownTimer {
        CooldownTimer::new(Duration::from_millis(tick_ms), Arc::new(AtomicU32::new(0)))
    }

    #[test]
    fn completes_after_exactly_d_ticks() {
        let timer = timer(1);
        let active = ActiveFlag::new(true);
        let mut ticks = Vec::new();

        let outcome = timer.run(5, &active, |left| ticks.push(left));

        assert_eq!(outcome, CooldownOutcome::Completed);
        assert_eq!(ticks, vec![5, 4, 3, 2, 1]);
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn zero_seconds_completes_immediately() {
        let timer = timer(1);
        let active = ActiveFlag::new(true);
        let mut ticks = 0;
        assert_eq!(timer.run(0, &active, |_| ticks += 1), CooldownOutcome::Completed);
        assert_eq!(ticks, 0);
    }

    #[test]
    fn inactive_session_cancels_at_next_tick() {
        let timer = timer(1);
        let active = ActiveFlag::new(true);
        let flag = active.clone();
        let mut ticks = 0;

        let outcome = timer.run(30, &active, |left| {
            ticks += 1;
            if left == 19 {
                // Stop arrives during the 12th tick.
                flag.clear();
            }
        });

        assert_eq!(outcome, CooldownOutcome::Cancelled { remaining: 18 });
        assert_eq!(ticks, 12);
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn stop_from_another_thread_is_observed_within_one_tick() {
        let timer = timer(50);
        let active = ActiveFlag::new(true);
        let flag = active.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(120));
            flag.clear();
            Instant::now()
        });

        let outcome = timer.run(100, &active, |_| {});
        let finished = Instant::now();
        let cancelled_at = handle.join().unwrap();

        assert!(matches!(outcome, CooldownOutcome::Cancelled { .. }));
        // One tick plus scheduling slack.
        assert!(finished.duration_since(cancelled_at) <= Duration::from_millis(50 + 100));
    }
}
