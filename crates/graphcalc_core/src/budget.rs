//! Cancellation flags and wall-clock budgets checked by long sampling loops.

use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abandonment flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(EngineError::Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Millisecond wall clock. Native builds use [`SystemClock`]; the browser bridge
/// supplies its own because `std::time::Instant` is unavailable there.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// A deadline measured against a [`Clock`].
pub struct TimeBudget<'a> {
    clock: &'a dyn Clock,
    deadline_ms: f64,
}

impl<'a> TimeBudget<'a> {
    pub fn start(clock: &'a dyn Clock, budget_ms: u64) -> Self {
        Self {
            clock,
            deadline_ms: clock.now_ms() + budget_ms as f64,
        }
    }

    /// A budget that never runs out.
    pub fn unlimited(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            deadline_ms: f64::INFINITY,
        }
    }

    pub fn expired(&self) -> bool {
        self.clock.now_ms() >= self.deadline_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(f64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());
        token.cancel();
        assert_eq!(observer.check(), Err(EngineError::Cancelled));
    }

    #[test]
    fn zero_budget_expires_immediately() {
        let clock = FixedClock(10.0);
        assert!(TimeBudget::start(&clock, 0).expired());
        assert!(!TimeBudget::start(&clock, 5).expired());
        assert!(!TimeBudget::unlimited(&clock).expired());
    }
}
