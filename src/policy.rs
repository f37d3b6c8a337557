//! Whole-run and per-step timeout policy.
//!
//! Two independent layers bound a run: a whole-run deadline, applied only
//! when the caller's [`RunContext`] carries none of its own, and a per-step
//! timeout, derived fresh for every up/down invocation so one migration can
//! never silently consume the entire run budget. A zero duration disables
//! the corresponding layer.

use std::time::Duration;

use tokio::time::Instant;

/// Default whole-run timeout.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Caller-supplied context for one [`migrate`](crate::Migrator::migrate)
/// call, optionally carrying a deadline.
///
/// A deadline set here always wins over the configured whole-run timeout;
/// it is never shortened nor lengthened.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunContext {
    deadline: Option<Instant>,
}

impl RunContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context expiring at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// A context expiring `timeout` from now. A timeout too large to
    /// represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Derives run and step deadlines from the configured timeouts.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    run: Duration,
    step: Duration,
}

impl TimeoutPolicy {
    pub(crate) fn new(run: Duration, step: Duration) -> Self {
        Self { run, step }
    }

    /// The effective whole-run deadline: the caller's own deadline if it has
    /// one, otherwise now plus the configured run timeout. `None` when both
    /// layers are absent.
    pub(crate) fn run_deadline(&self, ctx: &RunContext) -> Option<Instant> {
        if let Some(deadline) = ctx.deadline() {
            // the caller's deadline is left untouched
            return Some(deadline);
        }

        if self.run.is_zero() {
            return None;
        }

        // an unrepresentable deadline is no deadline
        Instant::now().checked_add(self.run)
    }

    /// The per-step timeout, `None` when disabled.
    pub(crate) fn step_timeout(&self) -> Option<Duration> {
        (!self.step.is_zero()).then_some(self.step)
    }
}

pub(crate) fn deadline_expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
