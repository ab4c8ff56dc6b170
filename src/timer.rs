//! Single-slot timers owned by a connection.

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// A timer that holds at most one pending deadline.
///
/// Arming replaces whatever was pending, so a slot can never fire twice for two
/// overlapping schedules. The slot is polled from the connection task through [`fired`],
/// which never resolves while nothing is armed.
///
/// [`fired`]: TimerSlot::fired
#[derive(Debug)]
pub(crate) struct TimerSlot {
    name: &'static str,
    deadline: Option<Instant>,
}

impl TimerSlot {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            deadline: None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Schedule the slot to fire `after` from now, dropping any pending deadline.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Clear the pending deadline. Returns whether one was pending.
    pub(crate) fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the pending deadline passes, disarming the slot.
    ///
    /// Cancel safe: dropping the future before it resolves leaves the deadline in place.
    pub(crate) async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending().await,
        }
    }
}
