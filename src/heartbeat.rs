//! Liveness detection for an open transport.
//!
//! A probe goes out `heartbeat_interval` after the connection opens. The probe must be
//! answered by a pong within `heartbeat_timeout`, otherwise the connection is closed with
//! code `1000` and the regular close handling takes over (and reconnects). Every pong
//! schedules the next probe a full interval later.

use crate::connection::Link;
use crate::error::HeartbeatFailure;
use crate::events::Event;
use crate::timer::TimerSlot;
use crate::transport::Transport;

/// Close code used when a heartbeat fails.
pub const HEARTBEAT_FAILURE_CODE: u16 = 1000;
/// Close reason used when a heartbeat fails.
pub const HEARTBEAT_FAILURE_REASON: &str = "Heartbeat failure.";

/// Owns the probe interval and probe timeout slots of one connection.
#[derive(Debug)]
pub(crate) struct HeartbeatController {
    pub(crate) interval: TimerSlot,
    pub(crate) timeout: TimerSlot,
}

impl HeartbeatController {
    pub(crate) const fn new() -> Self {
        Self {
            interval: TimerSlot::new("heartbeat"),
            timeout: TimerSlot::new("heartbeat timeout"),
        }
    }

    pub(crate) fn start_heartbeat<T: Transport>(&mut self, link: &Link<T>) {
        self.stop_heartbeat(link);
        self.interval.arm(link.settings.heartbeat_interval);
        link.debug(&format!(
            "Started {} timer, next probe in {:?}.",
            self.interval.name(),
            link.settings.heartbeat_interval
        ));
    }

    pub(crate) fn stop_heartbeat<T: Transport>(&mut self, link: &Link<T>) {
        if self.interval.cancel() {
            link.debug(&format!("Stopped {} timer.", self.interval.name()));
        }
    }

    /// Runs when the interval slot fires.
    pub(crate) fn heartbeat<T: Transport>(&mut self, link: &mut Link<T>) {
        link.debug("Sending heartbeat.");
        link.emit(Event::Heartbeat);

        match link.ping() {
            Ok(()) => self.start_heartbeat_timeout(link),
            Err(e) => Self::heartbeat_fail(link, HeartbeatFailure::ProbeFailed(Box::new(e))),
        }
    }

    fn start_heartbeat_timeout<T: Transport>(&mut self, link: &Link<T>) {
        self.timeout.arm(link.settings.heartbeat_timeout);
        link.debug(&format!(
            "Started {} timer for {:?}.",
            self.timeout.name(),
            link.settings.heartbeat_timeout
        ));
    }

    /// A pong arrived: the connection is alive, schedule the next probe.
    pub(crate) fn stop_heartbeat_timeout<T: Transport>(&mut self, link: &Link<T>) {
        self.cancel_timeout(link);
        self.start_heartbeat(link);
    }

    pub(crate) fn cancel_timeout<T: Transport>(&mut self, link: &Link<T>) {
        if self.timeout.cancel() {
            link.debug(&format!("Stopped {} timer.", self.timeout.name()));
        }
    }

    /// Runs when the timeout slot fires before a pong was seen.
    pub(crate) fn heartbeat_timeout<T: Transport>(&self, link: &mut Link<T>) {
        let after = link.settings.heartbeat_timeout;
        link.debug(&format!("{} timer expired.", self.timeout.name()));
        Self::heartbeat_fail(link, HeartbeatFailure::Timeout(after));
    }

    fn heartbeat_fail<T: Transport>(link: &mut Link<T>, failure: HeartbeatFailure) {
        link.error(failure.into());

        if let Err(e) = link.close(HEARTBEAT_FAILURE_CODE, HEARTBEAT_FAILURE_REASON) {
            link.error(e);
        }
    }
}
