use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::reason::TriggerReason;
use super::SendResult;

/// How many inter-heartbeat intervals to keep for diagnostics.
const INTERVAL_HISTORY: usize = 60;

/// Marker for the one network send that may be outstanding. Forced triggers
/// subscribe to `result` instead of starting a second call.
#[derive(Clone)]
pub struct InFlightSend {
    pub reason: TriggerReason,
    pub result: watch::Receiver<Option<SendResult>>,
}

/// Process-wide scheduler bookkeeping. Owned by one engine instance, never
/// persisted across restarts.
#[derive(Default)]
pub struct SchedulerState {
    pub last_heartbeat_at: Option<Instant>,
    pub last_sent: Option<(f64, f64)>,
    pub intervals: VecDeque<Duration>,
    pub last_booster_at: Option<Instant>,
    pub booster_anchor: Option<(f64, f64)>,
    pub in_flight: Option<InFlightSend>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bookkeeping after a confirmed send: refresh the success timestamp,
    /// extend the interval history, remember what was sent.
    pub fn record_success(&mut self, now: Instant, lat: f64, lng: f64) {
        if let Some(prev) = self.last_heartbeat_at {
            self.push_interval(now.duration_since(prev));
        }
        self.last_heartbeat_at = Some(now);
        self.last_sent = Some((lat, lng));
    }

    pub fn heartbeat_age(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat_at.map(|t| now.duration_since(t))
    }

    fn push_interval(&mut self, interval: Duration) {
        if self.intervals.len() == INTERVAL_HISTORY {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);
    }
}
