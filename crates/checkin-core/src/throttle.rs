use std::time::{Duration, Instant};

/// Admits at most one frame per interval; everything in between is dropped.
///
/// Freshness over completeness: a dropped frame is never queued for later.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    /// Return `true` and start a new window if `now` is at least one interval
    /// after the last admitted frame.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_admitted {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
