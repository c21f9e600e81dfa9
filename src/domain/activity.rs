use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Last-activity bookkeeping shared between a resource and its idle watchdog.
#[derive(Debug)]
pub struct ActivityTracker {
    last_active: RwLock<Instant>,
    idle_timeout: Duration,
}

impl ActivityTracker {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            last_active: RwLock::new(Instant::now()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn mark_active(&self) {
        let mut last_active = self.last_active.write().unwrap_or_else(|e| e.into_inner());
        *last_active = Instant::now();
    }

    pub fn since_last_active(&self) -> Duration {
        self.last_active.read().unwrap_or_else(|e| e.into_inner()).elapsed()
    }

    pub fn is_idle(&self) -> bool {
        self.since_last_active() > self.idle_timeout
    }

    /// Time left before the idle timeout elapses, zero once it has.
    pub fn times_out_in(&self) -> Duration {
        self.idle_timeout.saturating_sub(self.since_last_active())
    }
}
