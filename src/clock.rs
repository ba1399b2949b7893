use actix_web::rt::time::Instant;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::backend::Timestamp;

/// Source of admission timestamps.
///
/// The wall clock is sampled once, when the clock is created; later readings advance it by the
/// monotonic (tokio) clock. Timestamps therefore never go backwards within a process, remain
/// comparable with those written by other processes into a shared store, and follow
/// `tokio::time::pause` / `advance` in tests.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Timestamp,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self::starting_at(epoch)
    }

    /// A clock that reads `epoch` now.
    pub fn starting_at(epoch: Timestamp) -> Self {
        Self {
            epoch,
            origin: Instant::now(),
        }
    }

    /// Current time in seconds since the UNIX epoch.
    pub fn now(&self) -> Timestamp {
        self.epoch + self.origin.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
