//! Per-run capture state: where frames go, the registration context and
//! the clock that names files.

use crate::storage::StorageLayout;
use crate::transform::RegistrationContext;

/// Source of capture timestamps in milliseconds since the Unix epoch.
pub trait Clock: Send {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Everything one recording run owns besides the device.
///
/// Built once before the loop starts and consumed by
/// [`run_capture`](crate::capture::run_capture); dropping it releases the
/// registration tables and buffers.
pub struct CaptureSession {
    pub(crate) layout: StorageLayout,
    pub(crate) registration: RegistrationContext,
    clock: Box<dyn Clock>,
    iteration: u64,
}

impl CaptureSession {
    pub fn new(layout: StorageLayout, registration: RegistrationContext) -> Self {
        Self {
            layout,
            registration,
            clock: Box::new(SystemClock),
            iteration: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Number of frame sets started so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn next_iteration(&mut self) -> u64 {
        self.iteration += 1;
        self.iteration
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_epoch_millis() {
        // 2020-09-13 in milliseconds; anything earlier means seconds or a broken clock.
        assert!(SystemClock.now_ms() > 1_600_000_000_000);
    }
}
