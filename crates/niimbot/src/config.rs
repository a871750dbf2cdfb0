//! Session timing and protocol configuration.

use std::time::Duration;

use crate::lock::DeviceLocks;

/// Configuration for a [`PrintSession`](crate::PrintSession).
///
/// Defaults follow what the B1 and D110 firmware tolerate:
/// - `connect_timeout`: 10s (includes locating the device)
/// - `read_timeout`: 3s per acknowledgement
/// - `poll_interval`: 300ms between status queries
/// - `completion_timeout`: 10s without a finished status fails the job
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    /// Maximum wait for one notification after a command.
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    /// Overall bound on the completion poll.
    pub completion_timeout: Duration,
    /// Label type sent with SetLabelType (1 = gapped labels).
    pub label_type: u8,
    /// Consecutive corrupt notifications tolerated before failing.
    pub max_checksum_failures: u32,
    /// Registry used to refuse concurrent sessions on one device.
    pub locks: DeviceLocks,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(300),
            completion_timeout: Duration::from_secs(10),
            label_type: 1,
            max_checksum_failures: 3,
            locks: DeviceLocks::global(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, val: Duration) -> Self {
        self.connect_timeout = val;
        self
    }

    /// Builder: set the per-notification read timeout.
    pub fn with_read_timeout(mut self, val: Duration) -> Self {
        self.read_timeout = val;
        self
    }

    /// Builder: set the completion poll interval.
    pub fn with_poll_interval(mut self, val: Duration) -> Self {
        self.poll_interval = val;
        self
    }

    /// Builder: set the overall completion timeout.
    pub fn with_completion_timeout(mut self, val: Duration) -> Self {
        self.completion_timeout = val;
        self
    }

    /// Builder: set the label type.
    ///
    /// # Panics
    /// Panics if value is not in 1..=3.
    pub fn with_label_type(mut self, val: u8) -> Self {
        assert!(
            (1..=3).contains(&val),
            "Label type must be between 1 and 3, got {val}"
        );
        self.label_type = val;
        self
    }

    /// Builder: use a dedicated lock registry instead of the process-wide one.
    pub fn with_locks(mut self, locks: DeviceLocks) -> Self {
        self.locks = locks;
        self
    }
}
