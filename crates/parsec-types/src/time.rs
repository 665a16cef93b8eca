//! Time source and clock-drift checks
//!
//! Certificates and manifests carry timestamps produced by a [`TimeProvider`].
//! Tests shift or freeze the provider to simulate clock drift against the
//! server.

use parking_lot::Mutex;
use std::sync::Arc;

/// Timestamp type used throughout the engine
pub type DateTime = chrono::DateTime<chrono::Utc>;

/// How far (in seconds) the client clock may be behind the server clock
pub const BALLPARK_CLIENT_EARLY_OFFSET: f64 = 300.0;

/// How far (in seconds) the client clock may be ahead of the server clock
pub const BALLPARK_CLIENT_LATE_OFFSET: f64 = 320.0;

/// Whether a client timestamp is acceptable given the server's own clock
///
/// The client may be at most [`BALLPARK_CLIENT_EARLY_OFFSET`] seconds
/// behind, and at most [`BALLPARK_CLIENT_LATE_OFFSET`] seconds ahead.
pub fn timestamps_in_the_ballpark(client: DateTime, server: DateTime) -> bool {
    let delta = (client - server).num_milliseconds() as f64 / 1000.0;
    -BALLPARK_CLIENT_EARLY_OFFSET <= delta && delta <= BALLPARK_CLIENT_LATE_OFFSET
}

/// Configuration of a mocked clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockedTime {
    /// Use the system clock
    RealTime,
    /// Always return the same instant
    FrozenTime(DateTime),
    /// System clock shifted by a fixed duration
    ShiftedBy(chrono::Duration),
}

/// Shared, controllable time source
///
/// Clones share the same mock configuration, so a test can shift the clock of
/// a running client by keeping a clone of its provider.
#[derive(Debug, Clone)]
pub struct TimeProvider {
    mock: Arc<Mutex<MockedTime>>,
}

impl Default for TimeProvider {
    fn default() -> Self {
        Self {
            mock: Arc::new(Mutex::new(MockedTime::RealTime)),
        }
    }
}

impl TimeProvider {
    /// Current time according to this provider
    pub fn now(&self) -> DateTime {
        match *self.mock.lock() {
            MockedTime::RealTime => chrono::Utc::now(),
            MockedTime::FrozenTime(frozen) => frozen,
            MockedTime::ShiftedBy(shift) => chrono::Utc::now() + shift,
        }
    }

    /// Replace the mock configuration
    pub fn mock_time(&self, mock: MockedTime) {
        *self.mock.lock() = mock;
    }

    /// Current mock configuration
    pub fn mocked(&self) -> MockedTime {
        *self.mock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ballpark_bounds() {
        let server = chrono::Utc::now();
        assert!(timestamps_in_the_ballpark(server, server));
        assert!(timestamps_in_the_ballpark(server - Duration::seconds(300), server));
        assert!(!timestamps_in_the_ballpark(server - Duration::seconds(301), server));
        assert!(timestamps_in_the_ballpark(server + Duration::seconds(320), server));
        assert!(!timestamps_in_the_ballpark(server + Duration::seconds(321), server));
    }

    #[test]
    fn test_mocked_time_is_shared_between_clones() {
        let provider = TimeProvider::default();
        let clone = provider.clone();
        let frozen = chrono::Utc::now() - Duration::days(3);
        clone.mock_time(MockedTime::FrozenTime(frozen));
        assert_eq!(provider.now(), frozen);
        provider.mock_time(MockedTime::RealTime);
        assert_eq!(clone.mocked(), MockedTime::RealTime);
    }
}
