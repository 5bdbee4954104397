//! Configuration structures for link behavior.

use std::time::Duration;

/// Configuration for outbound links and inbound connections.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Initial delay before attempting reconnection
    pub initial_reconnect_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,

    /// Timeout for a single TCP connect
    pub connection_timeout: Duration,

    /// Timeout for the hello exchange once connected
    pub handshake_timeout: Duration,

    /// Maximum number of consecutive connection failures before giving up
    /// None means unlimited retries
    pub max_connection_failures: Option<u32>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            max_connection_failures: None,
        }
    }
}

impl LinkConfig {
    /// Set the reconnection backoff bounds.
    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Give up after `failures` consecutive failed connection attempts.
    pub fn with_max_connection_failures(mut self, failures: u32) -> Self {
        self.max_connection_failures = Some(failures);
        self
    }

    /// Create a configuration for low-latency local networking.
    pub fn local_network() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_secs(1),
            connection_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(500),
            max_connection_failures: None,
        }
    }

    /// Create a configuration for high-latency WAN networking.
    pub fn wan_network() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            max_connection_failures: None,
        }
    }

    /// Next backoff delay after `current`, doubled and capped.
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.max_reconnect_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = LinkConfig::default()
            .with_reconnect_delay(Duration::from_millis(100), Duration::from_millis(350));

        let mut delay = config.initial_reconnect_delay;
        let mut seen = Vec::new();
        for _ in 0..4 {
            delay = config.next_delay(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![200, 350, 350, 350]);
    }

    #[test]
    fn test_wan_preset_is_more_patient_than_local() {
        let local = LinkConfig::local_network();
        let wan = LinkConfig::wan_network();

        assert!(wan.initial_reconnect_delay > local.initial_reconnect_delay);
        assert!(wan.max_reconnect_delay > local.max_reconnect_delay);
        assert!(wan.connection_timeout > local.connection_timeout);
        assert!(wan.handshake_timeout > local.handshake_timeout);
        assert_eq!(wan.max_connection_failures, None);
        assert_eq!(wan.next_delay(Duration::from_secs(45)), Duration::from_secs(60));
    }
}
