//! Counters and connection state for a single link.

use std::time::Duration;

/// Metrics and state information for a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMetrics {
    /// Total number of connection attempts made
    pub connection_attempts: u64,

    /// Total number of connections established (handshake included)
    pub connections_established: u64,

    /// Total number of failed connection attempts
    pub connection_failures: u64,

    /// Total number of established connections that were later lost
    pub connections_lost: u64,

    /// Total number of mails written to the socket
    pub mails_sent: u64,

    /// Total number of mails read from the socket
    pub mails_received: u64,

    /// Total bytes written
    pub bytes_sent: u64,

    /// Total bytes read
    pub bytes_received: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u32,

    /// Current reconnection delay
    pub current_reconnect_delay: Duration,

    /// Whether the link is currently connected
    pub is_connected: bool,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMetrics {
    /// Create a zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            connection_attempts: 0,
            connections_established: 0,
            connection_failures: 0,
            connections_lost: 0,
            mails_sent: 0,
            mails_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            consecutive_failures: 0,
            current_reconnect_delay: Duration::ZERO,
            is_connected: false,
        }
    }

    /// Record a connection attempt.
    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    /// Record a connection that completed its handshake.
    pub fn record_connection_success(&mut self) {
        self.connections_established += 1;
        self.consecutive_failures = 0;
        self.current_reconnect_delay = Duration::ZERO;
        self.is_connected = true;
    }

    /// Record a failed attempt and the delay before the next one.
    pub fn record_connection_failure(&mut self, reconnect_delay: Duration) {
        self.connection_failures += 1;
        self.consecutive_failures += 1;
        self.current_reconnect_delay = reconnect_delay;
        self.is_connected = false;
    }

    /// Record the loss of an established connection.
    pub fn record_connection_lost(&mut self) {
        self.connections_lost += 1;
        self.is_connected = false;
    }

    /// Record a mail written.
    pub fn record_mail_sent(&mut self, bytes: usize) {
        self.mails_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a mail read.
    pub fn record_mail_received(&mut self, bytes: usize) {
        self.mails_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Connection success rate as a percentage.
    pub fn connection_success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            100.0
        } else {
            (self.connections_established as f64 / self.connection_attempts as f64) * 100.0
        }
    }
}
