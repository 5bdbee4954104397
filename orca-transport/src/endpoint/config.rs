//! Node configuration.

use std::time::Duration;

use crate::error::EndPointError;
use crate::link::LinkConfig;

/// Period of the mail-drain timer.
pub const MAIL_PROCESS_PERIOD: Duration = Duration::from_millis(10);

/// Default number of drain ticks a mail may wait for its destination.
///
/// With the default period this tolerates a peer registering up to five
/// seconds after mail was sent to it.
pub const DEFAULT_MAX_DISPATCH_ATTEMPTS: u32 = 500;

/// Configuration for an [`crate::EndPoint`].
#[derive(Clone, Debug)]
pub struct EndPointConfig {
    /// Period of the mail-drain timer
    pub mail_period: Duration,

    /// Ticks a mail may stay undeliverable before it is dropped and
    /// reported as unroutable
    pub max_dispatch_attempts: u32,

    /// Behavior of outbound links and accepted connections
    pub link: LinkConfig,
}

impl Default for EndPointConfig {
    fn default() -> Self {
        Self {
            mail_period: MAIL_PROCESS_PERIOD,
            max_dispatch_attempts: DEFAULT_MAX_DISPATCH_ATTEMPTS,
            link: LinkConfig::default(),
        }
    }
}

impl EndPointConfig {
    /// Set the number of ticks a mail may wait for its destination.
    pub fn with_max_dispatch_attempts(mut self, attempts: u32) -> Self {
        self.max_dispatch_attempts = attempts;
        self
    }

    /// Set the link configuration.
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Create a configuration for nodes on one host or LAN.
    pub fn local_network() -> Self {
        Self {
            link: LinkConfig::local_network(),
            ..Self::default()
        }
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a zero timer period or a zero
    /// attempt bound.
    pub fn validate(&self) -> Result<(), EndPointError> {
        if self.mail_period.is_zero() {
            return Err(EndPointError::invalid("mail period must be non-zero"));
        }
        if self.max_dispatch_attempts == 0 {
            return Err(EndPointError::invalid(
                "max dispatch attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_ten_millisecond_period() {
        let config = EndPointConfig::default();
        assert_eq!(config.mail_period, Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_attempts = EndPointConfig::default().with_max_dispatch_attempts(0);
        assert!(matches!(
            zero_attempts.validate(),
            Err(EndPointError::InvalidConfiguration { .. })
        ));

        let zero_period = EndPointConfig {
            mail_period: Duration::ZERO,
            ..EndPointConfig::default()
        };
        assert!(zero_period.validate().is_err());
    }
}
