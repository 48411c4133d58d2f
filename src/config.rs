//! Endpoint tunables and their bounds.
//!
//! A [`Config`] travels with the endpoint for its whole life; the MTU and
//! round-trip timeout are frozen while a connection is active because they
//! are negotiated with the peer during the handshake.

use thiserror::Error;

use crate::packet::{HEADER_SIZE, SYN_PAYLOAD_SIZE};

/// Smallest usable MTU: a header plus the handshake parameter payload.
pub const MIN_MTU: u16 = (HEADER_SIZE + SYN_PAYLOAD_SIZE) as u16;

/// Smallest accepted round-trip wait in milliseconds.
pub const MIN_TIMEOUT_MS: u16 = 10;

/// Default MTU in bytes (header included).
pub const DEFAULT_MTU: u16 = 1458;

/// Default per-round-trip wait in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u16 = 100;

/// Default retransmission budget per logical operation.
pub const DEFAULT_MAX_RETRIES: u16 = 50;

/// Errors from rejected configuration values.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MTU must be at least {MIN_MTU} bytes, got {0}")]
    MtuTooSmall(u16),
    #[error("timeout must be at least {MIN_TIMEOUT_MS} ms, got {0}")]
    TimeoutTooSmall(u16),
    #[error("at least one delivery attempt is required")]
    ZeroRetries,
}

/// Tunable parameters of an endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum datagram size this endpoint emits, header included.
    pub mtu: u16,
    /// How long to wait for an ACK / SYN|ACK / FIN|ACK before retransmitting.
    pub timeout_ms: u16,
    /// Attempts per logical operation (one handshake, one teardown, one
    /// segment's ACK wait) before giving up.
    pub max_retries: u16,
    /// Emit per-transfer accounting via `log::debug!`.  Also advertised to
    /// the peer in the handshake payload.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            debug: false,
        }
    }
}

impl Config {
    /// Check every field against its lower bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < MIN_MTU {
            return Err(ConfigError::MtuTooSmall(self.mtu));
        }
        if self.timeout_ms < MIN_TIMEOUT_MS {
            return Err(ConfigError::TimeoutTooSmall(self.timeout_ms));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn bounds_are_enforced() {
        let mut cfg = Config::default();
        cfg.mtu = MIN_MTU - 1;
        assert_eq!(cfg.validate(), Err(ConfigError::MtuTooSmall(MIN_MTU - 1)));

        let mut cfg = Config::default();
        cfg.timeout_ms = MIN_TIMEOUT_MS - 1;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TimeoutTooSmall(MIN_TIMEOUT_MS - 1))
        );

        let mut cfg = Config::default();
        cfg.max_retries = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroRetries));
    }

    #[test]
    fn minimum_values_are_accepted() {
        let cfg = Config {
            mtu: MIN_MTU,
            timeout_ms: MIN_TIMEOUT_MS,
            max_retries: 1,
            debug: false,
        };
        assert_eq!(cfg.validate(), Ok(()));
    }
}
