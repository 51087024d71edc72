//! Client configuration.
//!
//! Transport settings live next to each transport ([`SerialConfig`],
//! [`TcpConfig`]); this module holds the settings shared by every session:
//! per-operation timeouts and the firmware profile used while decoding.
//!
//! [`SerialConfig`]: crate::transport::serial::SerialConfig
//! [`TcpConfig`]: crate::transport::tcp::TcpConfig

use std::time::Duration;

/// Default timeout for a command round-trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for fetching the next queued message.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for an ACK wait.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(6);

/// Default timeout for login, status and telemetry replies.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// How a raw signal-quality byte maps to dB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnrScale {
    /// Raw value is a quarter-dB count (divide by 4).
    #[default]
    Quarter,
    /// Raw value is multiplied by 4, as early v3 clients read it.
    Quadruple,
}

impl SnrScale {
    /// Converts a raw signed SNR value to dB.
    #[must_use]
    pub fn apply(self, raw: i16) -> f32 {
        match self {
            Self::Quarter => f32::from(raw) / 4.0,
            Self::Quadruple => f32::from(raw) * 4.0,
        }
    }
}

/// How the path-length byte marks "no cached path".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathSentinel {
    /// Path length is a signed byte; any negative value means flood.
    #[default]
    Signed,
    /// Path length is unsigned; only 0xFF means flood.
    Unsigned,
}

impl PathSentinel {
    /// Decodes a raw path-length byte. `None` means no path (flood).
    #[must_use]
    pub const fn decode(self, raw: u8) -> Option<u8> {
        match self {
            Self::Signed if raw >= 0x80 => None,
            Self::Unsigned if raw == 0xFF => None,
            _ => Some(raw),
        }
    }
}

/// Firmware-generation dependent decoding choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareProfile {
    /// Scaling applied to the SNR prefix of signal-quality message opcodes.
    pub snr_scale: SnrScale,
    /// Interpretation of the path-length sentinel.
    pub path_sentinel: PathSentinel,
}

impl FirmwareProfile {
    /// Current firmware: quarter-dB SNR, signed path length.
    pub const CURRENT: Self = Self {
        snr_scale: SnrScale::Quarter,
        path_sentinel: PathSentinel::Signed,
    };

    /// Early v3 firmware clients: SNR multiplied by 4, unsigned 0xFF sentinel.
    pub const LEGACY: Self = Self {
        snr_scale: SnrScale::Quadruple,
        path_sentinel: PathSentinel::Unsigned,
    };
}

/// Settings shared by every session, independent of the transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for an ordinary command round-trip.
    pub command_timeout: Duration,
    /// Timeout for a get-next-message round-trip.
    pub message_timeout: Duration,
    /// Timeout for an ACK wait.
    pub ack_timeout: Duration,
    /// Timeout for a login reply.
    pub login_timeout: Duration,
    /// Timeout for a status reply.
    pub status_timeout: Duration,
    /// Timeout for a telemetry reply.
    pub telemetry_timeout: Duration,
    /// Capacity of the push event broadcast channel.
    pub event_capacity: usize,
    /// Decoding choices for the connected firmware.
    pub firmware: FirmwareProfile,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            login_timeout: DEFAULT_REPLY_TIMEOUT,
            status_timeout: DEFAULT_REPLY_TIMEOUT,
            telemetry_timeout: DEFAULT_REPLY_TIMEOUT,
            event_capacity: 256,
            firmware: FirmwareProfile::CURRENT,
        }
    }
}

impl ClientConfig {
    /// Sets the command timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the get-next-message timeout.
    #[must_use]
    pub const fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Sets the ACK wait timeout.
    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the login, status and telemetry reply timeouts at once.
    #[must_use]
    pub const fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self.status_timeout = timeout;
        self.telemetry_timeout = timeout;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the firmware profile.
    #[must_use]
    pub const fn firmware(mut self, profile: FirmwareProfile) -> Self {
        self.firmware = profile;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snr_scale() {
        assert!((SnrScale::Quarter.apply(40) - 10.0).abs() < f32::EPSILON);
        assert!((SnrScale::Quarter.apply(-6) + 1.5).abs() < f32::EPSILON);
        assert!((SnrScale::Quadruple.apply(3) - 12.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_path_sentinel() {
        assert_eq!(PathSentinel::Signed.decode(0xFF), None);
        assert_eq!(PathSentinel::Signed.decode(0x80), None);
        assert_eq!(PathSentinel::Signed.decode(0), Some(0));
        assert_eq!(PathSentinel::Unsigned.decode(0xFF), None);
        assert_eq!(PathSentinel::Unsigned.decode(0x80), Some(0x80));
        assert_eq!(PathSentinel::Unsigned.decode(3), Some(3));
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::default()
            .command_timeout(Duration::from_secs(2))
            .reply_timeout(Duration::from_secs(9))
            .firmware(FirmwareProfile::LEGACY);
        assert_eq!(config.command_timeout, Duration::from_secs(2));
        assert_eq!(config.login_timeout, Duration::from_secs(9));
        assert_eq!(config.telemetry_timeout, Duration::from_secs(9));
        assert_eq!(config.message_timeout, DEFAULT_MESSAGE_TIMEOUT);
        assert_eq!(config.firmware, FirmwareProfile::LEGACY);
    }
}
