//! Remote node status and observability reports.

use bytes::Bytes;

use crate::types::contact::PUBLIC_KEY_PREFIX_LEN;

/// Status reported by a remote node in reply to a status request.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    /// 6-byte public key prefix of the reporting node.
    pub pubkey_prefix: [u8; PUBLIC_KEY_PREFIX_LEN],
    /// Battery voltage in millivolts.
    pub battery_mv: u16,
    /// Packets waiting to be transmitted.
    pub tx_queue_len: u16,
    /// Free slots in the packet pool.
    pub free_queue_len: u16,
    /// Last RSSI in dBm.
    pub last_rssi: i16,
    /// Total packets received.
    pub packets_received: u32,
    /// Total packets sent.
    pub packets_sent: u32,
    /// Total TX airtime in seconds.
    pub airtime_secs: u32,
    /// Uptime in seconds.
    pub uptime_secs: u32,
    /// Flood packets sent.
    pub sent_flood: u32,
    /// Direct packets sent.
    pub sent_direct: u32,
    /// Flood packets received.
    pub recv_flood: u32,
    /// Direct packets received.
    pub recv_direct: u32,
    /// Queue-full events.
    pub full_events: u16,
    /// Last SNR in dB.
    pub last_snr: f32,
    /// Duplicate direct packets.
    pub direct_dups: u16,
    /// Duplicate flood packets.
    pub flood_dups: u16,
    /// Total RX airtime in seconds (newer firmware only).
    pub rx_airtime_secs: Option<u32>,
}

/// A raw radio frame the device overheard.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRadioFrame {
    /// Signal-to-noise ratio in dB.
    pub snr: f32,
    /// Received signal strength in dBm.
    pub rssi: i8,
    /// Undecoded over-the-air payload.
    pub payload: Bytes,
}

/// Telemetry returned by a remote node.
///
/// The readings are Cayenne LPP encoded and kept as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryReport {
    /// 6-byte public key prefix of the reporting node.
    pub pubkey_prefix: [u8; PUBLIC_KEY_PREFIX_LEN],
    /// LPP-encoded sensor readings.
    pub lpp: Bytes,
}

impl TelemetryReport {
    /// Returns the sender prefix as hex.
    #[must_use]
    pub fn sender_hex(&self) -> String {
        hex::encode(self.pubkey_prefix)
    }
}
