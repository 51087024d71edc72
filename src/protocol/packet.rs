//! Packet type definitions for the `MeshCore` protocol.
//!
//! Packet types are the first byte of a received frame and indicate
//! what kind of data follows.

/// Response and push notification packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    // Command responses (0x00-0x1F)
    /// Command executed successfully (optionally with a u32 value).
    Ok = 0x00,
    /// Command failed (optionally with an error code).
    Error = 0x01,
    /// Start of contact list.
    ContactStart = 0x02,
    /// Contact data.
    Contact = 0x03,
    /// End of contact list.
    ContactEnd = 0x04,
    /// Self device information.
    SelfInfo = 0x05,
    /// Message was sent (with ack code).
    MsgSent = 0x06,
    /// Received a contact message.
    ContactMsgRecv = 0x07,
    /// Received a channel message.
    ChannelMsgRecv = 0x08,
    /// Current device time.
    CurrentTime = 0x09,
    /// No more messages available.
    NoMoreMsgs = 0x0A,
    /// Contact URI/share data.
    ContactUri = 0x0B,
    /// Battery status.
    Battery = 0x0C,
    /// Device information.
    DeviceInfo = 0x0D,
    /// Contact message with SNR (v3).
    ContactMsgRecvV3 = 0x10,
    /// Channel message with SNR (v3).
    ChannelMsgRecvV3 = 0x11,

    // Push notifications (0x80-0x8F)
    /// Advertisement from another device.
    Advertisement = 0x80,
    /// Path update notification.
    PathUpdate = 0x81,
    /// Acknowledgment received.
    Ack = 0x82,
    /// Messages are waiting.
    MessagesWaiting = 0x83,
    /// Raw radio frame report.
    RawData = 0x84,
    /// Login successful.
    LoginSuccess = 0x85,
    /// Login failed.
    LoginFailed = 0x86,
    /// Status response.
    StatusResponse = 0x87,
    /// Log data.
    LogData = 0x88,
    /// Telemetry response.
    TelemetryResponse = 0x8B,
}

impl PacketType {
    /// Attempts to parse a packet type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Ok),
            0x01 => Some(Self::Error),
            0x02 => Some(Self::ContactStart),
            0x03 => Some(Self::Contact),
            0x04 => Some(Self::ContactEnd),
            0x05 => Some(Self::SelfInfo),
            0x06 => Some(Self::MsgSent),
            0x07 => Some(Self::ContactMsgRecv),
            0x08 => Some(Self::ChannelMsgRecv),
            0x09 => Some(Self::CurrentTime),
            0x0A => Some(Self::NoMoreMsgs),
            0x0B => Some(Self::ContactUri),
            0x0C => Some(Self::Battery),
            0x0D => Some(Self::DeviceInfo),
            0x10 => Some(Self::ContactMsgRecvV3),
            0x11 => Some(Self::ChannelMsgRecvV3),
            0x80 => Some(Self::Advertisement),
            0x81 => Some(Self::PathUpdate),
            0x82 => Some(Self::Ack),
            0x83 => Some(Self::MessagesWaiting),
            0x84 => Some(Self::RawData),
            0x85 => Some(Self::LoginSuccess),
            0x86 => Some(Self::LoginFailed),
            0x87 => Some(Self::StatusResponse),
            0x88 => Some(Self::LogData),
            0x8B => Some(Self::TelemetryResponse),
            _ => None,
        }
    }

    /// Returns true if this is a push notification (unsolicited message).
    #[must_use]
    pub const fn is_push(&self) -> bool {
        (*self as u8) >= 0x80
    }

    /// Returns true if this is a response to a command.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        !self.is_push()
    }
}

impl From<PacketType> for u8 {
    fn from(pkt: PacketType) -> Self {
        pkt as Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_from_byte() {
        assert_eq!(PacketType::from_byte(0x00), Some(PacketType::Ok));
        assert_eq!(PacketType::from_byte(0x10), Some(PacketType::ContactMsgRecvV3));
        assert_eq!(PacketType::from_byte(0x80), Some(PacketType::Advertisement));
        assert_eq!(PacketType::from_byte(0x8B), Some(PacketType::TelemetryResponse));
        assert_eq!(PacketType::from_byte(0x0E), None);
        assert_eq!(PacketType::from_byte(0xFF), None);
    }

    #[test]
    fn test_from_byte_matches_discriminant() {
        for byte in 0..=255u8 {
            if let Some(pkt) = PacketType::from_byte(byte) {
                assert_eq!(u8::from(pkt), byte);
            }
        }
    }

    #[test]
    fn test_is_push() {
        assert!(!PacketType::Ok.is_push());
        assert!(!PacketType::SelfInfo.is_push());
        assert!(PacketType::SelfInfo.is_response());
        assert!(PacketType::Advertisement.is_push());
        assert!(PacketType::Ack.is_push());
        assert!(PacketType::LogData.is_push());
    }
}
