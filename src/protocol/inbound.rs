//! Decoded inbound frames.

use bytes::Bytes;

use crate::config::FirmwareProfile;
use crate::error::{DecodeError, FirmwareErrorCode};
use crate::protocol::packet::PacketType;
use crate::protocol::parser;
use crate::types::{
    Acknowledgment, BatteryStatus, ChannelMessage, Contact, ContactMessage, DeviceInfo,
    DeviceStatus, MessageSent, PublicKey, RawRadioFrame, SelfInfo, TelemetryReport,
};

/// One frame from the device, decoded by opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Command succeeded, optionally returning a value.
    Ok(Option<u32>),
    /// Command failed, with a code on firmware 1.4+.
    Error(Option<FirmwareErrorCode>),
    /// Contact enumeration begins.
    ContactsStart {
        /// Number of records the device announced.
        expected: Option<u32>,
    },
    /// One contact record.
    Contact(Contact),
    /// Contact enumeration finished.
    ContactsEnd,
    /// Handshake reply.
    SelfInfo(SelfInfo),
    /// An outgoing packet was queued.
    MessageSent(MessageSent),
    /// Fetched private message.
    ContactMessage(ContactMessage),
    /// Fetched channel message.
    ChannelMessage(ChannelMessage),
    /// Device clock, Unix seconds.
    CurrentTime(u32),
    /// Message queue is empty.
    NoMoreMessages,
    /// Exported contact card.
    ContactUri(String),
    /// Battery and storage.
    Battery(BatteryStatus),
    /// Device query reply.
    DeviceInfo(DeviceInfo),
    /// A node advertised itself.
    Advert(PublicKey),
    /// The path to a contact changed.
    PathUpdate(PublicKey),
    /// A sent message was acknowledged.
    Ack(Acknowledgment),
    /// New messages are queued on the device.
    MessagesWaiting,
    /// Overheard radio frame.
    RawData(RawRadioFrame),
    /// Login accepted.
    LoginSuccess,
    /// Login rejected.
    LoginFailed,
    /// Remote node status.
    Status(DeviceStatus),
    /// Device log output.
    LogData(Bytes),
    /// Remote node telemetry.
    Telemetry(TelemetryReport),
    /// Opcode this client does not understand.
    Unknown {
        /// First byte of the frame.
        opcode: u8,
        /// Remaining bytes.
        data: Bytes,
    },
}

impl Inbound {
    /// Decodes a complete frame.
    ///
    /// Unknown opcodes decode to [`Inbound::Unknown`] rather than failing.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the frame is empty or its payload does
    /// not match the layout its opcode calls for.
    pub fn decode(frame: &Bytes, profile: FirmwareProfile) -> Result<Self, DecodeError> {
        let Some(&opcode) = frame.first() else {
            return Err(DecodeError::TooShort {
                what: "frame",
                expected: 1,
                actual: 0,
            });
        };
        let data = &frame[1..];

        let Some(packet) = PacketType::from_byte(opcode) else {
            return Ok(Self::Unknown {
                opcode,
                data: frame.slice(1..),
            });
        };

        let inbound = match packet {
            PacketType::Ok => Self::Ok(parser::parse_ok(data)),
            PacketType::Error => Self::Error(parser::parse_error(data)),
            PacketType::ContactStart => Self::ContactsStart {
                expected: parser::parse_contacts_start(data),
            },
            PacketType::Contact => Self::Contact(parser::parse_contact(data, profile)?),
            PacketType::ContactEnd => Self::ContactsEnd,
            PacketType::SelfInfo => Self::SelfInfo(parser::parse_self_info(data)?),
            PacketType::MsgSent => Self::MessageSent(parser::parse_message_sent(data)?),
            PacketType::ContactMsgRecv => {
                Self::ContactMessage(parser::parse_contact_message(data, false, profile)?)
            }
            PacketType::ContactMsgRecvV3 => {
                Self::ContactMessage(parser::parse_contact_message(data, true, profile)?)
            }
            PacketType::ChannelMsgRecv => {
                Self::ChannelMessage(parser::parse_channel_message(data, false, profile)?)
            }
            PacketType::ChannelMsgRecvV3 => {
                Self::ChannelMessage(parser::parse_channel_message(data, true, profile)?)
            }
            PacketType::CurrentTime => Self::CurrentTime(parser::parse_current_time(data)?),
            PacketType::NoMoreMsgs => Self::NoMoreMessages,
            PacketType::ContactUri => Self::ContactUri(parser::parse_contact_uri(data)),
            PacketType::Battery => Self::Battery(parser::parse_battery(data)?),
            PacketType::DeviceInfo => Self::DeviceInfo(parser::parse_device_info(data)?),
            PacketType::Advertisement => Self::Advert(parser::parse_push_key(data)?),
            PacketType::PathUpdate => Self::PathUpdate(parser::parse_push_key(data)?),
            PacketType::Ack => Self::Ack(parser::parse_ack(data)),
            PacketType::MessagesWaiting => Self::MessagesWaiting,
            PacketType::RawData => Self::RawData(parser::parse_raw_data(data)?),
            PacketType::LoginSuccess => Self::LoginSuccess,
            PacketType::LoginFailed => Self::LoginFailed,
            PacketType::StatusResponse => Self::Status(parser::parse_status(data)?),
            PacketType::LogData => Self::LogData(frame.slice(1..)),
            PacketType::TelemetryResponse => Self::Telemetry(parser::parse_telemetry(data)?),
        };
        Ok(inbound)
    }

    /// Returns true for unsolicited push notifications.
    #[must_use]
    pub const fn is_push(&self) -> bool {
        match self {
            Self::Advert(_)
            | Self::PathUpdate(_)
            | Self::Ack(_)
            | Self::MessagesWaiting
            | Self::RawData(_)
            | Self::LoginSuccess
            | Self::LoginFailed
            | Self::Status(_)
            | Self::LogData(_)
            | Self::Telemetry(_) => true,
            Self::Unknown { opcode, .. } => *opcode >= 0x80,
            _ => false,
        }
    }
}
