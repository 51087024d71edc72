//! Message types for received and sent messages.

use crate::types::contact::{PUBLIC_KEY_PREFIX_LEN, PathLen};

/// Text type indicating message format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TextType {
    /// Plain text message.
    #[default]
    Plain = 0,
    /// Command message (CLI command to device).
    Command = 1,
    /// Signed message with signature.
    Signed = 2,
}

impl TextType {
    /// Parses text type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Command,
            2 => Self::Signed,
            _ => Self::Plain,
        }
    }
}

/// Signal quality prefix carried by v3 message frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalQuality {
    /// Signal-to-noise ratio in dB, scaled per the firmware profile.
    pub snr: f32,
}

/// A received message from a contact (private message).
#[derive(Debug, Clone, PartialEq)]
pub struct ContactMessage {
    /// 6-byte public key prefix of the sender.
    pub sender_prefix: [u8; PUBLIC_KEY_PREFIX_LEN],
    /// Hops travelled, or flood when unknown.
    pub path_len: PathLen,
    /// Text type.
    pub text_type: TextType,
    /// Sender's timestamp (Unix seconds).
    pub timestamp: u32,
    /// Message signature (if `text_type` is `Signed`).
    pub signature: Option<[u8; 4]>,
    /// Message text.
    pub text: String,
    /// Signal quality (only in v3 format).
    pub signal: Option<SignalQuality>,
}

/// A received message from a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Channel index.
    pub channel_index: u8,
    /// Hops travelled, or flood when unknown.
    pub path_len: PathLen,
    /// Text type.
    pub text_type: TextType,
    /// Sender's timestamp (Unix seconds).
    pub timestamp: u32,
    /// Message text.
    pub text: String,
    /// Signal quality (only in v3 format).
    pub signal: Option<SignalQuality>,
}

/// A message fetched from the device queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedMessage {
    /// Private message.
    Contact(ContactMessage),
    /// Channel message.
    Channel(ChannelMessage),
}

impl ReceivedMessage {
    /// Returns the message text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Contact(msg) => &msg.text,
            Self::Channel(msg) => &msg.text,
        }
    }
}

/// Confirmation that the device queued an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSent {
    /// Routing used: 0 = direct, 1 = flood.
    pub kind: u8,
    /// Code the matching ACK push will carry.
    pub expected_ack: u32,
    /// Device's suggested ACK timeout in milliseconds.
    pub suggested_timeout_ms: u32,
}

impl MessageSent {
    /// Returns true if the packet was sent by flood.
    #[must_use]
    pub const fn is_flood(&self) -> bool {
        self.kind == 1
    }
}

/// Acknowledgment received for a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    /// ACK code, if the firmware includes one.
    pub code: Option<u32>,
}
