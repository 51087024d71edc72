//! Outbound commands.
//!
//! Commands are sent to the device to perform actions or request data.
//! Each command starts with an opcode byte, optionally followed by parameters.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::parser::COORD_SCALE;
use crate::types::contact::{MAX_NAME_LEN, MAX_PATH_LEN, PUBLIC_KEY_PREFIX_LEN};
use crate::types::{Contact, PublicKey};

/// Protocol version announced in the device query.
pub const APP_PROTOCOL_VERSION: u8 = 3;

/// Application name sent with the handshake.
pub const APP_NAME: &str = "mccli";

/// Command opcodes sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Initialize connection, returns `SelfInfo`.
    AppStart = 0x01,
    /// Send a private message (followed by subtype).
    SendMessage = 0x02,
    /// Send a channel message.
    SendChannelMsg = 0x03,
    /// Get contact list.
    GetContacts = 0x04,
    /// Get current device time.
    GetTime = 0x05,
    /// Set device time.
    SetTime = 0x06,
    /// Send advertisement.
    SendAdvert = 0x07,
    /// Set device name.
    SetName = 0x08,
    /// Update contact.
    UpdateContact = 0x09,
    /// Get next waiting message.
    GetMessage = 0x0A,
    /// Set radio parameters.
    SetRadio = 0x0B,
    /// Set TX power.
    SetTxPower = 0x0C,
    /// Reset path for a contact.
    ResetPath = 0x0D,
    /// Set device coordinates.
    SetCoords = 0x0E,
    /// Remove a contact.
    RemoveContact = 0x0F,
    /// Share contact over the mesh.
    ShareContact = 0x10,
    /// Export contact (or self) as a card.
    ExportContact = 0x11,
    /// Reboot device.
    Reboot = 0x13,
    /// Get battery status.
    GetBattery = 0x14,
    /// Set tuning parameters.
    SetTuning = 0x15,
    /// Query device info.
    DeviceQuery = 0x16,
    /// Send login request.
    SendLogin = 0x1A,
    /// Send status request.
    SendStatusReq = 0x1B,
    /// Set device PIN.
    SetDevicePin = 0x25,
    /// Request telemetry from a remote node.
    Telemetry = 0x27,
}

impl From<CommandOpcode> for u8 {
    fn from(cmd: CommandOpcode) -> Self {
        cmd as Self
    }
}

/// Message send subtypes (used with `SendMessage` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Private message to a contact.
    Private = 0x00,
    /// Command to a contact.
    Command = 0x01,
}

impl From<MessageType> for u8 {
    fn from(msg: MessageType) -> Self {
        msg as Self
    }
}

/// A command ready to be encoded for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Handshake; answered by self info.
    AppStart,
    /// Query firmware details.
    DeviceQuery,
    /// Enumerate contacts.
    GetContacts,
    /// Read the device clock.
    GetTime,
    /// Set the device clock (Unix seconds).
    SetTime(u32),
    /// Advertise this node, optionally by flood.
    SendAdvert {
        /// Flood the advert across the mesh instead of zero-hop.
        flood: bool,
    },
    /// Set the advertised name.
    SetName(String),
    /// Write back a contact record.
    UpdateContact(Box<Contact>),
    /// Fetch the next queued message.
    GetMessage,
    /// Set radio parameters.
    SetRadio {
        /// Frequency in MHz.
        frequency_mhz: f64,
        /// Bandwidth in kHz.
        bandwidth_khz: f64,
        /// Spreading factor.
        spreading_factor: u8,
        /// Coding rate.
        coding_rate: u8,
    },
    /// Set TX power in dBm.
    SetTxPower(u32),
    /// Forget the path to a contact.
    ResetPath(PublicKey),
    /// Set advertised coordinates in degrees.
    SetCoords {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lon: f64,
    },
    /// Delete a contact.
    RemoveContact(PublicKey),
    /// Share a contact over the mesh.
    ShareContact(PublicKey),
    /// Export a contact card, or our own when `None`.
    ExportContact(Option<PublicKey>),
    /// Reboot the device. No response follows.
    Reboot,
    /// Read battery and storage.
    GetBattery,
    /// Set radio tuning.
    SetTuning {
        /// RX delay base.
        rx_delay: u32,
        /// Airtime factor.
        airtime_factor: u32,
    },
    /// Set the BLE pairing PIN.
    SetDevicePin(u32),
    /// Log in to a repeater or room server.
    SendLogin {
        /// Target node.
        key: PublicKey,
        /// Password.
        password: String,
    },
    /// Ask a node for its status.
    SendStatusReq(PublicKey),
    /// Ask a node for its telemetry.
    SendTelemetryReq(PublicKey),
    /// Send a private message or a CLI command to a contact.
    SendMessage {
        /// Message or command.
        kind: MessageType,
        /// Retry attempt.
        attempt: u8,
        /// Sender timestamp.
        timestamp: u32,
        /// Recipient key prefix.
        recipient: [u8; PUBLIC_KEY_PREFIX_LEN],
        /// Text.
        text: String,
    },
    /// Send a message on a channel.
    SendChannelMessage {
        /// Channel index.
        channel: u8,
        /// Sender timestamp.
        timestamp: u32,
        /// Text.
        text: String,
    },
}

fn encode_coord(degrees: f64) -> i32 {
    (degrees * COORD_SCALE).round() as i32
}

fn put_padded(buf: &mut BytesMut, data: &[u8], width: usize) {
    let len = data.len().min(width);
    buf.put_slice(&data[..len]);
    buf.put_bytes(0, width - len);
}

impl Command {
    /// Returns the opcode byte.
    #[must_use]
    pub const fn opcode(&self) -> CommandOpcode {
        match self {
            Self::AppStart => CommandOpcode::AppStart,
            Self::DeviceQuery => CommandOpcode::DeviceQuery,
            Self::GetContacts => CommandOpcode::GetContacts,
            Self::GetTime => CommandOpcode::GetTime,
            Self::SetTime(_) => CommandOpcode::SetTime,
            Self::SendAdvert { .. } => CommandOpcode::SendAdvert,
            Self::SetName(_) => CommandOpcode::SetName,
            Self::UpdateContact(_) => CommandOpcode::UpdateContact,
            Self::GetMessage => CommandOpcode::GetMessage,
            Self::SetRadio { .. } => CommandOpcode::SetRadio,
            Self::SetTxPower(_) => CommandOpcode::SetTxPower,
            Self::ResetPath(_) => CommandOpcode::ResetPath,
            Self::SetCoords { .. } => CommandOpcode::SetCoords,
            Self::RemoveContact(_) => CommandOpcode::RemoveContact,
            Self::ShareContact(_) => CommandOpcode::ShareContact,
            Self::ExportContact(_) => CommandOpcode::ExportContact,
            Self::Reboot => CommandOpcode::Reboot,
            Self::GetBattery => CommandOpcode::GetBattery,
            Self::SetTuning { .. } => CommandOpcode::SetTuning,
            Self::SetDevicePin(_) => CommandOpcode::SetDevicePin,
            Self::SendLogin { .. } => CommandOpcode::SendLogin,
            Self::SendStatusReq(_) => CommandOpcode::SendStatusReq,
            Self::SendTelemetryReq(_) => CommandOpcode::Telemetry,
            Self::SendMessage { .. } => CommandOpcode::SendMessage,
            Self::SendChannelMessage { .. } => CommandOpcode::SendChannelMsg,
        }
    }

    /// Returns true if the device sends no reply to this command.
    #[must_use]
    pub const fn is_fire_and_forget(&self) -> bool {
        matches!(self, Self::Reboot)
    }

    /// Encodes the command payload (opcode first, no framing).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.opcode().into());

        match self {
            Self::AppStart => {
                buf.put_u8(APP_PROTOCOL_VERSION);
                buf.put_bytes(b' ', 6);
                buf.put_slice(APP_NAME.as_bytes());
            }
            Self::DeviceQuery => buf.put_u8(APP_PROTOCOL_VERSION),
            Self::GetContacts
            | Self::GetTime
            | Self::GetMessage
            | Self::GetBattery => {}
            Self::SetTime(secs) => buf.put_u32_le(*secs),
            Self::SendAdvert { flood } => {
                if *flood {
                    buf.put_u8(0x01);
                }
            }
            Self::SetName(name) => buf.put_slice(name.as_bytes()),
            Self::UpdateContact(contact) => {
                buf.put_slice(contact.public_key.as_bytes());
                buf.put_u8(contact.contact_type.as_byte());
                buf.put_u8(contact.flags.as_byte());
                buf.put_u8(contact.out_path_len.to_wire());
                put_padded(&mut buf, &contact.out_path, MAX_PATH_LEN);
                put_padded(&mut buf, contact.adv_name.as_bytes(), MAX_NAME_LEN);
                buf.put_u32_le(contact.last_advert);
                buf.put_i32_le(encode_coord(contact.adv_lat));
                buf.put_i32_le(encode_coord(contact.adv_lon));
            }
            Self::SetRadio {
                frequency_mhz,
                bandwidth_khz,
                spreading_factor,
                coding_rate,
            } => {
                buf.put_u32_le((frequency_mhz * 1000.0).round() as u32);
                buf.put_u32_le((bandwidth_khz * 1000.0).round() as u32);
                buf.put_u8(*spreading_factor);
                buf.put_u8(*coding_rate);
            }
            Self::SetTxPower(dbm) => buf.put_u32_le(*dbm),
            Self::ResetPath(key)
            | Self::RemoveContact(key)
            | Self::ShareContact(key)
            | Self::SendStatusReq(key) => buf.put_slice(key.as_bytes()),
            Self::SetCoords { lat, lon } => {
                buf.put_i32_le(encode_coord(*lat));
                buf.put_i32_le(encode_coord(*lon));
                buf.put_u32_le(0);
            }
            Self::ExportContact(key) => {
                if let Some(key) = key {
                    buf.put_slice(key.as_bytes());
                }
            }
            Self::Reboot => buf.put_slice(b"reboot"),
            Self::SetTuning {
                rx_delay,
                airtime_factor,
            } => {
                buf.put_u32_le(*rx_delay);
                buf.put_u32_le(*airtime_factor);
                buf.put_u8(0);
                buf.put_u8(0);
            }
            Self::SetDevicePin(pin) => buf.put_u32_le(*pin),
            Self::SendLogin { key, password } => {
                buf.put_slice(key.as_bytes());
                buf.put_slice(password.as_bytes());
            }
            Self::SendTelemetryReq(key) => {
                buf.put_bytes(0, 3);
                buf.put_slice(key.as_bytes());
            }
            Self::SendMessage {
                kind,
                attempt,
                timestamp,
                recipient,
                text,
            } => {
                buf.put_u8((*kind).into());
                buf.put_u8(*attempt);
                buf.put_u32_le(*timestamp);
                buf.put_slice(recipient);
                buf.put_slice(text.as_bytes());
            }
            Self::SendChannelMessage {
                channel,
                timestamp,
                text,
            } => {
                buf.put_u8(MessageType::Private.into());
                buf.put_u8(*channel);
                buf.put_u32_le(*timestamp);
                buf.put_slice(text.as_bytes());
            }
        }

        buf.freeze()
    }
}
