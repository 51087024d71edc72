//! Protocol definitions for companion-radio communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding for stream and datagram links
//! - Packet type definitions
//! - Command encoding
//! - Binary record parsing and the decoded [`Inbound`] frame enum

pub mod command;
pub mod frame;
pub mod inbound;
pub mod packet;
pub mod parser;

pub use command::{Command, CommandOpcode, MessageType};
pub use frame::{
    DatagramCodec, FrameCodec, INBOUND_MARKER, MAX_FRAME_SIZE, OUTBOUND_MARKER, StreamCodec,
    encode as encode_frame,
};
pub use inbound::Inbound;
pub use packet::PacketType;
