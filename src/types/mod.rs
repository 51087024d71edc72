//! Data types for mesh entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Contacts, public keys and routing paths
//! - Self and device information
//! - Messages
//! - Remote status and telemetry reports

pub mod contact;
pub mod device;
pub mod message;
pub mod status;

pub use contact::{Contact, ContactFlags, ContactType, Contacts, PathLen, PublicKey};
pub use device::{BatteryStatus, DeviceInfo, RadioConfig, SelfInfo, TelemetryMode};
pub use message::{
    Acknowledgment, ChannelMessage, ContactMessage, MessageSent, ReceivedMessage, SignalQuality,
    TextType,
};
pub use status::{DeviceStatus, RawRadioFrame, TelemetryReport};
