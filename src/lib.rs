//! # meshcore-link
//!
//! A Rust client library for `MeshCore` companion radios.
//!
//! This library talks to a companion radio over USB/Serial, TCP, or BLE
//! (with the `ble` feature), keeps the node's contacts and self info cached,
//! and surfaces unsolicited notifications as events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - One command in flight at a time, every wait bounded and cancelled on disconnect
//! - Type-safe protocol implementation
//! - Comprehensive error handling
//!
//! ## Quick Start
//!
//! ```no_run
//! use meshcore_link::MeshCore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meshcore_link::Error> {
//!     // Connect to a companion radio
//!     let mut client = MeshCore::serial("/dev/ttyUSB0");
//!     let info = client.connect().await?;
//!
//!     println!("Connected to: {}", info.name);
//!     println!("Public key: {}", info.public_key);
//!
//!     // Get battery status
//!     let battery = client.get_battery().await?;
//!     println!("Battery: {}mV", battery.millivolts);
//!
//!     // Drain the message queue
//!     for message in client.fetch_messages().await? {
//!         println!("{}", message.text());
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Low-level protocol types (frames, packets, commands, parsers)
//! - [`types`] - Data structures (contacts, self info, messages, status)
//! - [`transport`] - Serial, TCP and BLE links
//! - [`dispatcher`] - Inbound frame routing, caches and wait primitives
//! - [`event`] - Broadcast of push notifications
//! - [`commands`] - Command handler for device operations
//! - [`client`] - High-level [`MeshCore`] client

pub mod client;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::MeshCore;
pub use commands::CommandHandler;
pub use config::{ClientConfig, FirmwareProfile, PathSentinel, SnrScale};
pub use dispatcher::{Dispatcher, Response};
pub use error::{DecodeError, Error, FirmwareErrorCode, FrameError, Result};
pub use event::{Event, EventBus, EventFilter, EventKind, Subscription};
pub use protocol::{Command, CommandOpcode, Inbound, MessageType, PacketType};
#[cfg(feature = "ble")]
pub use transport::{BleConfig, BleTransport};
pub use transport::{
    SerialConfig, SerialTransport, TcpConfig, TcpTransport, Transport, serial::list_ports,
};
pub use types::{
    Acknowledgment, BatteryStatus, ChannelMessage, Contact, ContactFlags, ContactMessage,
    ContactType, Contacts, DeviceInfo, DeviceStatus, MessageSent, PathLen, PublicKey,
    RadioConfig, RawRadioFrame, ReceivedMessage, SelfInfo, SignalQuality, TelemetryMode,
    TelemetryReport, TextType,
};
