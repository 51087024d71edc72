//! Transport layer for companion-radio communication.
//!
//! A transport owns the physical link. Once connected it runs its own reader
//! task that turns raw deliveries into complete frames and pushes them into
//! the channel handed to [`Transport::connect`]. Dropping that channel's
//! sender is how a transport reports that the link is gone.
//!
//! Serial and TCP share the length-prefixed stream framing in [`stream`];
//! BLE (behind the `ble` feature) delivers one frame per notification.

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(test)]
pub(crate) mod mock;
pub mod serial;
mod stream;
pub mod tcp;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Capacity of the inbound frame channel between a transport and the client.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the link and starts delivering inbound frames on `frames`.
    ///
    /// The transport keeps the sender for as long as the link is up and
    /// drops it when the link ends, for whatever reason.
    fn connect(&mut self, frames: mpsc::Sender<Bytes>) -> TransportFuture<'_>;

    /// Closes the link. Calling this on a closed link is a no-op.
    fn disconnect(&mut self) -> TransportFuture<'_>;

    /// Sends one command payload, framed as this link requires.
    fn send(&mut self, payload: Bytes) -> TransportFuture<'_>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "ble")]
pub use ble::{BleConfig, BleTransport};
pub use serial::{SerialConfig, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};
