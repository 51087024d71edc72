//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for companion radios
//! connected via USB.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::stream::StreamLink;
use crate::transport::{Transport, TransportFuture};

/// Default baud rate for companion radios.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default connection delay.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening the port before anything is read or sent.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport.
pub struct SerialTransport {
    config: SerialConfig,
    link: StreamLink<SerialStream>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            link: StreamLink::new("serial"),
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn open(&self) -> Result<SerialStream> {
        tokio_serial::new(&self.config.port, self.config.baud_rate)
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::NoDevice => Error::NoDevice {
                    target: self.config.port.clone(),
                },
                tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => Error::NoDevice {
                    target: self.config.port.clone(),
                },
                _ => Error::Serial(e),
            })
    }
}

/// Reads and discards whatever the device emitted right after the port opened.
async fn drain_stale(stream: &mut SerialStream) -> usize {
    let mut buf = [0u8; 1024];
    let mut drained = 0usize;

    let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => drained += n,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    drained
}

impl Transport for SerialTransport {
    fn connect(&mut self, frames: mpsc::Sender<Bytes>) -> TransportFuture<'_> {
        Box::pin(async move {
            if self.link.is_attached() {
                return Ok(());
            }

            tracing::info!("connecting to serial port: {}", self.config.port);
            let mut stream = self.open()?;

            // Boards reset while RTS is asserted.
            if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
                tracing::warn!("failed to set RTS: {e}");
            }

            tokio::time::sleep(self.config.connection_delay).await;

            let drained = drain_stale(&mut stream).await;
            if drained > 0 {
                tracing::debug!("drained {drained} stale bytes from buffer");
            }

            self.link.attach(stream, frames);
            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_> {
        Box::pin(async move {
            if self.link.detach() {
                tracing::info!("disconnected from serial port {}", self.config.port);
            }
            Ok(())
        })
    }

    fn send(&mut self, payload: Bytes) -> TransportFuture<'_> {
        Box::pin(async move { self.link.send(&payload).await })
    }

    fn is_connected(&self) -> bool {
        self.link.is_attached()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.connection_delay, DEFAULT_CONNECTION_DELAY);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("COM3")
            .baud_rate(9600)
            .connection_delay(Duration::from_secs(1));
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = SerialTransport::with_port("/dev/ttyUSB0");
        assert!(!transport.is_connected());
        let result = transport.send(Bytes::from_static(&[0x05])).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_port_is_no_device() {
        let mut transport = SerialTransport::with_port("/dev/meshcore-link-does-not-exist");
        let (tx, _rx) = mpsc::channel(1);
        let result = transport.connect(tx).await;
        assert!(matches!(result, Err(Error::NoDevice { .. } | Error::Serial(_))));
        assert!(!transport.is_connected());
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        let _ = list_ports();
    }
}
