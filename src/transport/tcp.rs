//! TCP transport implementation.
//!
//! Companion firmware built for WiFi exposes the same length-prefixed
//! framing as serial over a plain TCP socket.

use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::stream::StreamLink;
use crate::transport::{Transport, TransportFuture};

/// Default TCP port of the companion firmware.
pub const DEFAULT_TCP_PORT: u16 = 5000;

/// Default time allowed for the TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for TCP transport.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl TcpConfig {
    /// Creates a configuration for `host` on the default port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_TCP_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP transport.
pub struct TcpTransport {
    config: TcpConfig,
    link: StreamLink<TcpStream>,
}

impl TcpTransport {
    /// Creates a new TCP transport.
    #[must_use]
    pub const fn new(config: TcpConfig) -> Self {
        Self {
            config,
            link: StreamLink::new("tcp"),
        }
    }

    /// Creates a TCP transport for `host:port`.
    #[must_use]
    pub fn with_address(host: impl Into<String>, port: u16) -> Self {
        Self::new(TcpConfig::new(host).port(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }

    async fn open(&self) -> Result<TcpStream> {
        let address = self.config.address();
        let attempt = TcpStream::connect((self.config.host.as_str(), self.config.port));

        match tokio::time::timeout(self.config.connect_timeout, attempt).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                tracing::warn!("tcp connect to {address} failed: {e}");
                Err(Error::NoDevice { target: address })
            }
            Err(_) => {
                tracing::warn!(
                    "tcp connect to {address} timed out after {:?}",
                    self.config.connect_timeout
                );
                Err(Error::NoDevice { target: address })
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, frames: mpsc::Sender<Bytes>) -> TransportFuture<'_> {
        Box::pin(async move {
            if self.link.is_attached() {
                return Ok(());
            }

            tracing::info!("connecting to {}", self.config.address());
            let stream = self.open().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("failed to set TCP_NODELAY: {e}");
            }

            self.link.attach(stream, frames);
            tracing::info!("connected to {}", self.config.address());
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_> {
        Box::pin(async move {
            if self.link.detach() {
                tracing::info!("disconnected from {}", self.config.address());
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
