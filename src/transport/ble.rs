//! Bluetooth Low Energy transport over the Nordic UART service.
//!
//! Every GATT notification on the TX characteristic carries exactly one
//! frame, and every write to the RX characteristic carries exactly one
//! command, so no length prefix is involved.

use std::future::Future;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{DatagramCodec, FrameCodec};
use crate::transport::{Transport, TransportFuture};

/// Nordic UART service.
pub const NUS_SERVICE: Uuid = Uuid::from_u128(0x6E40_0001_B5A3_F393_E0A9_E50E_24DC_CA9E);

/// Characteristic the host writes commands to.
pub const NUS_RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6E40_0002_B5A3_F393_E0A9_E50E_24DC_CA9E);

/// Characteristic the device notifies frames on.
pub const NUS_TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6E40_0003_B5A3_F393_E0A9_E50E_24DC_CA9E);

/// Advertised name prefix of companion firmware.
pub const DEVICE_NAME_PREFIX: &str = "MeshCore";

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the GATT connection to come up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for BLE transport.
#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Substring the advertised name must contain, on top of the prefix.
    pub name_filter: Option<String>,
    /// Exact device address (`AA:BB:CC:DD:EE:FF`). Overrides name matching.
    pub address: Option<String>,
    /// How long to scan before giving up.
    pub scan_timeout: Duration,
    /// How long to wait for the connection once the device is found.
    pub connect_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            name_filter: None,
            address: None,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl BleConfig {
    /// Matches the first device advertising as `MeshCore*`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from a user-supplied target: a MAC address selects
    /// that device, anything else narrows the name match.
    #[must_use]
    pub fn for_target(target: impl Into<String>) -> Self {
        let target = target.into();
        if is_mac_address(&target) {
            Self::new().address(target)
        } else {
            Self::new().name_filter(target)
        }
    }

    /// Requires the advertised name to contain `filter`.
    #[must_use]
    pub fn name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = Some(filter.into());
        self
    }

    /// Selects the device with this address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the scan timeout.
    #[must_use]
    pub const fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns true if an advertisement with this name and address is wanted.
    #[must_use]
    pub fn matches(&self, local_name: Option<&str>, address: &str) -> bool {
        if let Some(ref wanted) = self.address {
            return wanted.eq_ignore_ascii_case(address);
        }

        let Some(name) = local_name else {
            return false;
        };
        if !name.starts_with(DEVICE_NAME_PREFIX) {
            return false;
        }
        self.name_filter
            .as_deref()
            .is_none_or(|filter| name.contains(filter))
    }

    fn describe(&self) -> String {
        match (&self.address, &self.name_filter) {
            (Some(address), _) => address.clone(),
            (None, Some(filter)) => format!("{DEVICE_NAME_PREFIX}*{filter}*"),
            (None, None) => format!("{DEVICE_NAME_PREFIX}*"),
        }
    }
}

/// Returns true for six colon-separated hex octets.
#[must_use]
pub fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Runs a connection attempt, reporting failure and timeout as
/// [`Error::NoDevice`] for `target`.
async fn connect_within<F>(attempt: F, timeout: Duration, target: String) -> Result<()>
where
    F: Future<Output = std::result::Result<(), btleplug::Error>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::warn!("ble connect to {target} failed: {e}");
            Err(Error::NoDevice { target })
        }
        Err(_) => {
            tracing::warn!("ble connect to {target} timed out after {timeout:?}");
            Err(Error::NoDevice { target })
        }
    }
}

struct BleSession {
    peripheral: Peripheral,
    rx: Characteristic,
    reader: JoinHandle<()>,
}

/// BLE transport.
pub struct BleTransport {
    config: BleConfig,
    codec: DatagramCodec,
    session: Option<BleSession>,
}

impl BleTransport {
    /// Creates a new BLE transport.
    #[must_use]
    pub const fn new(config: BleConfig) -> Self {
        Self {
            config,
            codec: DatagramCodec,
            session: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BleConfig {
        &self.config
    }

    async fn find(&self, adapter: &Adapter) -> Result<Peripheral> {
        tracing::info!("scanning for {}", self.config.describe());
        adapter.start_scan(ScanFilter::default()).await?;

        let deadline = tokio::time::Instant::now() + self.config.scan_timeout;
        let found = loop {
            if let Some(peripheral) = self.pick(adapter).await? {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("failed to stop scan: {e}");
        }

        found.ok_or_else(|| Error::NoDevice {
            target: self.config.describe(),
        })
    }

    async fn pick(&self, adapter: &Adapter) -> Result<Option<Peripheral>> {
        for peripheral in adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            let address = properties.address.to_string();
            if self
                .config
                .matches(properties.local_name.as_deref(), &address)
            {
                tracing::debug!(
                    "found {} at {address}",
                    properties.local_name.as_deref().unwrap_or("<unnamed>")
                );
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn open(&self, frames: mpsc::Sender<Bytes>) -> Result<BleSession> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoDevice {
                target: "bluetooth adapter".to_string(),
            })?;

        let peripheral = self.find(&adapter).await?;
        connect_within(
            peripheral.connect(),
            self.config.connect_timeout,
            self.config.describe(),
        )
        .await?;
        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let lookup = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid && c.service_uuid == NUS_SERVICE)
                .cloned()
                .ok_or_else(|| Error::Protocol {
                    message: format!("device lacks UART characteristic {uuid}"),
                })
        };
        let rx = lookup(NUS_RX_CHARACTERISTIC)?;
        let tx = lookup(NUS_TX_CHARACTERISTIC)?;

        peripheral.subscribe(&tx).await?;
        let notifications = peripheral.notifications().await?;
        let events = adapter.events().await?;

        let id = peripheral.id();
        let reader = tokio::spawn(async move {
            let mut notifications = notifications;
            let mut events = events;
            let mut codec = DatagramCodec;

            loop {
                tokio::select! {
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            tracing::debug!("ble notification stream ended");
                            break;
                        };
                        if notification.uuid != NUS_TX_CHARACTERISTIC {
                            continue;
                        }
                        tracing::trace!("ble: received {} bytes", notification.value.len());
                        for frame in codec.decode_chunk(&notification.value) {
                            if frames.send(frame).await.is_err() {
                                tracing::debug!("ble: frame receiver dropped");
                                return;
                            }
                        }
                    }
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                            tracing::info!("ble device disconnected");
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        Ok(BleSession {
            peripheral,
            rx,
            reader,
        })
    }
}

impl Transport for BleTransport {
    fn connect(&mut self, frames: mpsc::Sender<Bytes>) -> TransportFuture<'_> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }

            let session = self.open(frames).await?;
            tracing::info!("connected over BLE to {}", self.config.describe());
            self.session = Some(session);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_> {
        Box::pin(async move {
            if let Some(session) = self.session.take() {
                session.reader.abort();
                if let Err(e) = session.peripheral.disconnect().await {
                    tracing::debug!("ble disconnect failed: {e}");
                }
                tracing::info!("disconnected from BLE device");
            }
            Ok(())
        })
    }

    fn send(&mut self, payload: Bytes) -> TransportFuture<'_> {
        Box::pin(async move {
            let session = self.session.as_ref().ok_or(Error::NotConnected)?;
            let frame = self.codec.encode(&payload)?;
            tracing::trace!("ble: sending {} bytes", frame.len());
            session
                .peripheral
                .write(&session.rx, &frame, WriteType::WithoutResponse)
                .await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.reader.is_finished())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.reader.abort();
        }
    }
}
