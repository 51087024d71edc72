//! Main [`MeshCore`] client implementation.
//!
//! This module provides the high-level [`MeshCore`] client that combines
//! transport, dispatcher and commands into a unified interface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::commands::CommandHandler;
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Response};
use crate::error::Result;
use crate::event::{EventBus, EventFilter, Subscription};
use crate::protocol::Command;
#[cfg(feature = "ble")]
use crate::transport::{BleConfig, BleTransport};
use crate::transport::{
    FRAME_CHANNEL_CAPACITY, SerialConfig, SerialTransport, TcpConfig, TcpTransport, Transport,
};
use crate::types::{
    BatteryStatus, Contact, Contacts, DeviceInfo, DeviceStatus, MessageSent, PublicKey,
    ReceivedMessage, SelfInfo, TelemetryReport,
};

/// Client for communicating with a companion radio.
pub struct MeshCore<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: Arc<Dispatcher>,
    commands: CommandHandler<T>,
    config: ClientConfig,
    process_task: Option<JoinHandle<()>>,
}

impl MeshCore<SerialTransport> {
    /// Creates a new client for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0")
    ///
    /// # Returns
    ///
    /// A new client (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port))
    }

    /// Creates a new client with custom serial configuration.
    #[must_use]
    pub fn with_serial_config(config: SerialConfig) -> Self {
        Self::new(SerialTransport::new(config))
    }
}

impl MeshCore<TcpTransport> {
    /// Creates a new client for a WiFi companion at `host:port`.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::with_tcp_config(TcpConfig::new(host).port(port))
    }

    /// Creates a new client with custom TCP configuration.
    #[must_use]
    pub fn with_tcp_config(config: TcpConfig) -> Self {
        Self::new(TcpTransport::new(config))
    }
}

#[cfg(feature = "ble")]
impl MeshCore<BleTransport> {
    /// Creates a new BLE client. `target` is a MAC address or a name
    /// fragment; `None` takes the first companion found.
    #[must_use]
    pub fn ble(target: Option<&str>) -> Self {
        let config = target.map_or_else(BleConfig::new, BleConfig::for_target);
        Self::with_ble_config(config)
    }

    /// Creates a new client with custom BLE configuration.
    #[must_use]
    pub fn with_ble_config(config: BleConfig) -> Self {
        Self::new(BleTransport::new(config))
    }
}

impl<T: Transport + 'static> MeshCore<T> {
    /// Creates a new client with the given transport and default settings.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Creates a new client with the given transport and settings.
    #[must_use]
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let dispatcher = Arc::new(Dispatcher::new(config.firmware, events));
        let transport = Arc::new(Mutex::new(transport));
        let commands =
            CommandHandler::new(Arc::clone(&transport), Arc::clone(&dispatcher), config.clone());

        Self {
            transport,
            dispatcher,
            commands,
            config,
            process_task: None,
        }
    }

    /// Connects to the device and initializes the session.
    ///
    /// This will:
    /// 1. Open the transport connection
    /// 2. Start the frame processing task
    /// 3. Send the handshake and cache the returned self info
    /// 4. Query firmware details (older firmware may not answer)
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoDevice`] if nothing answers at the configured
    /// address, or the handshake's error.
    pub async fn connect(&mut self) -> Result<SelfInfo> {
        if let Some(task) = self.process_task.take() {
            task.abort();
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        {
            let mut transport = self.transport.lock().await;
            transport.connect(frame_tx).await?;
        }

        self.dispatcher.connected();
        self.process_task = Some(tokio::spawn(process_frames(
            frame_rx,
            Arc::clone(&self.dispatcher),
        )));

        let info = match self.commands.app_start().await {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!("handshake failed: {err}");
                if let Err(e) = self.disconnect().await {
                    tracing::debug!("cleanup after failed handshake: {e}");
                }
                return Err(err);
            }
        };

        if let Err(err) = self.commands.device_query().await {
            if err.is_transport() {
                return Err(err);
            }
            tracing::debug!("device query unanswered: {err}");
        }

        tracing::info!("connected to {}", info.name);
        Ok(self.dispatcher.self_info().unwrap_or(info))
    }

    /// Disconnects from the device.
    ///
    /// Every outstanding wait fails with [`crate::Error::Disconnected`].
    ///
    /// # Errors
    ///
    /// Returns the transport's error if closing the link fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        let result = {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await
        };

        self.dispatcher.disconnect();
        if let Some(task) = self.process_task.take() {
            task.abort();
        }
        result
    }

    /// Returns true if the link is up.
    pub async fn is_connected(&self) -> bool {
        if self.dispatcher.is_disconnected() {
            return false;
        }
        self.transport.lock().await.is_connected()
    }

    /// Returns the settings this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the command handler for direct command access.
    #[must_use]
    pub const fn commands(&self) -> &CommandHandler<T> {
        &self.commands
    }

    /// Returns the dispatcher, for waits shared with other tasks.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Subscribes to push events passing `filter`.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.dispatcher.events().subscribe(filter)
    }

    /// Sends any command and waits up to `timeout` for its direct response.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Busy`] if another command is in flight, or the
    /// command's error.
    pub async fn send(&self, command: Command, timeout: Duration) -> Result<Response> {
        self.commands.send(command, timeout).await
    }

    // ==================== Cached State ====================

    /// Returns the self info from the last handshake.
    #[must_use]
    pub fn self_info(&self) -> Option<SelfInfo> {
        self.dispatcher.self_info()
    }

    /// Returns all cached contacts, keyed by name.
    #[must_use]
    pub fn contacts(&self) -> Contacts {
        self.dispatcher.contacts()
    }

    /// Looks up a cached contact by name.
    #[must_use]
    pub fn contact_by_name(&self, name: &str) -> Option<Contact> {
        self.dispatcher.contact_by_name(name)
    }

    /// Looks up a cached contact by public key prefix.
    #[must_use]
    pub fn contact_by_prefix(&self, prefix: &[u8]) -> Option<Contact> {
        self.dispatcher.contact_by_prefix(prefix)
    }

    /// Returns the number of messages the device reported waiting.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.dispatcher.pending_messages()
    }

    // ==================== High-Level Device Methods ====================

    /// Gets the battery status.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn get_battery(&self) -> Result<BatteryStatus> {
        self.commands.get_battery().await
    }

    /// Gets firmware details.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn get_device_info(&self) -> Result<DeviceInfo> {
        self.commands.device_query().await
    }

    /// Gets the current device time.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn get_time(&self) -> Result<u32> {
        self.commands.get_time().await
    }

    /// Sets the device time.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_time(&self, timestamp: u32) -> Result<()> {
        self.commands.set_time(timestamp).await
    }

    /// Sets the device time to the current system time.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn sync_time(&self) -> Result<u32> {
        self.commands.sync_time().await
    }

    /// Sends an advertisement.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn send_advert(&self, flood: bool) -> Result<()> {
        self.commands.send_advert(flood).await
    }

    /// Sets the advertised name.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.commands.set_name(name).await
    }

    /// Sets the advertised coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidCoordinates`] or the command's error.
    pub async fn set_coords(&self, lat: f64, lon: f64) -> Result<()> {
        self.commands.set_coords(lat, lon).await
    }

    /// Sets radio parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_radio(
        &self,
        frequency_mhz: f64,
        bandwidth_khz: f64,
        spreading_factor: u8,
        coding_rate: u8,
    ) -> Result<()> {
        self.commands
            .set_radio(frequency_mhz, bandwidth_khz, spreading_factor, coding_rate)
            .await
    }

    /// Sets the TX power in dBm.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_tx_power(&self, dbm: u32) -> Result<()> {
        self.commands.set_tx_power(dbm).await
    }

    /// Sets the RX delay base and airtime factor.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_tuning(&self, rx_delay: u32, airtime_factor: u32) -> Result<()> {
        self.commands.set_tuning(rx_delay, airtime_factor).await
    }

    /// Sets the BLE pairing PIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_device_pin(&self, pin: u32) -> Result<()> {
        self.commands.set_device_pin(pin).await
    }

    /// Reboots the device.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if sending fails.
    pub async fn reboot(&self) -> Result<()> {
        self.commands.reboot().await
    }

    // ==================== High-Level Contact Methods ====================

    /// Fetches the contact list, replacing the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the enumeration fails.
    pub async fn get_contacts(&self) -> Result<Contacts> {
        self.commands.get_contacts().await
    }

    /// Fetches the contact list only if nothing is cached yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a needed enumeration fails.
    pub async fn ensure_contacts(&self) -> Result<()> {
        self.commands.ensure_contacts().await
    }

    /// Installs an out path on a cached contact, or floods when `path` is
    /// `None`. Nothing is sent; follow up with [`update_contact`].
    ///
    /// Returns the modified contact, or `None` if no contact has that name.
    ///
    /// [`update_contact`]: Self::update_contact
    pub fn set_out_path(&self, name: &str, path: Option<&[u8]>) -> Option<Contact> {
        let mut contact = self.dispatcher.contact_by_name(name)?;
        match path {
            Some(path) => contact.set_out_path(path),
            None => contact.clear_out_path(),
        }
        self.dispatcher.cache_contact(contact.clone());
        Some(contact)
    }

    /// Writes a contact record to the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn update_contact(&self, contact: &Contact) -> Result<()> {
        self.commands.update_contact(contact).await
    }

    /// Removes a contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn remove_contact(&self, key: &PublicKey) -> Result<()> {
        self.commands.remove_contact(key).await
    }

    /// Resets the path to a contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn reset_path(&self, key: &PublicKey) -> Result<()> {
        self.commands.reset_path(key).await
    }

    /// Shares a contact over the mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn share_contact(&self, key: &PublicKey) -> Result<()> {
        self.commands.share_contact(key).await
    }

    /// Exports a contact (or ourselves) as a `meshcore://` URI.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn export_contact(&self, key: Option<&PublicKey>) -> Result<String> {
        self.commands.export_contact(key).await
    }

    // ==================== High-Level Messaging Methods ====================

    /// Sends a private message without waiting for its ACK.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn send_message(&self, recipient: &PublicKey, text: &str) -> Result<MessageSent> {
        self.commands.send_message(recipient, text).await
    }

    /// Sends a private message and waits for the matching ACK.
    ///
    /// Waits for the device's suggested timeout, or the configured ACK
    /// timeout if the device suggests none.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] if no ACK arrives.
    pub async fn send_message_confirmed(
        &self,
        recipient: &PublicKey,
        text: &str,
    ) -> Result<MessageSent> {
        let sent = self.commands.send_message(recipient, text).await?;
        let timeout = if sent.suggested_timeout_ms == 0 {
            self.config.ack_timeout
        } else {
            Duration::from_millis(u64::from(sent.suggested_timeout_ms))
        };
        self.dispatcher
            .wait_for_ack_code(sent.expected_ack, timeout)
            .await?;
        Ok(sent)
    }

    /// Sends a CLI command to a repeater or room server.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn send_command(&self, recipient: &PublicKey, text: &str) -> Result<MessageSent> {
        self.commands.send_command(recipient, text).await
    }

    /// Sends a channel message.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn send_channel_message(&self, channel: u8, text: &str) -> Result<()> {
        self.commands.send_channel_message(channel, text).await
    }

    /// Fetches the next queued message.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn get_message(&self) -> Result<Option<ReceivedMessage>> {
        self.commands.get_message().await
    }

    /// Fetches every queued message.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub async fn fetch_messages(&self) -> Result<Vec<ReceivedMessage>> {
        let mut messages = Vec::new();
        while let Some(message) = self.commands.get_message().await? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Waits for the ACK of the last message sent with [`send_message`].
    ///
    /// [`send_message`]: Self::send_message
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] after the configured ACK timeout.
    pub async fn wait_for_ack(&self) -> Result<()> {
        self.dispatcher.wait_for_ack(self.config.ack_timeout).await
    }

    /// Waits for an ACK carrying `code`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] after `timeout`.
    pub async fn wait_for_ack_code(&self, code: u32, timeout: Duration) -> Result<()> {
        self.dispatcher.wait_for_ack_code(code, timeout).await
    }

    /// Waits until the device reports a message waiting.
    ///
    /// `None` waits until a message arrives or the link drops.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] or [`crate::Error::Disconnected`].
    pub async fn wait_for_message(&self, timeout: Option<Duration>) -> Result<()> {
        self.dispatcher.wait_for_message(timeout).await
    }

    // ==================== Remote Node Methods ====================

    /// Logs in to a repeater or room server and waits for the verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or no verdict arrives in time.
    pub async fn login(&self, key: &PublicKey, password: &str) -> Result<bool> {
        self.commands.send_login(key, password).await?;
        self.dispatcher
            .wait_for_login(self.config.login_timeout)
            .await
    }

    /// Sends a login without waiting for the verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn send_login(&self, key: &PublicKey, password: &str) -> Result<MessageSent> {
        self.commands.send_login(key, password).await
    }

    /// Waits for the verdict of the last login.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Timeout`] or [`crate::Error::Disconnected`].
    pub async fn wait_for_login(&self) -> Result<bool> {
        self.dispatcher
            .wait_for_login(self.config.login_timeout)
            .await
    }

    /// Requests a remote node's status and waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or no status arrives in time.
    pub async fn request_status(&self, key: &PublicKey) -> Result<DeviceStatus> {
        self.commands.send_status_request(key).await?;
        self.dispatcher
            .wait_for_status(self.config.status_timeout)
            .await
    }

    /// Requests a remote node's telemetry and waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or no telemetry arrives in time.
    pub async fn request_telemetry(&self, key: &PublicKey) -> Result<TelemetryReport> {
        self.commands.send_telemetry_request(key).await?;
        self.dispatcher
            .wait_for_telemetry(self.config.telemetry_timeout)
            .await
    }
}

impl<T> Drop for MeshCore<T> {
    fn drop(&mut self) {
        if let Some(task) = self.process_task.take() {
            task.abort();
        }
    }
}

/// Feeds every inbound frame to the dispatcher until the transport hangs up.
async fn process_frames(mut frames: mpsc::Receiver<bytes::Bytes>, dispatcher: Arc<Dispatcher>) {
    while let Some(frame) = frames.recv().await {
        dispatcher.handle_rx(&frame);
    }
    tracing::debug!("frame stream closed");
    dispatcher.disconnect();
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::error::Error;
    use crate::event::{Event, EventKind};
    use crate::protocol::parser::tests::{contact_record, self_info_record};
    use crate::transport::mock::MockTransport;

    const SHORT: Duration = Duration::from_millis(50);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn config() -> ClientConfig {
        ClientConfig::default()
            .command_timeout(SHORT)
            .message_timeout(SHORT)
            .ack_timeout(SHORT)
            .reply_timeout(SHORT)
    }

    /// A companion that answers the handshake, device query, clock and
    /// contact enumeration.
    fn device(payload: &[u8]) -> Vec<Vec<u8>> {
        match payload[0] {
            0x01 => {
                let mut frame = vec![0x05];
                frame.extend_from_slice(&self_info_record("base"));
                vec![frame]
            }
            0x16 => vec![vec![0x0D, 2]],
            0x05 => vec![vec![0x09, 0, 0, 0, 0x66]],
            0x04 => {
                let mut record = vec![0x03];
                record.extend_from_slice(&contact_record("relay", 5, 0xFF, &[]));
                vec![vec![0x02, 1, 0, 0, 0], record, vec![0x04]]
            }
            0x02 => {
                let mut frame = vec![0x06, 0];
                frame.extend_from_slice(&77u32.to_le_bytes());
                frame.extend_from_slice(&0u32.to_le_bytes());
                vec![frame, vec![0x82, 77, 0, 0, 0]]
            }
            _ => vec![vec![0x00]],
        }
    }

    async fn connected(
        responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    ) -> MeshCore<MockTransport> {
        let mut client = MeshCore::with_config(MockTransport::new(responder), config());
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_connect_handshake() {
        init_tracing();
        let mut client = MeshCore::with_config(MockTransport::new(device), config());
        let mut events = client.subscribe(EventFilter::kinds(vec![EventKind::Connected]));

        let info = client.connect().await.unwrap();
        assert_eq!(info.name, "base");
        assert_eq!(info.device.as_ref().map(|d| d.firmware_version), Some(2));
        assert!(client.is_connected().await);
        assert_eq!(events.recv().await, Some(Event::Connected));

        let sent = client.transport.lock().await.sent_log();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0][0], 0x01);
        assert_eq!(&sent[0][8..], b"mccli");
        assert_eq!(sent[1].as_ref(), &[0x16, 0x03]);
    }

    #[tokio::test]
    async fn test_connect_without_device_query() {
        let client = connected(|payload| match payload[0] {
            0x01 => {
                let mut frame = vec![0x05];
                frame.extend_from_slice(&self_info_record("old"));
                vec![frame]
            }
            _ => vec![vec![0x01]],
        })
        .await;
        let info = client.self_info().unwrap();
        assert_eq!(info.name, "old");
        assert!(info.device.is_none());
    }

    #[tokio::test]
    async fn test_send_raw_command() {
        let client = connected(device).await;
        let response = client.send(Command::GetTime, SHORT).await.unwrap();
        assert_eq!(response, Response::CurrentTime(0x6600_0000));
    }

    #[tokio::test]
    async fn test_failed_handshake_disconnects() {
        let mut client = MeshCore::with_config(MockTransport::silent(), config());
        assert!(matches!(
            client.connect().await,
            Err(Error::Timeout { .. })
        ));
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_fails_outstanding_waits() {
        let mut client = connected(device).await;
        let dispatcher = client.dispatcher();
        let waiter =
            tokio::spawn(async move { dispatcher.wait_for_message(None).await });
        tokio::task::yield_now().await;

        client.disconnect().await.unwrap();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Disconnected)));
        assert!(matches!(client.get_time().await, Err(Error::Disconnected)));
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_link_loss_is_noticed() {
        init_tracing();
        let client = connected(device).await;
        let mut events = client.subscribe(EventFilter::kinds(vec![EventKind::Disconnected]));

        // The device side hangs up.
        client.transport.lock().await.disconnect().await.unwrap();

        assert_eq!(events.recv().await, Some(Event::Disconnected));
        assert!(client.dispatcher().is_disconnected());
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let mut client = connected(device).await;
        client.disconnect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.get_time().await.unwrap(), 0x6600_0000);
    }

    #[tokio::test]
    async fn test_set_out_path_then_update() {
        let client = connected(device).await;
        client.ensure_contacts().await.unwrap();

        assert!(client.set_out_path("nobody", Some(&[1])).is_none());
        let contact = client.set_out_path("relay", Some(&[0xA1, 0xB2])).unwrap();
        assert_eq!(contact.out_path_len.hops(), Some(2));
        client.update_contact(&contact).await.unwrap();

        let sent = client.transport.lock().await.sent_log();
        let update = sent.lock().unwrap().last().cloned().unwrap();
        assert_eq!(update[0], 0x09);
        assert_eq!(update[35], 2);
        assert_eq!(&update[36..38], &[0xA1, 0xB2]);
    }

    #[tokio::test]
    async fn test_send_message_confirmed() {
        let client = connected(device).await;
        let sent = client
            .send_message_confirmed(&PublicKey::new([4; 32]), "ping")
            .await
            .unwrap();
        assert_eq!(sent.expected_ack, 77);
    }

    #[tokio::test]
    async fn test_fetch_messages_drains_queue() {
        let queue = StdMutex::new(VecDeque::from(vec![b"one".to_vec(), b"two".to_vec()]));
        let client = connected(move |payload| {
            if payload[0] != 0x0A {
                return device(payload);
            }
            match queue.lock().unwrap().pop_front() {
                Some(text) => {
                    let mut frame = vec![0x08, 0x00, 0x02, 0x00, 1, 0, 0, 0];
                    frame.extend_from_slice(&text);
                    vec![frame]
                }
                None => vec![vec![0x0A]],
            }
        })
        .await;

        let messages = client.fetch_messages().await.unwrap();
        let texts: Vec<&str> = messages.iter().map(ReceivedMessage::text).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_subscription_sees_pushes() {
        let client = connected(device).await;
        let mut adverts = client.subscribe(EventFilter::kinds(vec![EventKind::Advertisement]));

        let inject = client.transport.lock().await.injector().unwrap();
        inject.send(bytes::Bytes::from_static(&[0x83])).await.unwrap();
        let mut advert = vec![0x80];
        advert.extend_from_slice(&[0x5A; 32]);
        inject.send(bytes::Bytes::from(advert)).await.unwrap();

        assert_eq!(
            adverts.recv().await,
            Some(Event::Advertisement(PublicKey::new([0x5A; 32])))
        );
        assert_eq!(client.pending_messages(), 1);
        client.wait_for_message(Some(SHORT)).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_verdict() {
        let client = connected(|payload| match payload[0] {
            0x1A => {
                let mut frame = vec![0x06, 0];
                frame.extend_from_slice(&[0; 8]);
                vec![frame, vec![0x86, 0x00]]
            }
            _ => device(payload),
        })
        .await;

        let ok = client.login(&PublicKey::new([8; 32]), "wrong").await.unwrap();
        assert!(!ok);
    }
}
