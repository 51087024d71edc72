//! Command handlers for companion-radio operations.
//!
//! Each method encodes one [`Command`], sends it through the transport and
//! waits for the reply via the [`Dispatcher`]'s single pending slot. Only one
//! command may be in flight at a time; a second one fails with
//! [`Error::Busy`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Response};
use crate::error::{Error, Result};
use crate::protocol::{Command, MessageType};
use crate::transport::Transport;
use crate::types::{
    BatteryStatus, Contact, Contacts, DeviceInfo, MessageSent, PublicKey, ReceivedMessage,
    SelfInfo,
};

/// Command handler for companion-radio operations.
pub struct CommandHandler<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: Arc<Dispatcher>,
    config: ClientConfig,
}

impl<T: Transport> CommandHandler<T> {
    /// Creates a new command handler.
    #[must_use]
    pub const fn new(
        transport: Arc<Mutex<T>>,
        dispatcher: Arc<Dispatcher>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            config,
        }
    }

    /// Returns the timeouts in effect.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sets the command timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.command_timeout = timeout;
    }

    async fn transmit(&self, command: &Command) -> Result<()> {
        let payload = command.encode();
        tracing::debug!("sending {:?}", command.opcode());
        tracing::trace!("tx payload: {}", hex::encode(&payload));

        let mut transport = self.transport.lock().await;
        transport.send(payload).await
    }

    /// Sends a command and waits up to `timeout` for its direct response.
    ///
    /// A command the device never answers (see
    /// [`Command::is_fire_and_forget`]) is sent without opening the pending
    /// slot and yields `Response::Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another command is in flight, the
    /// transport's error if sending fails, and otherwise whatever the
    /// response resolves to.
    pub async fn send(&self, command: Command, timeout: Duration) -> Result<Response> {
        if command.is_fire_and_forget() {
            self.transmit(&command).await?;
            return Ok(Response::Ok(None));
        }

        let receiver = self.dispatcher.begin_request()?;
        // Dropping the receiver on a failed send frees the slot again.
        self.transmit(&command).await?;
        self.dispatcher.await_response(receiver, timeout).await
    }

    /// Sends a command that gets no reply.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if sending fails.
    pub async fn send_only(&self, command: Command) -> Result<()> {
        self.transmit(&command).await
    }

    async fn expect_ok(&self, command: Command) -> Result<Option<u32>> {
        let what = command.opcode();
        match self.send(command, self.config.command_timeout).await? {
            Response::Ok(value) => Ok(value),
            other => {
                tracing::warn!("{what:?} answered with {other:?}");
                Err(Error::unexpected(&format!("{what:?}")))
            }
        }
    }

    async fn expect_sent(&self, command: Command) -> Result<MessageSent> {
        let what = command.opcode();
        match self.send(command, self.config.command_timeout).await? {
            Response::MessageSent(sent) => Ok(sent),
            other => {
                tracing::warn!("{what:?} answered with {other:?}");
                Err(Error::unexpected(&format!("{what:?}")))
            }
        }
    }

    // ==================== Device Commands ====================

    /// Performs the handshake and returns the node's self info.
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer with self info.
    pub async fn app_start(&self) -> Result<SelfInfo> {
        match self
            .send(Command::AppStart, self.config.command_timeout)
            .await?
        {
            Response::SelfInfo(info) => Ok(*info),
            _ => Err(Error::unexpected("app start")),
        }
    }

    /// Queries firmware details.
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer with device info.
    pub async fn device_query(&self) -> Result<DeviceInfo> {
        match self
            .send(Command::DeviceQuery, self.config.command_timeout)
            .await?
        {
            Response::DeviceInfo(info) => Ok(info),
            _ => Err(Error::unexpected("device query")),
        }
    }

    /// Reads the device clock (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer with the time.
    pub async fn get_time(&self) -> Result<u32> {
        match self
            .send(Command::GetTime, self.config.command_timeout)
            .await?
        {
            Response::CurrentTime(time) => Ok(time),
            _ => Err(Error::unexpected("get time")),
        }
    }

    /// Sets the device clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_time(&self, timestamp: u32) -> Result<()> {
        self.expect_ok(Command::SetTime(timestamp)).await.map(drop)
    }

    /// Sets the device clock from the host clock and returns the value sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn sync_time(&self) -> Result<u32> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        let now = u32::try_from(now).unwrap_or(u32::MAX);
        self.set_time(now).await?;
        Ok(now)
    }

    /// Reads battery voltage and storage usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer with a battery reply.
    pub async fn get_battery(&self) -> Result<BatteryStatus> {
        match self
            .send(Command::GetBattery, self.config.command_timeout)
            .await?
        {
            Response::Battery(battery) => Ok(battery),
            _ => Err(Error::unexpected("get battery")),
        }
    }

    /// Sends an advertisement, zero-hop or flooded.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn send_advert(&self, flood: bool) -> Result<()> {
        self.expect_ok(Command::SendAdvert { flood }).await.map(drop)
    }

    /// Sets the advertised name.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.expect_ok(Command::SetName(name.to_string()))
            .await
            .map(drop)
    }

    /// Sets the advertised coordinates in decimal degrees.
    ///
    /// The device treats (0, 0) as "no location".
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinates`] without sending anything if a
    /// value is out of range, or an error if the device rejects it.
    pub async fn set_coords(&self, lat: f64, lon: f64) -> Result<()> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidCoordinates {
                reason: format!("latitude {lat} out of range (-90 to 90)"),
            });
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidCoordinates {
                reason: format!("longitude {lon} out of range (-180 to 180)"),
            });
        }
        self.expect_ok(Command::SetCoords { lat, lon })
            .await
            .map(drop)
    }

    /// Sets radio parameters.
    ///
    /// # Arguments
    ///
    /// * `frequency_mhz` - Frequency in MHz (e.g. 869.525)
    /// * `bandwidth_khz` - Bandwidth in kHz (e.g. 250.0)
    /// * `spreading_factor` - Spreading factor (5-12)
    /// * `coding_rate` - Coding rate (5-8)
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_radio(
        &self,
        frequency_mhz: f64,
        bandwidth_khz: f64,
        spreading_factor: u8,
        coding_rate: u8,
    ) -> Result<()> {
        self.expect_ok(Command::SetRadio {
            frequency_mhz,
            bandwidth_khz,
            spreading_factor,
            coding_rate,
        })
        .await
        .map(drop)
    }

    /// Sets the TX power in dBm.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_tx_power(&self, dbm: u32) -> Result<()> {
        self.expect_ok(Command::SetTxPower(dbm)).await.map(drop)
    }

    /// Sets the RX delay base and airtime factor.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_tuning(&self, rx_delay: u32, airtime_factor: u32) -> Result<()> {
        self.expect_ok(Command::SetTuning {
            rx_delay,
            airtime_factor,
        })
        .await
        .map(drop)
    }

    /// Sets the BLE pairing PIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_device_pin(&self, pin: u32) -> Result<()> {
        self.expect_ok(Command::SetDevicePin(pin)).await.map(drop)
    }

    /// Reboots the device. The link usually drops right after.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if sending fails.
    pub async fn reboot(&self) -> Result<()> {
        self.send_only(Command::Reboot).await
    }

    // ==================== Contact Commands ====================

    /// Enumerates contacts, replacing the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the enumeration does not complete.
    pub async fn get_contacts(&self) -> Result<Contacts> {
        match self
            .send(Command::GetContacts, self.config.command_timeout)
            .await?
        {
            Response::Contacts(contacts) => Ok(contacts),
            _ => Err(Error::unexpected("get contacts")),
        }
    }

    /// Enumerates contacts only if the cache is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a needed enumeration fails.
    pub async fn ensure_contacts(&self) -> Result<()> {
        if self.dispatcher.contacts_empty() {
            self.get_contacts().await?;
        }
        Ok(())
    }

    /// Writes a contact record back to the device and refreshes the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the record.
    pub async fn update_contact(&self, contact: &Contact) -> Result<()> {
        self.expect_ok(Command::UpdateContact(Box::new(contact.clone())))
            .await?;
        self.dispatcher.cache_contact(contact.clone());
        Ok(())
    }

    /// Removes a contact from the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn remove_contact(&self, key: &PublicKey) -> Result<()> {
        self.expect_ok(Command::RemoveContact(key.clone())).await.map(drop)
    }

    /// Forgets the routed path to a contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn reset_path(&self, key: &PublicKey) -> Result<()> {
        self.expect_ok(Command::ResetPath(key.clone())).await.map(drop)
    }

    /// Shares a contact over the mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn share_contact(&self, key: &PublicKey) -> Result<()> {
        self.expect_ok(Command::ShareContact(key.clone())).await.map(drop)
    }

    /// Exports a contact card as a `meshcore://` URI; `None` exports our own.
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer with a card.
    pub async fn export_contact(&self, key: Option<&PublicKey>) -> Result<String> {
        match self
            .send(
                Command::ExportContact(key.cloned()),
                self.config.command_timeout,
            )
            .await?
        {
            Response::ContactUri(uri) => Ok(uri),
            _ => Err(Error::unexpected("export contact")),
        }
    }

    // ==================== Messaging Commands ====================

    /// Sends a private text message, timestamped with the device clock.
    ///
    /// The ACK flag is lowered first, so a later
    /// [`Dispatcher::wait_for_ack`] waits for this message's ACK.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the clock or sending fails.
    pub async fn send_message(&self, recipient: &PublicKey, text: &str) -> Result<MessageSent> {
        let timestamp = self.get_time().await?;
        self.dispatcher.clear_ack();
        self.expect_sent(Command::SendMessage {
            kind: MessageType::Private,
            attempt: 0,
            timestamp,
            recipient: recipient.prefix(),
            text: text.to_string(),
        })
        .await
    }

    /// Sends a CLI command to a repeater or room server.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the clock or sending fails.
    pub async fn send_command(&self, recipient: &PublicKey, text: &str) -> Result<MessageSent> {
        let timestamp = self.get_time().await?;
        self.expect_sent(Command::SendMessage {
            kind: MessageType::Command,
            attempt: 0,
            timestamp,
            recipient: recipient.prefix(),
            text: text.to_string(),
        })
        .await
    }

    /// Sends a message on a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the clock or sending fails.
    pub async fn send_channel_message(&self, channel: u8, text: &str) -> Result<()> {
        let timestamp = self.get_time().await?;
        let command = Command::SendChannelMessage {
            channel,
            timestamp,
            text: text.to_string(),
        };
        match self.send(command, self.config.command_timeout).await? {
            Response::Ok(_) | Response::MessageSent(_) => Ok(()),
            _ => Err(Error::unexpected("send channel message")),
        }
    }

    /// Fetches the next queued message, or `None` when the queue is empty.
    ///
    /// An empty queue, or no answer at all, clears the waiting-message count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] after the message timeout.
    pub async fn get_message(&self) -> Result<Option<ReceivedMessage>> {
        let result = self
            .send(Command::GetMessage, self.config.message_timeout)
            .await;

        match result {
            Ok(Response::Message(message)) => Ok(Some(message)),
            Ok(Response::NoMoreMessages) => Ok(None),
            Ok(_) => Err(Error::unexpected("get message")),
            Err(err) => {
                if matches!(err, Error::Timeout { .. }) {
                    self.dispatcher.clear_pending_messages();
                }
                Err(err)
            }
        }
    }

    // ==================== Remote Node Commands ====================

    /// Sends a login to a repeater or room server.
    ///
    /// The login slot is re-armed before sending; the outcome arrives later
    /// and is read with [`Dispatcher::wait_for_login`].
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the request.
    pub async fn send_login(&self, key: &PublicKey, password: &str) -> Result<MessageSent> {
        self.dispatcher.arm_login();
        self.expect_sent(Command::SendLogin {
            key: key.clone(),
            password: password.to_string(),
        })
        .await
    }

    /// Asks a node for its status; read it with [`Dispatcher::wait_for_status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the request.
    pub async fn send_status_request(&self, key: &PublicKey) -> Result<MessageSent> {
        self.dispatcher.arm_status();
        self.expect_sent(Command::SendStatusReq(key.clone())).await
    }

    /// Asks a node for telemetry; read it with [`Dispatcher::wait_for_telemetry`].
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the request.
    pub async fn send_telemetry_request(&self, key: &PublicKey) -> Result<MessageSent> {
        self.dispatcher.arm_telemetry();
        self.expect_sent(Command::SendTelemetryReq(key.clone())).await
    }
}
