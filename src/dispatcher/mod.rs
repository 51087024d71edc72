//! Protocol state machine.
//!
//! The [`Dispatcher`] owns everything the inbound path mutates: the single
//! pending-request slot, the contact and self-info caches, and the waiting
//! primitives. Frames are fed in through [`Dispatcher::handle_rx`]; callers
//! start requests with [`Dispatcher::begin_request`] and wait on the result.
//!
//! State is held behind a short-lived lock that is never held across an
//! await, so feeding a frame and starting a request are atomic with respect
//! to each other.

pub mod sync;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::config::FirmwareProfile;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus};
use crate::protocol::{Inbound, PacketType};
use crate::types::{
    BatteryStatus, Contact, Contacts, DeviceInfo, DeviceStatus, MessageSent, ReceivedMessage,
    SelfInfo, TelemetryReport,
};

use self::sync::{AckFlag, CancelToken, Cancellation, MessageCounter, PendingResponse, ReplySlot};

/// A decoded direct response, delivered to the caller that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Command succeeded, optionally with a value.
    Ok(Option<u32>),
    /// Full contact list.
    Contacts(Contacts),
    /// Handshake reply.
    SelfInfo(Box<SelfInfo>),
    /// Device query reply.
    DeviceInfo(DeviceInfo),
    /// Outgoing packet queued.
    MessageSent(MessageSent),
    /// Next queued message.
    Message(ReceivedMessage),
    /// Message queue is empty.
    NoMoreMessages,
    /// Device clock.
    CurrentTime(u32),
    /// Exported contact card.
    ContactUri(String),
    /// Battery and storage.
    Battery(BatteryStatus),
}

/// Receiver a caller waits on for its response.
pub type ResponseReceiver = oneshot::Receiver<Result<Response>>;

#[derive(Debug, Default)]
struct ContactStaging {
    expected: Option<u32>,
    contacts: Contacts,
}

#[derive(Debug, Default)]
struct State {
    pending: PendingResponse<Result<Response>>,
    contacts: Contacts,
    staging: Option<ContactStaging>,
    self_info: Option<SelfInfo>,
}

/// Decodes inbound frames and routes them to waiters, caches and events.
#[derive(Debug)]
pub struct Dispatcher {
    profile: FirmwareProfile,
    state: Mutex<State>,
    messages: MessageCounter,
    ack: AckFlag,
    login: ReplySlot<bool>,
    status: ReplySlot<DeviceStatus>,
    telemetry: ReplySlot<TelemetryReport>,
    events: EventBus,
    cancellation: Cancellation,
}

impl Dispatcher {
    /// Creates a dispatcher publishing push events on `events`.
    #[must_use]
    pub fn new(profile: FirmwareProfile, events: EventBus) -> Self {
        Self {
            profile,
            state: Mutex::new(State::default()),
            messages: MessageCounter::new(),
            ack: AckFlag::new(),
            login: ReplySlot::new(),
            status: ReplySlot::new(),
            telemetry: ReplySlot::new(),
            events,
            cancellation: Cancellation::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the firmware profile used for decoding.
    #[must_use]
    pub const fn profile(&self) -> FirmwareProfile {
        self.profile
    }

    /// Returns the event bus push notifications go to.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns a token that fires when the link goes down.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancellation.token()
    }

    /// Opens the pending slot for a new request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while another request is unresolved and
    /// [`Error::Disconnected`] once the link is down.
    pub fn begin_request(&self) -> Result<ResponseReceiver> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Disconnected);
        }
        self.state().pending.begin()
    }

    /// Waits for the response to a request opened with [`begin_request`].
    ///
    /// On timeout the receiver is dropped; a reply arriving later is
    /// discarded.
    ///
    /// [`begin_request`]: Self::begin_request
    ///
    /// # Errors
    ///
    /// Returns the device's rejection, a decode error, [`Error::Timeout`] or
    /// [`Error::Disconnected`].
    pub async fn await_response(
        &self,
        receiver: ResponseReceiver,
        timeout: Duration,
    ) -> Result<Response> {
        match sync::guarded(receiver, Some(timeout), &self.cancellation.token()).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(err) => {
                if matches!(err, Error::Timeout { .. }) {
                    tracing::warn!("no response within {timeout:?}");
                }
                Err(err)
            }
        }
    }

    fn resolve(&self, response: Result<Response>) {
        if !self.state().pending.resolve(response) {
            tracing::debug!("response arrived with no request waiting, discarded");
        }
    }

    /// Handles one complete inbound frame.
    pub fn handle_rx(&self, frame: &Bytes) {
        tracing::trace!("rx frame: {}", hex::encode(frame));

        match Inbound::decode(frame, self.profile) {
            Ok(inbound) => self.apply(inbound),
            Err(err) => {
                let Some(&opcode) = frame.first() else {
                    tracing::warn!("dropping empty frame");
                    return;
                };
                tracing::warn!("failed to decode frame 0x{opcode:02x}: {err}");
                match PacketType::from_byte(opcode) {
                    Some(PacketType::Contact) => {
                        tracing::warn!("skipping undecodable contact record");
                    }
                    Some(packet) if packet.is_response() => self.resolve(Err(err.into())),
                    _ => {}
                }
            }
        }
    }

    fn apply(&self, inbound: Inbound) {
        match inbound {
            Inbound::Ok(value) => self.resolve(Ok(Response::Ok(value))),
            Inbound::Error(code) => {
                tracing::debug!("device rejected command: {code:?}");
                self.resolve(Err(code.map_or(Error::Rejected, Error::Device)));
            }
            Inbound::ContactsStart { expected } => {
                tracing::debug!("contact enumeration started, expecting {expected:?}");
                self.state().staging = Some(ContactStaging {
                    expected,
                    contacts: Contacts::new(),
                });
            }
            Inbound::Contact(contact) => self.stage_contact(contact),
            Inbound::ContactsEnd => self.finish_contacts(),
            Inbound::SelfInfo(mut info) => {
                {
                    let mut state = self.state();
                    info.device = state.self_info.take().and_then(|old| old.device);
                    state.self_info = Some(info.clone());
                }
                self.resolve(Ok(Response::SelfInfo(Box::new(info))));
            }
            Inbound::DeviceInfo(device) => {
                if let Some(info) = self.state().self_info.as_mut() {
                    info.device = Some(device.clone());
                }
                self.resolve(Ok(Response::DeviceInfo(device)));
            }
            Inbound::MessageSent(sent) => self.resolve(Ok(Response::MessageSent(sent))),
            Inbound::ContactMessage(msg) => {
                self.resolve(Ok(Response::Message(ReceivedMessage::Contact(msg))));
            }
            Inbound::ChannelMessage(msg) => {
                self.resolve(Ok(Response::Message(ReceivedMessage::Channel(msg))));
            }
            Inbound::CurrentTime(time) => self.resolve(Ok(Response::CurrentTime(time))),
            Inbound::NoMoreMessages => {
                self.messages.reset();
                self.resolve(Ok(Response::NoMoreMessages));
            }
            Inbound::ContactUri(uri) => self.resolve(Ok(Response::ContactUri(uri))),
            Inbound::Battery(battery) => self.resolve(Ok(Response::Battery(battery))),
            Inbound::Advert(key) => self.events.publish(Event::Advertisement(key)),
            Inbound::PathUpdate(key) => self.events.publish(Event::PathUpdate(key)),
            Inbound::Ack(ack) => {
                self.ack.raise(ack.code);
                self.events.publish(Event::Ack(ack));
            }
            Inbound::MessagesWaiting => {
                self.messages.increment();
                self.events.publish(Event::MessagesWaiting);
            }
            Inbound::RawData(frame) => self.events.publish(Event::RawData(frame)),
            Inbound::LoginSuccess => {
                self.login.resolve(true);
                self.events.publish(Event::LoginSuccess);
            }
            Inbound::LoginFailed => {
                self.login.resolve(false);
                self.events.publish(Event::LoginFailed);
            }
            Inbound::Status(status) => {
                self.status.resolve(status.clone());
                self.events.publish(Event::StatusResponse(Box::new(status)));
            }
            Inbound::LogData(data) => self.events.publish(Event::LogData(data)),
            Inbound::Telemetry(report) => {
                self.telemetry.resolve(report.clone());
                self.events.publish(Event::TelemetryResponse(report));
            }
            Inbound::Unknown { opcode, data } => {
                tracing::warn!("unknown opcode 0x{opcode:02x} ({} bytes), ignored", data.len());
                self.events.publish(Event::Unknown { opcode, data });
            }
        }
    }

    fn stage_contact(&self, contact: Contact) {
        let mut state = self.state();
        let name = contact.adv_name.clone();
        let replaced = match state.staging.as_mut() {
            Some(staging) => staging.contacts.insert(name.clone(), contact),
            None => {
                tracing::debug!("contact record outside enumeration, merged into cache");
                state.contacts.insert(name.clone(), contact)
            }
        };
        if replaced.is_some() {
            tracing::debug!("contact name collision on {name:?}, keeping the latest");
        }
    }

    fn finish_contacts(&self) {
        let contacts = {
            let mut state = self.state();
            let staging = state.staging.take().unwrap_or_default();
            if let Some(expected) = staging.expected {
                if usize::try_from(expected).ok() != Some(staging.contacts.len()) {
                    tracing::warn!(
                        "contact enumeration announced {expected}, received {}",
                        staging.contacts.len()
                    );
                }
            }
            state.contacts.clone_from(&staging.contacts);
            staging.contacts
        };
        tracing::debug!("contact cache replaced ({} entries)", contacts.len());
        self.resolve(Ok(Response::Contacts(contacts)));
    }

    /// Returns a snapshot of the contact cache.
    #[must_use]
    pub fn contacts(&self) -> Contacts {
        self.state().contacts.clone()
    }

    /// Returns true if the contact cache is empty.
    #[must_use]
    pub fn contacts_empty(&self) -> bool {
        self.state().contacts.is_empty()
    }

    /// Looks up a cached contact by advertised name.
    #[must_use]
    pub fn contact_by_name(&self, name: &str) -> Option<Contact> {
        self.state().contacts.get(name).cloned()
    }

    /// Looks up a cached contact by public key prefix.
    #[must_use]
    pub fn contact_by_prefix(&self, prefix: &[u8]) -> Option<Contact> {
        self.state()
            .contacts
            .values()
            .find(|c| c.public_key.as_bytes().starts_with(prefix))
            .cloned()
    }

    /// Replaces a cached contact (keyed by its name).
    pub fn cache_contact(&self, contact: Contact) {
        self.state()
            .contacts
            .insert(contact.adv_name.clone(), contact);
    }

    /// Returns the cached self info.
    #[must_use]
    pub fn self_info(&self) -> Option<SelfInfo> {
        self.state().self_info.clone()
    }

    /// Lowers the ACK flag before sending something that expects one.
    pub fn clear_ack(&self) {
        self.ack.clear();
    }

    /// Waits for any ACK since the last clear.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_ack(&self, timeout: Duration) -> Result<()> {
        self.ack.wait(timeout, &self.cancel_token()).await
    }

    /// Waits for an ACK carrying `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_ack_code(&self, code: u32, timeout: Duration) -> Result<()> {
        self.ack
            .wait_for_code(code, timeout, &self.cancel_token())
            .await
    }

    /// Returns the number of messages the device reported waiting.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.messages.count()
    }

    /// Forgets every waiting-message notice.
    pub fn clear_pending_messages(&self) {
        self.messages.reset();
    }

    /// Waits until a message is reported waiting and consumes the notice.
    ///
    /// `None` waits without a time bound (disconnect still ends it).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_message(&self, timeout: Option<Duration>) -> Result<()> {
        self.messages.wait(timeout, &self.cancel_token()).await
    }

    /// Re-creates the login slot; call right before sending a login.
    pub fn arm_login(&self) {
        self.login.arm();
    }

    /// Waits for the login result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_login(&self, timeout: Duration) -> Result<bool> {
        self.login.wait(timeout, &self.cancel_token()).await
    }

    /// Re-creates the status slot; call right before sending a status request.
    pub fn arm_status(&self) {
        self.status.arm();
    }

    /// Waits for a status response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_status(&self, timeout: Duration) -> Result<DeviceStatus> {
        self.status.wait(timeout, &self.cancel_token()).await
    }

    /// Re-creates the telemetry slot; call right before sending a request.
    pub fn arm_telemetry(&self) {
        self.telemetry.arm();
    }

    /// Waits for a telemetry response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_telemetry(&self, timeout: Duration) -> Result<TelemetryReport> {
        self.telemetry.wait(timeout, &self.cancel_token()).await
    }

    /// Marks the link as up again after a reconnect.
    pub fn connected(&self) {
        self.cancellation.reset();
        self.events.publish(Event::Connected);
    }

    /// Fails every outstanding wait and announces the disconnect.
    pub fn disconnect(&self) {
        if self.cancellation.is_cancelled() {
            return;
        }
        tracing::info!("link down, cancelling outstanding waits");
        self.cancellation.cancel();
        {
            let mut state = self.state();
            state.pending.resolve(Err(Error::Disconnected));
            state.staging = None;
        }
        self.login.close();
        self.status.close();
        self.telemetry.close();
        self.events.publish(Event::Disconnected);
    }

    /// Returns true once [`disconnect`](Self::disconnect) has run.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::{DecodeError, FirmwareErrorCode};
    use crate::event::{EventFilter, EventKind};
    use crate::protocol::parser::tests::{contact_record, self_info_record};
    use crate::types::PathLen;

    const SHORT: Duration = Duration::from_millis(50);

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(FirmwareProfile::CURRENT, EventBus::new(16)))
    }

    fn feed(dispatcher: &Dispatcher, bytes: &[u8]) {
        dispatcher.handle_rx(&Bytes::copy_from_slice(bytes));
    }

    fn contact_frame(name: &str, key: u8, path_len: u8) -> Vec<u8> {
        let mut frame = vec![0x03];
        frame.extend_from_slice(&contact_record(name, key, path_len, &[]));
        frame
    }

    fn enumerate(dispatcher: &Dispatcher, names: &[(&str, u8)]) -> Response {
        let mut rx = dispatcher.begin_request().unwrap();
        let mut start = vec![0x02];
        start.extend_from_slice(&(names.len() as u32).to_le_bytes());
        feed(dispatcher, &start);
        for (name, key) in names {
            feed(dispatcher, &contact_frame(name, *key, 0xFF));
        }
        feed(dispatcher, &[0x04]);
        rx.try_recv().unwrap().unwrap()
    }

    #[test]
    fn test_second_request_rejected_while_first_waits() {
        let dispatcher = dispatcher();
        let mut first = dispatcher.begin_request().unwrap();
        assert!(matches!(dispatcher.begin_request(), Err(Error::Busy)));

        // The first caller still gets its own result.
        feed(&dispatcher, &[0x09, 1, 0, 0, 0]);
        assert_eq!(
            first.try_recv().unwrap().unwrap(),
            Response::CurrentTime(1)
        );
        assert!(dispatcher.begin_request().is_ok());
    }

    #[tokio::test]
    async fn test_get_time_example() {
        let dispatcher = dispatcher();
        let rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x09, 0x10, 0x32, 0x54, 0x76]);
        let response = dispatcher.await_response(rx, SHORT).await.unwrap();
        assert_eq!(
            response,
            Response::CurrentTime(0x10 | (0x32 << 8) | (0x54 << 16) | (0x76 << 24))
        );
    }

    #[tokio::test]
    async fn test_timeout_then_late_reply_discarded() {
        let dispatcher = dispatcher();
        let rx = dispatcher.begin_request().unwrap();
        let result = dispatcher.await_response(rx, SHORT).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));

        // Slot is free again; the late reply goes nowhere.
        feed(&dispatcher, &[0x00]);
        let mut next = dispatcher.begin_request().unwrap();
        assert!(next.try_recv().is_err());
        feed(&dispatcher, &[0x00, 3, 0, 0, 0]);
        assert_eq!(next.try_recv().unwrap().unwrap(), Response::Ok(Some(3)));
    }

    #[test]
    fn test_error_responses() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x01, 2]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::Device(FirmwareErrorCode::NotFound))
        ));

        let mut rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x01]);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Rejected)));
    }

    #[test]
    fn test_decode_error_fails_pending_request() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x09, 1]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::Decode(DecodeError::TooShort { .. }))
        ));
    }

    #[test]
    fn test_empty_frame_leaves_pending_request() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.begin_request().unwrap();
        dispatcher.handle_rx(&Bytes::new());
        assert!(rx.try_recv().is_err());

        feed(&dispatcher, &[0x09, 1, 0, 0, 0]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Response::CurrentTime(1));
    }

    #[test]
    fn test_contact_round_trip_and_replacement() {
        let dispatcher = dispatcher();

        let Response::Contacts(first) = enumerate(&dispatcher, &[("alice", 1), ("bob", 2)]) else {
            panic!("expected contacts");
        };
        assert_eq!(first.len(), 2);
        assert_eq!(first["alice"].public_key.as_bytes(), &[1; 32]);
        assert_eq!(first["bob"].public_key.as_bytes(), &[2; 32]);
        assert_eq!(dispatcher.contacts(), first);

        let Response::Contacts(second) = enumerate(&dispatcher, &[("carol", 3)]) else {
            panic!("expected contacts");
        };
        assert_eq!(second.len(), 1);
        assert!(dispatcher.contact_by_name("alice").is_none());
        assert!(dispatcher.contact_by_name("carol").is_some());
        assert_eq!(
            dispatcher.contact_by_prefix(&[3, 3]).unwrap().adv_name,
            "carol"
        );
    }

    #[test]
    fn test_contact_name_collision_overwrites() {
        let dispatcher = dispatcher();
        let Response::Contacts(contacts) = enumerate(&dispatcher, &[("dup", 1), ("dup", 2)]) else {
            panic!("expected contacts");
        };
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts["dup"].public_key.as_bytes(), &[2; 32]);
    }

    #[test]
    fn test_bad_contact_record_skipped() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x02, 2, 0, 0, 0]);
        feed(&dispatcher, &contact_frame("good", 1, 0));
        feed(&dispatcher, &contact_frame("bad", 2, 70)); // path longer than 64
        feed(&dispatcher, &[0x04]);

        let Response::Contacts(contacts) = rx.try_recv().unwrap().unwrap() else {
            panic!("expected contacts");
        };
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts["good"].out_path_len, PathLen::Direct(0));
    }

    #[test]
    fn test_self_info_keeps_device_info() {
        let dispatcher = dispatcher();
        let mut rx = dispatcher.begin_request().unwrap();
        let mut frame = vec![0x05];
        frame.extend_from_slice(&self_info_record("node"));
        feed(&dispatcher, &frame);
        assert!(matches!(
            rx.try_recv().unwrap().unwrap(),
            Response::SelfInfo(_)
        ));

        let _rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x0D, 2]);
        let info = dispatcher.self_info().unwrap();
        assert_eq!(info.name, "node");
        assert_eq!(info.device.unwrap().firmware_version, 2);

        // A later handshake keeps the merged device info.
        let _rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &frame);
        assert!(dispatcher.self_info().unwrap().device.is_some());
    }

    #[tokio::test]
    async fn test_ack_push_wakes_waiter() {
        let dispatcher = dispatcher();
        dispatcher.clear_ack();

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.wait_for_ack(Duration::from_secs(2)).await })
        };
        tokio::task::yield_now().await;
        feed(&dispatcher, &[0x82, 0xEF, 0xBE, 0xAD, 0xDE]);
        waiter.await.unwrap().unwrap();
        dispatcher
            .wait_for_ack_code(0xDEAD_BEEF, SHORT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ack_timeout() {
        let dispatcher = dispatcher();
        dispatcher.clear_ack();
        let result = dispatcher.wait_for_ack(SHORT).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_waiting_counter() {
        let dispatcher = dispatcher();
        for _ in 0..3 {
            feed(&dispatcher, &[0x83]);
        }
        assert_eq!(dispatcher.pending_messages(), 3);

        for _ in 0..3 {
            dispatcher.wait_for_message(Some(SHORT)).await.unwrap();
        }
        assert!(matches!(
            dispatcher.wait_for_message(Some(SHORT)).await,
            Err(Error::Timeout { .. })
        ));

        feed(&dispatcher, &[0x83]);
        feed(&dispatcher, &[0x83]);
        let _rx = dispatcher.begin_request().unwrap();
        feed(&dispatcher, &[0x0A]);
        assert_eq!(dispatcher.pending_messages(), 0);
    }

    #[tokio::test]
    async fn test_login_and_status_slots() {
        let dispatcher = dispatcher();

        dispatcher.arm_login();
        feed(&dispatcher, &[0x86]);
        assert!(!dispatcher.wait_for_login(SHORT).await.unwrap());

        dispatcher.arm_status();
        let mut status = vec![0x87];
        status.extend_from_slice(&[0u8; 55]);
        feed(&dispatcher, &status);
        assert_eq!(dispatcher.wait_for_status(SHORT).await.unwrap().battery_mv, 0);

        dispatcher.arm_telemetry();
        feed(&dispatcher, &[0x8B, 0, 1, 2, 3, 4, 5, 6, 0x01, 0x02]);
        let report = dispatcher.wait_for_telemetry(SHORT).await.unwrap();
        assert_eq!(&report.lpp[..], &[0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_unknown_opcode_changes_nothing() {
        let dispatcher = dispatcher();
        enumerate(&dispatcher, &[("alice", 1)]);
        let mut rx = dispatcher.begin_request().unwrap();
        let mut events = dispatcher
            .events()
            .subscribe(EventFilter::kinds(vec![EventKind::Unknown]));

        feed(&dispatcher, &[0x42, 0xAA]);

        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.contacts().len(), 1);
        assert_eq!(dispatcher.pending_messages(), 0);
        assert!(matches!(
            events.recv().await,
            Some(Event::Unknown { opcode: 0x42, .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_every_wait() {
        let dispatcher = dispatcher();
        let rx = dispatcher.begin_request().unwrap();
        dispatcher.arm_login();
        dispatcher.clear_ack();

        let request = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .await_response(rx, Duration::from_secs(5))
                    .await
            })
        };
        let ack = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.wait_for_ack(Duration::from_secs(5)).await })
        };
        let message = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.wait_for_message(None).await })
        };
        let login = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.wait_for_login(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        dispatcher.disconnect();

        assert!(matches!(request.await.unwrap(), Err(Error::Disconnected)));
        assert!(matches!(ack.await.unwrap(), Err(Error::Disconnected)));
        assert!(matches!(message.await.unwrap(), Err(Error::Disconnected)));
        assert!(matches!(login.await.unwrap(), Err(Error::Disconnected)));
        assert!(matches!(dispatcher.begin_request(), Err(Error::Disconnected)));

        dispatcher.connected();
        assert!(dispatcher.begin_request().is_ok());
    }
}
