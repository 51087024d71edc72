//! Event system for push notifications.
//!
//! Unsolicited frames from the device, and connection lifecycle changes, are
//! broadcast to every [`Subscription`]. Direct responses never appear here;
//! they resolve the pending request instead.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::types::{Acknowledgment, DeviceStatus, PublicKey, RawRadioFrame, TelemetryReport};

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// A node advertised itself.
    Advertisement(PublicKey),
    /// Path update notification (contains public key of updated contact).
    PathUpdate(PublicKey),
    /// ACK received.
    Ack(Acknowledgment),
    /// Messages are waiting on the device.
    MessagesWaiting,
    /// Overheard radio frame.
    RawData(RawRadioFrame),
    /// Login was successful.
    LoginSuccess,
    /// Login failed.
    LoginFailed,
    /// Status response received.
    StatusResponse(Box<DeviceStatus>),
    /// Log data received.
    LogData(Bytes),
    /// Telemetry response received.
    TelemetryResponse(TelemetryReport),
    /// Frame with an opcode this client does not know.
    Unknown {
        /// Opcode byte.
        opcode: u8,
        /// Remaining bytes.
        data: Bytes,
    },
}

/// Discriminant of [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::Connected`].
    Connected,
    /// [`Event::Disconnected`].
    Disconnected,
    /// [`Event::Advertisement`].
    Advertisement,
    /// [`Event::PathUpdate`].
    PathUpdate,
    /// [`Event::Ack`].
    Ack,
    /// [`Event::MessagesWaiting`].
    MessagesWaiting,
    /// [`Event::RawData`].
    RawData,
    /// [`Event::LoginSuccess`].
    LoginSuccess,
    /// [`Event::LoginFailed`].
    LoginFailed,
    /// [`Event::StatusResponse`].
    StatusResponse,
    /// [`Event::LogData`].
    LogData,
    /// [`Event::TelemetryResponse`].
    TelemetryResponse,
    /// [`Event::Unknown`].
    Unknown,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Advertisement(_) => EventKind::Advertisement,
            Self::PathUpdate(_) => EventKind::PathUpdate,
            Self::Ack(_) => EventKind::Ack,
            Self::MessagesWaiting => EventKind::MessagesWaiting,
            Self::RawData(_) => EventKind::RawData,
            Self::LoginSuccess => EventKind::LoginSuccess,
            Self::LoginFailed => EventKind::LoginFailed,
            Self::StatusResponse(_) => EventKind::StatusResponse,
            Self::LogData(_) => EventKind::LogData,
            Self::TelemetryResponse(_) => EventKind::TelemetryResponse,
            Self::Unknown { .. } => EventKind::Unknown,
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter for specific ACK code.
    pub ack_code: Option<u32>,
}

impl EventFilter {
    /// Creates a filter that accepts every event.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            kinds: None,
            ack_code: None,
        }
    }

    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            ack_code: None,
        }
    }

    /// Creates a filter for a specific ACK code.
    #[must_use]
    pub fn ack(code: u32) -> Self {
        Self {
            kinds: Some(vec![EventKind::Ack]),
            ack_code: Some(code),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(expected) = self.ack_code {
            return matches!(event, Event::Ack(ack) if ack.code == Some(expected));
        }

        true
    }
}

/// A filtered subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl Subscription {
    /// Receives the next event that passes the filter.
    ///
    /// Returns `None` once the bus is gone. Events missed because this
    /// subscriber fell behind are skipped with a warning.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("event subscriber lagged, {missed} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Broadcasts events to subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new event bus.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    pub fn publish(&self, event: Event) {
        tracing::trace!("event: {:?}", event.kind());
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribes to events passing `filter`.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Waits for an event matching the filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nothing matches in time and
    /// [`Error::Disconnected`] if the link drops first (unless the filter
    /// was waiting for exactly that).
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Result<Event> {
        let mut subscription = self.subscribe(EventFilter::all());

        let wait = async {
            while let Some(event) = subscription.recv().await {
                if filter.matches(&event) {
                    return Ok(event);
                }
                if event == Event::Disconnected {
                    return Err(Error::Disconnected);
                }
            }
            Err(Error::Disconnected)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_publish() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(Event::Connected);

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(Event::Connected));
    }

    #[tokio::test]
    async fn test_subscription_applies_filter() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(EventFilter::kinds(vec![EventKind::MessagesWaiting]));

        bus.publish(Event::LoginSuccess);
        bus.publish(Event::Advertisement(PublicKey::new([1; 32])));
        bus.publish(Event::MessagesWaiting);

        assert_eq!(sub.recv().await, Some(Event::MessagesWaiting));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![EventKind::LoginSuccess, EventKind::LoginFailed]);

        assert!(filter.matches(&Event::LoginSuccess));
        assert!(filter.matches(&Event::LoginFailed));
        assert!(!filter.matches(&Event::Connected));
        assert!(EventFilter::all().matches(&Event::Connected));
    }

    #[test]
    fn test_ack_filter() {
        let filter = EventFilter::ack(12345);

        assert!(filter.matches(&Event::Ack(Acknowledgment { code: Some(12345) })));
        assert!(!filter.matches(&Event::Ack(Acknowledgment { code: Some(99999) })));
        assert!(!filter.matches(&Event::Ack(Acknowledgment { code: None })));
        assert!(!filter.matches(&Event::MessagesWaiting));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let bus = EventBus::new(4);
        let result = bus
            .wait_for(EventFilter::kinds(vec![EventKind::Ack]), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_disconnect() {
        let bus = EventBus::new(4);
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.wait_for(EventFilter::kinds(vec![EventKind::Ack]), Duration::from_secs(5))
                    .await
            })
        };
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        bus.publish(Event::Disconnected);
        assert!(matches!(waiter.await.unwrap(), Err(Error::Disconnected)));
    }
}
