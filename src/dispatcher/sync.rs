//! Waiting primitives shared between the inbound path and command callers.
//!
//! Every wait here is bounded by an optional timeout and by a [`CancelToken`]
//! that fires when the link goes away, so no caller can hang on a dead device.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, oneshot, watch};

use crate::error::{Error, Result};

/// Most ACK codes remembered between two clears.
const MAX_ACK_CODES: usize = 16;

/// Owner side of the disconnect signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// Creates a signal in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the signal, waking every wait observing it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Lowers the signal again for a new connection.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Returns true once the signal has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a token observing this signal.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the disconnect signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Completes once the signal is raised (or its owner is gone).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Returns true if the signal is currently raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Runs `fut` until it completes, the optional timeout elapses, or the
/// token fires.
pub(crate) async fn guarded<F: Future>(
    fut: F,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<F::Output> {
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::timeout(limit)),
            None => Ok(fut.await),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Disconnected),
        result = bounded => result,
    }
}

/// The single outstanding-request slot.
///
/// A fresh one-shot channel is created per request. The slot counts as busy
/// only while its receiver is still held; a caller that timed out drops the
/// receiver, so the next request may go ahead.
#[derive(Debug)]
pub struct PendingResponse<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T> Default for PendingResponse<T> {
    fn default() -> Self {
        Self { tx: None }
    }
}

impl<T> PendingResponse<T> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self { tx: None }
    }

    /// Returns true while a caller is still waiting.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Starts a request, returning the receiver its response will arrive on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another request is still waiting.
    pub fn begin(&mut self) -> Result<oneshot::Receiver<T>> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let (tx, rx) = oneshot::channel();
        self.tx = Some(tx);
        Ok(rx)
    }

    /// Delivers a response. Returns false if nobody was waiting for it.
    pub fn resolve(&mut self, value: T) -> bool {
        self.tx.take().is_some_and(|tx| tx.send(value).is_ok())
    }
}

/// Count of messages queued on the device.
///
/// Incremented by the messages-waiting push, decremented by each successful
/// [`MessageCounter::wait`], and forced to zero by a no-more-messages reply.
#[derive(Debug)]
pub struct MessageCounter {
    permits: Semaphore,
}

impl Default for MessageCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Records one more waiting message.
    pub fn increment(&self) {
        self.permits.add_permits(1);
    }

    /// Returns the current count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.permits.available_permits()
    }

    /// Forces the count back to zero.
    pub fn reset(&self) {
        let mut drained = 0usize;
        while let Ok(permit) = self.permits.try_acquire() {
            permit.forget();
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!("message counter reset from {drained}");
        }
    }

    /// Waits until a message is waiting and consumes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait(&self, timeout: Option<Duration>, cancel: &CancelToken) -> Result<()> {
        let permit = guarded(self.permits.acquire(), timeout, cancel)
            .await?
            .map_err(|_| Error::Disconnected)?;
        permit.forget();
        Ok(())
    }
}

/// ACK state since the last clear.
#[derive(Debug, Clone, Default)]
struct AckState {
    raised: bool,
    codes: Vec<u32>,
}

/// Level-triggered ACK flag.
#[derive(Debug)]
pub struct AckFlag {
    tx: watch::Sender<AckState>,
}

impl Default for AckFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl AckFlag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AckState::default());
        Self { tx }
    }

    /// Lowers the flag and forgets received codes.
    pub fn clear(&self) {
        self.tx.send_replace(AckState::default());
    }

    /// Raises the flag, remembering the code if one was carried.
    pub fn raise(&self, code: Option<u32>) {
        self.tx.send_modify(|state| {
            state.raised = true;
            if let Some(code) = code {
                if state.codes.len() == MAX_ACK_CODES {
                    state.codes.remove(0);
                }
                state.codes.push(code);
            }
        });
    }

    /// Returns true if an ACK arrived since the last clear.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.tx.borrow().raised
    }

    /// Waits for any ACK.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait(&self, timeout: Duration, cancel: &CancelToken) -> Result<()> {
        let mut rx = self.tx.subscribe();
        guarded(rx.wait_for(|state| state.raised), Some(timeout), cancel)
            .await?
            .map(|_| ())
            .map_err(|_| Error::Disconnected)
    }

    /// Waits for an ACK carrying `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Disconnected`].
    pub async fn wait_for_code(
        &self,
        code: u32,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut rx = self.tx.subscribe();
        guarded(
            rx.wait_for(|state| state.codes.contains(&code)),
            Some(timeout),
            cancel,
        )
        .await?
        .map(|_| ())
        .map_err(|_| Error::Disconnected)
    }
}

#[derive(Debug)]
struct SlotInner<T> {
    tx: Option<oneshot::Sender<T>>,
    rx: Option<oneshot::Receiver<T>>,
    generation: u64,
}

/// One-shot slot for login, status and telemetry replies.
///
/// [`ReplySlot::arm`] is called right before the request goes out, which
/// drops any earlier channel so a stale reply can only land in the new one
/// if it arrives after the request, as a real reply would.
#[derive(Debug)]
pub struct ReplySlot<T> {
    inner: Mutex<SlotInner<T>>,
}

impl<T> Default for ReplySlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReplySlot<T> {
    /// Creates an unarmed slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                tx: None,
                rx: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the slot with a fresh channel.
    pub fn arm(&self) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        inner.tx = Some(tx);
        inner.rx = Some(rx);
        inner.generation += 1;
    }

    /// Delivers a reply. Returns false if the slot was not armed.
    pub fn resolve(&self, value: T) -> bool {
        self.lock().tx.take().is_some_and(|tx| tx.send(value).is_ok())
    }

    /// Disarms the slot, failing any waiter.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.tx = None;
        inner.rx = None;
    }

    /// Waits for the reply to the most recent request.
    ///
    /// After a timeout the slot stays armed, so a second wait may still
    /// pick up a slow reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`], [`Error::Disconnected`], or a protocol
    /// error if no request is armed or a newer request replaced this one.
    pub async fn wait(&self, timeout: Duration, cancel: &CancelToken) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(Error::Disconnected);
        }
        let (mut rx, generation) = {
            let mut inner = self.lock();
            let rx = inner.rx.take().ok_or_else(|| Error::Protocol {
                message: "no request awaiting a reply".into(),
            })?;
            (rx, inner.generation)
        };

        match guarded(&mut rx, Some(timeout), cancel).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) if cancel.is_cancelled() => Err(Error::Disconnected),
            Ok(Err(_)) => Err(Error::Protocol {
                message: "reply superseded by a newer request".into(),
            }),
            Err(err @ Error::Timeout { .. }) => {
                let mut inner = self.lock();
                if inner.generation == generation && inner.rx.is_none() {
                    inner.rx = Some(rx);
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
