//! In-memory transport for request/response tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportFuture};

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// Records every outbound payload and answers with canned inbound frames.
pub(crate) struct MockTransport {
    sent: Arc<Mutex<Vec<Bytes>>>,
    frames: Option<mpsc::Sender<Bytes>>,
    responder: Responder,
}

impl MockTransport {
    /// Replies to each payload with whatever `responder` returns for it.
    pub(crate) fn new(responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            frames: None,
            responder: Box::new(responder),
        }
    }

    /// A device that never answers.
    pub(crate) fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    pub(crate) fn sent_log(&self) -> Arc<Mutex<Vec<Bytes>>> {
        Arc::clone(&self.sent)
    }

    /// Returns a handle for pushing unsolicited frames.
    pub(crate) fn injector(&self) -> Option<mpsc::Sender<Bytes>> {
        self.frames.clone()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, frames: mpsc::Sender<Bytes>) -> TransportFuture<'_> {
        self.frames = Some(frames);
        Box::pin(async { Ok(()) })
    }

    fn disconnect(&mut self) -> TransportFuture<'_> {
        self.frames = None;
        Box::pin(async { Ok(()) })
    }

    fn send(&mut self, payload: Bytes) -> TransportFuture<'_> {
        Box::pin(async move {
            let frames = self.frames.clone().ok_or(Error::NotConnected)?;
            let replies = (self.responder)(&payload);
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(payload);
            for reply in replies {
                frames
                    .send(Bytes::from(reply))
                    .await
                    .map_err(|_| Error::Disconnected)?;
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.frames.is_some()
    }
}
