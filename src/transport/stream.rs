//! Shared plumbing for byte-stream links (serial and TCP).

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{FrameCodec, StreamCodec, encode_frame};

const READ_BUFFER_SIZE: usize = 1024;

/// Reads from `reader` until EOF or error, forwarding every complete frame.
///
/// Returns when the stream ends, a read fails, or the receiving side of
/// `frames` has gone away. The sender is dropped on return either way.
pub(crate) async fn run_read_loop<R, C>(
    mut reader: R,
    mut codec: C,
    frames: mpsc::Sender<Bytes>,
    link: &'static str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    C: FrameCodec,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("{link} stream closed");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("{link} read error: {e}");
                return Err(Error::Io(e));
            }
        };

        tracing::trace!("{link}: received {n} bytes");
        for frame in codec.decode_chunk(&buf[..n]) {
            tracing::trace!("{link}: decoded frame: {} bytes", frame.len());
            if frames.send(frame).await.is_err() {
                tracing::debug!("{link}: frame receiver dropped");
                return Ok(());
            }
        }
    }
}

/// Write half plus reader task of one connected stream.
pub(crate) struct StreamLink<S> {
    link: &'static str,
    writer: Option<WriteHalf<S>>,
    reader: Option<JoinHandle<()>>,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(crate) const fn new(link: &'static str) -> Self {
        Self {
            link,
            writer: None,
            reader: None,
        }
    }

    /// Splits `stream` and spawns the reader task feeding `frames`.
    pub(crate) fn attach(&mut self, stream: S, frames: mpsc::Sender<Bytes>) {
        self.detach();

        let (reader, writer) = tokio::io::split(stream);
        let link = self.link;
        self.reader = Some(tokio::spawn(async move {
            if let Err(e) = run_read_loop(reader, StreamCodec::new(), frames, link).await {
                tracing::warn!("{link} reader stopped: {e}");
            }
        }));
        self.writer = Some(writer);
    }

    /// Tears the link down. Returns false if it was not attached.
    pub(crate) fn detach(&mut self) -> bool {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer.take().is_some()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.writer.is_some()
            && self
                .reader
                .as_ref()
                .is_some_and(|reader| !reader.is_finished())
    }

    /// Frames `payload` and writes it out.
    pub(crate) async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        let frame = encode_frame(payload)?;
        tracing::trace!("{}: sending frame: {} bytes", self.link, frame.len());

        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl<S> Drop for StreamLink<S> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::INBOUND_MARKER;

    fn device_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![INBOUND_MARKER];
        frame.extend_from_slice(&u16::try_from(payload.len()).unwrap().to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn test_read_loop_reassembles_split_frames() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        let reader = tokio::spawn(run_read_loop(host, StreamCodec::new(), tx, "test"));

        let mut bytes = device_frame(&[0x09, 1, 2, 3, 4]);
        bytes.extend(device_frame(&[0x00]));
        device.write_all(&bytes[..2]).await.unwrap();
        device.write_all(&bytes[2..6]).await.unwrap();
        device.write_all(&bytes[6..]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0x09, 1, 2, 3, 4]));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0x00]));

        drop(device);
        assert!(rx.recv().await.is_none());
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_loop_stops_when_receiver_dropped() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let reader = tokio::spawn(run_read_loop(host, StreamCodec::new(), tx, "test"));

        device.write_all(&device_frame(&[0x0a])).await.unwrap();
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stream_link_send_frames_payload() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(1);
        let mut link = StreamLink::new("test");

        assert!(matches!(link.send(&[0x05]).await, Err(Error::NotConnected)));

        link.attach(host, tx);
        assert!(link.is_attached());
        link.send(&[0x05]).await.unwrap();

        let mut buf = [0u8; 4];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x3c, 0x01, 0x00, 0x05]);

        assert!(link.detach());
        assert!(!link.detach());
        assert!(!link.is_attached());
    }

    #[tokio::test]
    async fn test_stream_link_detach_closes_channel() {
        let (_device, host) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(1);
        let mut link = StreamLink::new("test");

        link.attach(host, tx);
        link.detach();
        assert!(rx.recv().await.is_none());
    }
}
