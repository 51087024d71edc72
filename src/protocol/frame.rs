//! Frame encoding and decoding for the `MeshCore` protocol.
//!
//! Stream transports (serial, TCP) use a simple framing protocol:
//! ```text
//! ┌──────────┬──────────────┬─────────────────┐
//! │  marker  │  size (LE)   │    payload      │
//! │  1 byte  │   2 bytes    │   size bytes    │
//! └──────────┴──────────────┴─────────────────┘
//! ```
//!
//! The marker is `<` on frames sent to the device and `>` on frames coming
//! back, so a bidirectional stream can be told apart. BLE needs no framing:
//! one GATT notification is one frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Marker byte on host → device frames.
pub const OUTBOUND_MARKER: u8 = 0x3c;

/// Marker byte on device → host frames.
pub const INBOUND_MARKER: u8 = 0x3e;

/// Maximum frame payload size (64KB - 1).
pub const MAX_FRAME_SIZE: usize = 65535;

/// Header size (marker + 2-byte length).
pub const HEADER_SIZE: usize = 3;

/// Encodes a payload into an outbound stream frame.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode(payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        size: payload.len(),
        max: MAX_FRAME_SIZE,
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(OUTBOUND_MARKER);
    buf.put_u16_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Turns raw transport deliveries into discrete frames.
pub trait FrameCodec: Send {
    /// Feeds one delivery and returns every frame it completes, in order.
    ///
    /// Bytes belonging to a frame that is not yet complete are retained for
    /// the next call.
    fn decode_chunk(&mut self, data: &[u8]) -> Vec<Bytes>;

    /// Wraps a payload for transmission.
    fn encode(&self, payload: &[u8]) -> Result<Bytes, FrameError>;

    /// Drops any partially received frame.
    fn reset(&mut self);
}

/// Length-prefixed reassembly for serial and TCP streams.
///
/// The buffer keeps the header-so-far and the payload-so-far between calls,
/// so header and payload may each be split across any number of deliveries.
#[derive(Debug, Default)]
pub struct StreamCodec {
    buffer: BytesMut,
    marker_mismatches: u64,
}

impl StreamCodec {
    /// Creates a new stream codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            marker_mismatches: 0,
        }
    }

    /// Appends received bytes to the buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Takes the next complete frame off the front of the buffer.
    ///
    /// Returns `None` when more data is needed. A marker byte other than
    /// [`INBOUND_MARKER`] is logged and the frame is still taken at face
    /// value: the length is trusted, there is no checksum to resync on.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < HEADER_SIZE {
            return None;
        }

        let length = usize::from(u16::from_le_bytes([self.buffer[1], self.buffer[2]]));
        if self.buffer.len() < HEADER_SIZE + length {
            return None;
        }

        let marker = self.buffer[0];
        if marker != INBOUND_MARKER {
            self.marker_mismatches += 1;
            tracing::warn!(
                "unexpected frame marker 0x{marker:02x} (expected 0x{INBOUND_MARKER:02x}), \
                 decoding {length} byte frame anyway"
            );
        }

        self.buffer.advance(HEADER_SIZE);
        Some(self.buffer.split_to(length).freeze())
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns how many frames arrived with a foreign marker byte.
    #[must_use]
    pub const fn marker_mismatches(&self) -> u64 {
        self.marker_mismatches
    }
}

impl FrameCodec for StreamCodec {
    fn decode_chunk(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.feed(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn encode(&self, payload: &[u8]) -> Result<Bytes, FrameError> {
        encode(payload)
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Identity codec for BLE, where every notification is a complete frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatagramCodec;

impl FrameCodec for DatagramCodec {
    fn decode_chunk(&mut self, data: &[u8]) -> Vec<Bytes> {
        if data.is_empty() {
            return Vec::new();
        }
        vec![Bytes::copy_from_slice(data)]
    }

    fn encode(&self, payload: &[u8]) -> Result<Bytes, FrameError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(Bytes::copy_from_slice(payload))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![INBOUND_MARKER];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn sample_stream() -> (Vec<Vec<u8>>, Vec<u8>) {
        let payloads = vec![
            vec![0x09, 0x78, 0x56, 0x34, 0x12],
            vec![],
            vec![0x83],
            (0..=255u8).cycle().take(300).collect::<Vec<_>>(),
            b"\x00ok".to_vec(),
        ];
        let stream = payloads.iter().flat_map(|p| device_frame(p)).collect();
        (payloads, stream)
    }

    #[test]
    fn test_encode_simple() {
        let frame = encode(b"hello").unwrap();

        assert_eq!(frame[0], OUTBOUND_MARKER);
        assert_eq!(frame[1], 5); // length low byte
        assert_eq!(frame[2], 0); // length high byte
        assert_eq!(&frame[3..], b"hello");
    }

    #[test]
    fn test_encode_too_large() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert_eq!(
            encode(&payload),
            Err(FrameError::TooLarge {
                size: MAX_FRAME_SIZE + 1,
                max: MAX_FRAME_SIZE
            })
        );
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = StreamCodec::new();
        let frames = codec.decode_chunk(&[0x3e, 0x05, 0x00, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = StreamCodec::new();

        assert!(codec.decode_chunk(&[0x3e, 0x05, 0x00, b'h', b'e']).is_empty());
        assert_eq!(codec.buffered(), 5);

        let frames = codec.decode_chunk(b"llo");
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn test_decode_split_header() {
        let mut codec = StreamCodec::new();
        assert!(codec.decode_chunk(&[0x3e]).is_empty());
        assert!(codec.decode_chunk(&[0x02]).is_empty());
        assert!(codec.decode_chunk(&[0x00, b'o']).is_empty());
        assert_eq!(codec.decode_chunk(b"k"), vec![Bytes::from_static(b"ok")]);
    }

    #[test]
    fn test_decode_marker_mismatch_continues() {
        let mut codec = StreamCodec::new();
        let frames = codec.decode_chunk(&[
            0x3c, 0x02, 0x00, b'h', b'i', // foreign marker
            0x3e, 0x03, 0x00, b'b', b'y', b'e',
        ]);
        assert_eq!(
            frames,
            vec![Bytes::from_static(b"hi"), Bytes::from_static(b"bye")]
        );
        assert_eq!(codec.marker_mismatches(), 1);
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = StreamCodec::new();
        let frames = codec.decode_chunk(&[
            0x3e, 0x02, 0x00, b'h', b'i', // first frame
            0x3e, 0x03, 0x00, b'b', b'y', b'e', // second frame
            0x3e, 0x04, // start of a third
        ]);
        assert_eq!(
            frames,
            vec![Bytes::from_static(b"hi"), Bytes::from_static(b"bye")]
        );
        assert_eq!(codec.buffered(), 2);
    }

    #[test]
    fn test_reassembly_any_single_split() {
        let (payloads, stream) = sample_stream();

        for split in 0..=stream.len() {
            let mut codec = StreamCodec::new();
            let mut frames = codec.decode_chunk(&stream[..split]);
            frames.extend(codec.decode_chunk(&stream[split..]));

            let got: Vec<Vec<u8>> = frames.iter().map(|f| f.to_vec()).collect();
            assert_eq!(got, payloads, "split at {split}");
            assert_eq!(codec.buffered(), 0);
        }
    }

    #[test]
    fn test_reassembly_varied_chunk_sizes() {
        let (payloads, stream) = sample_stream();

        for chunk_size in [1usize, 2, 3, 4, 7, 64, 301, 1000] {
            let mut codec = StreamCodec::new();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                frames.extend(codec.decode_chunk(chunk));
            }

            let got: Vec<Vec<u8>> = frames.iter().map(|f| f.to_vec()).collect();
            assert_eq!(got, payloads, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut codec = StreamCodec::new();
        codec.decode_chunk(&[0x3e, 0x05, 0x00, b'x']);
        codec.reset();
        assert_eq!(codec.buffered(), 0);
        assert_eq!(
            codec.decode_chunk(&device_frame(b"ok")),
            vec![Bytes::from_static(b"ok")]
        );
    }

    #[test]
    fn test_datagram_codec_is_identity() {
        let mut codec = DatagramCodec;
        assert_eq!(
            codec.decode_chunk(&[0x09, 1, 2, 3, 4]),
            vec![Bytes::from_static(&[0x09, 1, 2, 3, 4])]
        );
        assert!(codec.decode_chunk(&[]).is_empty());
        assert_eq!(codec.encode(b"\x05").unwrap(), Bytes::from_static(b"\x05"));
    }
}
