//! Length-prefixed JSON frame codec for the TCP transport.
//!
//! Layout on the wire: a u32 big-endian byte count followed by the JSON
//! encoding of one [`Frame`].  A frame that exceeds [`MAX_FRAME_BYTES`] is a
//! framing error and tears the connection down.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::message::Frame;

/// Hard ceiling on a single frame.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Codec turning a byte stream into [`Frame`]s and back.
///
/// Wraps [`LengthDelimitedCodec`] so partial reads and frame reassembly are
/// handled by the transport layer; this type only adds the JSON step.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_BYTES)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        let Some(payload) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let frame = serde_json::from_slice(&payload).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("undecodable frame: {e}"),
            )
        })?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&frame)?;
        self.inner.encode(Bytes::from(payload), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_single_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::Request {
            seqno: 42,
            method: "registry.hello".into(),
            args: vec![],
        };
        codec.encode(frame, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.seqno(), 42);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_yields_none() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::reply_ok(1, vec![]), &mut buf)
            .unwrap();

        // Feed all but the final byte.
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Completing the frame decodes it.
        partial.extend_from_slice(&buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Frame::reply_ok(1, vec![]), &mut buf).unwrap();
        codec.encode(Frame::reply_ok(2, vec![]), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().seqno(), 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().seqno(), 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn corrupt_payload_is_invalid_data() {
        let mut raw = LengthDelimitedCodec::new();
        let mut buf = BytesMut::new();
        raw.encode(Bytes::from_static(b"not json"), &mut buf).unwrap();

        let mut codec = FrameCodec::new();
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
