//! JSON message codec for the control leg.
//!
//! The transport delivers whole messages, so [`encode_message`] and
//! [`decode_message`] work on complete byte buffers. [`ControlCodec`] adds
//! length-delimited framing for byte-stream transports and tests.
//!
//! Decoding never fails the session: every problem surfaces as a
//! [`ProtocolViolation`] that the caller logs and drops.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::{PeerdeskError, ProtocolViolation};
use crate::protocol::{MESSAGE_TYPES, Message};

/// Largest framed message accepted by [`ControlCodec`] (4 MiB).
///
/// A 16 KiB chunk expands to roughly 64 KiB as a JSON number array, so
/// this leaves headroom for larger configured chunk sizes.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Serialize a message to its JSON wire form.
pub fn encode_message(message: &Message) -> Result<Bytes, PeerdeskError> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Parse a JSON wire message.
///
/// Bytes that are not a JSON object with a string `type` field are
/// [`ProtocolViolation::Malformed`]. A discriminator outside
/// [`MESSAGE_TYPES`] is [`ProtocolViolation::UnknownType`], so newer peers
/// can add message kinds without tripping older ones.
pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolViolation> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ProtocolViolation::Malformed("missing string `type` field".into()))?;

    if !MESSAGE_TYPES.contains(&kind) {
        return Err(ProtocolViolation::UnknownType(kind.to_owned()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolViolation::Malformed(e.to_string()))
}

// ── ControlCodec ─────────────────────────────────────────────────

/// Length-delimited JSON framing.
///
/// Frame errors (oversized length prefix, I/O) are fatal and returned as
/// `Err`. A well-framed but unreadable message is yielded as
/// `Some(Err(violation))` so the stream keeps going.
#[derive(Debug)]
pub struct ControlCodec {
    frames: LengthDelimitedCodec,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_SIZE)
                .new_codec(),
        }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = Result<Message, ProtocolViolation>;
    type Error = PeerdeskError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(decode_message(&frame))),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for ControlCodec {
    type Error = PeerdeskError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_message(&item)?;
        self.frames.encode(payload, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InputEvent, TransferId};
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn unknown_type_is_reported_not_parsed() {
        let err = decode_message(br#"{"type":"cursor-shape","payload":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolViolation::UnknownType("cursor-shape".into()));
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = decode_message(br#"{"name":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed(_)));
    }

    #[test]
    fn known_type_with_bad_fields_is_malformed() {
        let err = decode_message(br#"{"type":"file-meta","name":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed(_)));
    }

    #[test]
    fn not_json_is_malformed() {
        let err = decode_message(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed(_)));
    }

    #[test]
    fn decodes_untagged_chunk() {
        let msg = decode_message(br#"{"type":"file-chunk","data":[104,105]}"#).unwrap();
        assert_eq!(
            msg,
            Message::FileChunk {
                transfer_id: None,
                sequence: None,
                data: b"hi".to_vec()
            }
        );
    }

    #[test]
    fn codec_keeps_going_after_bad_frame() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::input(InputEvent::KeyPress { key: "a".into() }), &mut buf)
            .unwrap();

        // A well-framed frame with an unknown type between two good ones.
        let mut raw = LengthDelimitedCodec::new();
        raw.encode(Bytes::from_static(br#"{"type":"mystery"}"#), &mut buf)
            .unwrap();

        codec
            .encode(
                Message::FileEnd {
                    transfer_id: Some(TransferId::new("t1")),
                },
                &mut buf,
            )
            .unwrap();

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::InputEvent { .. }))
        ));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(ProtocolViolation::UnknownType(_)))
        ));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::FileEnd { .. }))
        ));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn framed_read_over_bytes() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        for i in 0..3 {
            codec
                .encode(Message::input(InputEvent::MouseMove { x: i, y: i }), &mut buf)
                .unwrap();
        }

        let reader = std::io::Cursor::new(buf.freeze().to_vec());
        let messages: Vec<_> = FramedRead::new(reader, ControlCodec::new())
            .map(|r| r.unwrap().unwrap())
            .collect()
            .await;

        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[2],
            Message::input(InputEvent::MouseMove { x: 2, y: 2 })
        );
    }
}
