//! Tokio codec for length-prefixed JSON envelopes

use std::marker::PhantomData;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::{decode_envelope, encode_envelope, Envelope};

/// Codec for one envelope family.
///
/// A coordinator reads `EnvelopeCodec<InboundMessage>` and writes
/// `EnvelopeCodec<OutboundMessage>`; agents use the opposite pairing.
#[derive(Debug)]
pub struct EnvelopeCodec<T> {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EnvelopeCodec<T> {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for EnvelopeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Envelope> Decoder for EnvelopeCodec<T> {
    type Item = T;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            // Wait for the rest of the payload
            self.pending_header = Some(header);
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        decode_envelope(&payload).map(Some)
    }
}

impl<T: Envelope> Encoder<T> for EnvelopeCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, message: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_envelope(&message)?;
        let payload_len = payload.len();

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        FrameHeader::new(payload_len as u32).encode(dst);
        dst.extend_from_slice(&payload);

        tracing::trace!(message_type = message.message_type(), payload_len, "encoded envelope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HEADER_SIZE;
    use crate::message::{InboundMessage, OutboundMessage, RelayRequest, SitePeer};

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = EnvelopeCodec::<OutboundMessage>::new();

        let msg = OutboundMessage::SitePeerAdd(SitePeer {
            public_key: "client-key".to_string(),
            allowed_ips: vec!["100.90.128.2/32".to_string()],
            endpoint: "203.0.113.5:51820".to_string(),
        });

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = EnvelopeCodec::<InboundMessage>::new();

        let mut full_buf = BytesMut::new();
        codec
            .encode(InboundMessage::Relay(RelayRequest { site_id: 3 }), &mut full_buf)
            .unwrap();

        // Header only partially present
        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header present, payload still short
        partial.extend_from_slice(&full_buf.split_to(3));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, InboundMessage::Relay(RelayRequest { site_id: 3 }));
    }

    #[test]
    fn test_codec_rejects_unknown_type() {
        let mut codec = EnvelopeCodec::<InboundMessage>::new();

        let payload = br#"{"type":"newt/ping","data":{}}"#;
        let mut buf = BytesMut::new();
        FrameHeader::new(payload.len() as u32).encode(&mut buf);
        buf.extend_from_slice(payload);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(_)));
    }
}
