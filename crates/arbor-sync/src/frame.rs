//! Wire frame: `[seq u32 LE][rseq u32 LE][tagged message]`.
//!
//! `rseq` is zero for requests and notifications. A non-zero `rseq` marks the
//! frame as a response to the peer's frame with that sequence number.

use bytes::Bytes;

use crate::error::{Result, SyncError};
use crate::messages::Message;

/// Length of the sequence header.
pub const HEADER_LEN: usize = 8;

/// Smallest valid frame: header plus a tag-only message.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender's sequence number for this frame.
    pub seq: u32,
    /// Sequence number of the frame this responds to, or 0.
    pub rseq: u32,
    /// The payload.
    pub message: Message,
}

impl Frame {
    pub fn new(seq: u32, rseq: u32, message: Message) -> Self {
        Self { seq, rseq, message }
    }

    /// Whether this frame answers an earlier request.
    pub fn is_response(&self) -> bool {
        self.rseq != 0
    }

    /// Encode the frame into a single buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.rseq.to_le_bytes());
        self.message.encode_to(&mut buf);
        Bytes::from(buf)
    }

    /// Decode a frame.
    ///
    /// Fails with [`SyncError::MalformedFrame`] on short or undecodable input
    /// and [`SyncError::UnknownTag`] on an unrecognised message tag.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_FRAME_LEN {
            return Err(SyncError::MalformedFrame(format!(
                "frame of {} bytes is shorter than {MIN_FRAME_LEN}",
                raw.len()
            )));
        }

        let seq = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let rseq = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let message = Message::decode(&raw[HEADER_LEN..])?;

        Ok(Self { seq, rseq, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{FeedId, ObjectKey};
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let frame = Frame::new(0x0102_0304, 0x0A0B_0C0D, Message::Ok);
        let bytes = frame.encode();

        assert_eq!(bytes.len(), MIN_FRAME_LEN);
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_short_frame_rejected() {
        for len in 0..MIN_FRAME_LEN {
            let raw = vec![0u8; len];
            assert!(matches!(
                Frame::decode(&raw),
                Err(SyncError::MalformedFrame(_))
            ));
        }
    }

    #[test]
    fn test_response_flag() {
        assert!(!Frame::new(1, 0, Message::ListFeedsRequest).is_response());
        assert!(Frame::new(2, 1, Message::Ok).is_response());
    }

    fn feed() -> impl Strategy<Value = FeedId> {
        any::<[u8; 32]>().prop_map(FeedId::from_bytes)
    }

    fn message() -> impl Strategy<Value = Message> {
        prop_oneof![
            feed().prop_map(|feed| Message::Subscribe { feed }),
            feed().prop_map(|feed| Message::Unsubscribe { feed }),
            Just(Message::ListFeedsRequest),
            prop::collection::vec(feed(), 0..8)
                .prop_map(|feeds| Message::ListFeedsResponse { feeds }),
            Just(Message::Ok),
            ".{0,40}".prop_map(|message| Message::Error { message }),
            (feed(), any::<u64>(), any::<u64>())
                .prop_map(|(feed, nonce, seq)| Message::RootDone { feed, nonce, seq }),
            (any::<[u8; 32]>(), any::<bool>()).prop_map(|(k, prefetch)| {
                Message::ObjectRequest {
                    key: ObjectKey::from_bytes(k),
                    prefetch,
                }
            }),
            (
                prop::collection::vec(any::<u8>(), 0..64),
                prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 0..4)
            )
                .prop_map(|(value, additional)| Message::ObjectResponse {
                    value: value.into(),
                    additional: additional.into_iter().map(Into::into).collect(),
                }),
            feed().prop_map(|feed| Message::PreviewRequest { feed }),
        ]
    }

    proptest! {
        #[test]
        fn frame_decode_inverts_encode(seq in any::<u32>(), rseq in any::<u32>(), msg in message()) {
            let frame = Frame::new(seq, rseq, msg);
            prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }

        #[test]
        fn decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = Frame::decode(&raw);
        }
    }
}
