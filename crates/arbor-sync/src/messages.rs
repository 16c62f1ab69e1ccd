//! Sync protocol message types.
//!
//! Every message is one tag byte followed, for variants that carry fields, by
//! a CBOR array of those fields in declaration order. Variants without fields
//! are the tag byte alone.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use arbor_core::{Ed25519Signature, FeedId, HeadId, ObjectKey, Root};

use crate::error::{Result, SyncError};

/// Wire tags, one per message variant.
pub mod tags {
    pub const SUBSCRIBE: u8 = 1;
    pub const UNSUBSCRIBE: u8 = 2;
    pub const LIST_FEEDS_REQUEST: u8 = 3;
    pub const LIST_FEEDS_RESPONSE: u8 = 4;
    pub const OK: u8 = 5;
    pub const ERROR: u8 = 6;
    pub const ROOT_ANNOUNCE: u8 = 7;
    pub const ROOT_DONE: u8 = 8;
    pub const ROOT_ERROR: u8 = 9;
    pub const OBJECT_REQUEST: u8 = 10;
    pub const OBJECT_RESPONSE: u8 = 11;
    pub const PREVIEW_REQUEST: u8 = 12;
}

/// Message size limits.
pub mod limits {
    /// Max feeds in one ListFeedsResponse.
    pub const MAX_LISTED_FEEDS: usize = 4096;
    /// Max additional objects in one ObjectResponse.
    pub const MAX_ADDITIONAL_OBJECTS: usize = 256;
    /// Max length of an Error or RootError text.
    pub const MAX_ERROR_TEXT: usize = 1024;
}

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the peer to share a feed with us.
    Subscribe { feed: FeedId },

    /// Tell the peer we no longer share a feed. No reply.
    Unsubscribe { feed: FeedId },

    /// Ask a public peer for the feeds it holds.
    ListFeedsRequest,

    /// Feeds held by the responding node.
    ListFeedsResponse { feeds: Vec<FeedId> },

    /// Success without payload.
    Ok,

    /// Failure, with a human-readable reason.
    Error { message: String },

    /// A root of a shared feed (push, or the answer to a preview).
    RootAnnounce(RootAnnounce),

    /// The sender now holds the full tree of this root.
    RootDone { feed: FeedId, nonce: u64, seq: u64 },

    /// The sender gave up filling this root.
    RootError {
        feed: FeedId,
        nonce: u64,
        seq: u64,
        reason: String,
    },

    /// Ask for an object by key.
    ObjectRequest { key: ObjectKey, prefetch: bool },

    /// An object, optionally with some of its direct children.
    ObjectResponse { value: Bytes, additional: Vec<Bytes> },

    /// Ask a public peer for the latest root of a feed without subscribing.
    PreviewRequest { feed: FeedId },
}

/// A root as announced on the wire: header fields plus the signed value.
///
/// The header is redundant with the value. Receivers check that they agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootAnnounce {
    pub feed: FeedId,
    pub nonce: u64,
    pub seq: u64,
    pub signature: Ed25519Signature,
    pub value: Bytes,
}

impl RootAnnounce {
    /// Announce a root.
    pub fn from_root(root: &Root) -> Self {
        Self {
            feed: root.feed(),
            nonce: root.nonce(),
            seq: root.seq(),
            signature: *root.signature(),
            value: root.encoded().clone(),
        }
    }

    /// The announced head.
    pub fn head(&self) -> HeadId {
        HeadId::new(self.feed, self.nonce)
    }

    /// Whether a decoded root matches this announcement's header.
    pub fn matches(&self, root: &Root) -> bool {
        root.feed() == self.feed && root.nonce() == self.nonce && root.seq() == self.seq
    }
}

impl Message {
    /// The wire tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            Message::Subscribe { .. } => tags::SUBSCRIBE,
            Message::Unsubscribe { .. } => tags::UNSUBSCRIBE,
            Message::ListFeedsRequest => tags::LIST_FEEDS_REQUEST,
            Message::ListFeedsResponse { .. } => tags::LIST_FEEDS_RESPONSE,
            Message::Ok => tags::OK,
            Message::Error { .. } => tags::ERROR,
            Message::RootAnnounce(_) => tags::ROOT_ANNOUNCE,
            Message::RootDone { .. } => tags::ROOT_DONE,
            Message::RootError { .. } => tags::ROOT_ERROR,
            Message::ObjectRequest { .. } => tags::OBJECT_REQUEST,
            Message::ObjectResponse { .. } => tags::OBJECT_RESPONSE,
            Message::PreviewRequest { .. } => tags::PREVIEW_REQUEST,
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Subscribe { .. } => "Subscribe",
            Message::Unsubscribe { .. } => "Unsubscribe",
            Message::ListFeedsRequest => "ListFeedsRequest",
            Message::ListFeedsResponse { .. } => "ListFeedsResponse",
            Message::Ok => "Ok",
            Message::Error { .. } => "Error",
            Message::RootAnnounce(_) => "RootAnnounce",
            Message::RootDone { .. } => "RootDone",
            Message::RootError { .. } => "RootError",
            Message::ObjectRequest { .. } => "ObjectRequest",
            Message::ObjectResponse { .. } => "ObjectResponse",
            Message::PreviewRequest { .. } => "PreviewRequest",
        }
    }

    /// Build an Error message from any displayable error.
    pub fn error(err: impl std::fmt::Display) -> Self {
        let mut message = err.to_string();
        truncate_text(&mut message);
        Message::Error { message }
    }

    /// Append the tagged encoding of this message to `buf`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag());
        match self {
            Message::Subscribe { feed }
            | Message::Unsubscribe { feed }
            | Message::PreviewRequest { feed } => write_body(buf, &(feed,)),
            Message::ListFeedsRequest | Message::Ok => {}
            Message::ListFeedsResponse { feeds } => write_body(buf, &(feeds,)),
            Message::Error { message } => write_body(buf, &(message,)),
            Message::RootAnnounce(ra) => write_body(
                buf,
                &(ra.feed, ra.nonce, ra.seq, ra.signature, &ra.value),
            ),
            Message::RootDone { feed, nonce, seq } => write_body(buf, &(feed, nonce, seq)),
            Message::RootError {
                feed,
                nonce,
                seq,
                reason,
            } => write_body(buf, &(feed, nonce, seq, reason)),
            Message::ObjectRequest { key, prefetch } => write_body(buf, &(key, prefetch)),
            Message::ObjectResponse { value, additional } => {
                write_body(buf, &(value, additional))
            }
        }
    }

    /// Decode a tagged message. The whole input must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| SyncError::MalformedFrame("missing message tag".into()))?;

        let message = match tag {
            tags::SUBSCRIBE => {
                let (feed,) = read_body(body)?;
                Message::Subscribe { feed }
            }
            tags::UNSUBSCRIBE => {
                let (feed,) = read_body(body)?;
                Message::Unsubscribe { feed }
            }
            tags::LIST_FEEDS_REQUEST => {
                expect_empty(body)?;
                Message::ListFeedsRequest
            }
            tags::LIST_FEEDS_RESPONSE => {
                let (feeds,) = read_body(body)?;
                Message::ListFeedsResponse { feeds }
            }
            tags::OK => {
                expect_empty(body)?;
                Message::Ok
            }
            tags::ERROR => {
                let (message,) = read_body(body)?;
                Message::Error { message }
            }
            tags::ROOT_ANNOUNCE => {
                let (feed, nonce, seq, signature, value) = read_body(body)?;
                Message::RootAnnounce(RootAnnounce {
                    feed,
                    nonce,
                    seq,
                    signature,
                    value,
                })
            }
            tags::ROOT_DONE => {
                let (feed, nonce, seq) = read_body(body)?;
                Message::RootDone { feed, nonce, seq }
            }
            tags::ROOT_ERROR => {
                let (feed, nonce, seq, reason) = read_body(body)?;
                Message::RootError {
                    feed,
                    nonce,
                    seq,
                    reason,
                }
            }
            tags::OBJECT_REQUEST => {
                let (key, prefetch) = read_body(body)?;
                Message::ObjectRequest { key, prefetch }
            }
            tags::OBJECT_RESPONSE => {
                let (value, additional) = read_body(body)?;
                Message::ObjectResponse { value, additional }
            }
            tags::PREVIEW_REQUEST => {
                let (feed,) = read_body(body)?;
                Message::PreviewRequest { feed }
            }
            other => return Err(SyncError::UnknownTag(other)),
        };

        message.validate_limits()?;
        Ok(message)
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<()> {
        let violation = match self {
            Message::ListFeedsResponse { feeds } if feeds.len() > limits::MAX_LISTED_FEEDS => {
                "too many listed feeds"
            }
            Message::ObjectResponse { additional, .. }
                if additional.len() > limits::MAX_ADDITIONAL_OBJECTS =>
            {
                "too many additional objects"
            }
            Message::Error { message } if message.len() > limits::MAX_ERROR_TEXT => {
                "error text too long"
            }
            Message::RootError { reason, .. } if reason.len() > limits::MAX_ERROR_TEXT => {
                "error text too long"
            }
            _ => return Ok(()),
        };
        Err(SyncError::MalformedFrame(violation.into()))
    }
}

fn write_body<T: Serialize>(buf: &mut Vec<u8>, body: &T) {
    if let Err(e) = ciborium::into_writer(body, &mut *buf) {
        unreachable!("serializing a message into memory cannot fail: {e}");
    }
}

fn read_body<T: DeserializeOwned>(mut body: &[u8]) -> Result<T> {
    let value = ciborium::from_reader(&mut body)
        .map_err(|e| SyncError::MalformedFrame(format!("bad message body: {e}")))?;
    expect_empty(body)?;
    Ok(value)
}

fn expect_empty(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(SyncError::MalformedFrame(format!(
            "{} trailing bytes after message",
            rest.len()
        )))
    }
}

pub(crate) fn truncate_text(text: &mut String) {
    if text.len() > limits::MAX_ERROR_TEXT {
        let mut end = limits::MAX_ERROR_TEXT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Keypair, RootBuilder};

    fn encode(message: &Message) -> Vec<u8> {
        let mut buf = Vec::new();
        message.encode_to(&mut buf);
        buf
    }

    #[test]
    fn test_empty_variants_are_tag_only() {
        assert_eq!(encode(&Message::Ok), vec![tags::OK]);
        assert_eq!(encode(&Message::ListFeedsRequest), vec![tags::LIST_FEEDS_REQUEST]);
    }

    #[test]
    fn test_root_announce_roundtrip() {
        let kp = Keypair::generate();
        let root = RootBuilder::new(HeadId::new(kp.feed_id(), 3), 2)
            .prev(ObjectKey::of(b"prev"))
            .add_ref(ObjectKey::of(b"a"))
            .sign(&kp);
        let announce = RootAnnounce::from_root(&root);
        assert!(announce.matches(&root));

        let msg = Message::RootAnnounce(announce);
        let decoded = Message::decode(&encode(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            Message::decode(&[0xEE, 0x80]),
            Err(SyncError::UnknownTag(0xEE))
        ));
        assert!(matches!(Message::decode(&[0]), Err(SyncError::UnknownTag(0))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Message::Subscribe {
            feed: FeedId::from_bytes([7; 32]),
        });
        bytes.push(0x00);
        assert!(matches!(
            Message::decode(&bytes),
            Err(SyncError::MalformedFrame(_))
        ));

        assert!(matches!(
            Message::decode(&[tags::OK, 0x01]),
            Err(SyncError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_wrong_field_shape_rejected() {
        let mut bytes = vec![tags::OBJECT_REQUEST];
        ciborium::into_writer(&("not a key", true), &mut bytes).unwrap();
        assert!(matches!(
            Message::decode(&bytes),
            Err(SyncError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_error_text_truncated() {
        let msg = Message::error("x".repeat(5000));
        match &msg {
            Message::Error { message } => assert_eq!(message.len(), limits::MAX_ERROR_TEXT),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(Message::decode(&encode(&msg)).is_ok());
    }

    #[test]
    fn test_object_response_with_additional() {
        let msg = Message::ObjectResponse {
            value: Bytes::from_static(b"parent"),
            additional: vec![Bytes::from_static(b"child a"), Bytes::from_static(b"child b")],
        };
        assert_eq!(Message::decode(&encode(&msg)).unwrap(), msg);
    }
}
