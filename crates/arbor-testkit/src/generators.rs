//! Proptest generators for property-based testing.

use proptest::prelude::*;

use arbor_core::{FeedId, HeadId, Keypair, ObjectKey, ObjectNode, Root, RootBuilder};
use arbor_sync::{Frame, Message, RootAnnounce};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random (not necessarily valid) feed identifier.
pub fn feed_id() -> impl Strategy<Value = FeedId> {
    any::<[u8; 32]>().prop_map(FeedId::from_bytes)
}

/// Generate a random ObjectKey.
pub fn object_key() -> impl Strategy<Value = ObjectKey> {
    any::<[u8; 32]>().prop_map(ObjectKey::from_bytes)
}

/// Generate a random HeadId.
pub fn head_id() -> impl Strategy<Value = HeadId> {
    (feed_id(), any::<u64>()).prop_map(|(feed, nonce)| HeadId::new(feed, nonce))
}

/// Generate a valid sequence number (1-indexed).
pub fn seq() -> impl Strategy<Value = u64> {
    1u64..=u64::MAX
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate blob bytes of at most `max_len`.
pub fn blob(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a reference-bearing object.
pub fn object_node() -> impl Strategy<Value = ObjectNode> {
    (prop::collection::vec(object_key(), 0..8), blob(64))
        .prop_map(|(refs, data)| ObjectNode::new(refs, data))
}

/// Parameters for generating a root.
#[derive(Debug, Clone)]
pub struct RootParams {
    pub keypair: Keypair,
    pub nonce: u64,
    pub seq: u64,
    pub timestamp: i64,
    pub prev: Option<ObjectKey>,
    pub refs: Vec<ObjectKey>,
}

impl Arbitrary for RootParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            keypair(),
            any::<u64>(),
            1u64..=1000u64,
            0i64..=1_700_000_000_000i64,
            prop::option::of(object_key()),
            prop::collection::vec(object_key(), 0..16),
        )
            .prop_map(|(keypair, nonce, seq, timestamp, prev, refs)| RootParams {
                keypair,
                nonce,
                seq,
                timestamp,
                // The first root of a head has no predecessor.
                prev: prev.filter(|_| seq > 1),
                refs,
            })
            .boxed()
    }
}

/// Generate a signed root from parameters.
pub fn root_from_params(params: &RootParams) -> Root {
    let head = HeadId::new(params.keypair.feed_id(), params.nonce);
    let mut builder = RootBuilder::new(head, params.seq)
        .timestamp(params.timestamp)
        .refs(params.refs.clone());

    if let Some(prev) = params.prev {
        builder = builder.prev(prev);
    }

    builder.sign(&params.keypair)
}

/// Generate any protocol message.
pub fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        feed_id().prop_map(|feed| Message::Subscribe { feed }),
        feed_id().prop_map(|feed| Message::Unsubscribe { feed }),
        Just(Message::ListFeedsRequest),
        prop::collection::vec(feed_id(), 0..8).prop_map(|feeds| Message::ListFeedsResponse { feeds }),
        Just(Message::Ok),
        "[a-z ]{0,40}".prop_map(|message| Message::Error { message }),
        any::<RootParams>().prop_map(|p| Message::RootAnnounce(RootAnnounce::from_root(&root_from_params(&p)))),
        (feed_id(), any::<u64>(), seq()).prop_map(|(feed, nonce, seq)| Message::RootDone { feed, nonce, seq }),
        (feed_id(), any::<u64>(), seq(), "[a-z ]{0,40}").prop_map(|(feed, nonce, seq, reason)| {
            Message::RootError {
                feed,
                nonce,
                seq,
                reason,
            }
        }),
        (object_key(), any::<bool>()).prop_map(|(key, prefetch)| Message::ObjectRequest { key, prefetch }),
        (blob(128), prop::collection::vec(blob(32), 0..4)).prop_map(|(value, additional)| {
            Message::ObjectResponse {
                value: value.into(),
                additional: additional.into_iter().map(Into::into).collect(),
            }
        }),
        feed_id().prop_map(|feed| Message::PreviewRequest { feed }),
    ]
}

/// Generate a frame carrying any message.
pub fn frame() -> impl Strategy<Value = Frame> {
    (any::<u32>(), any::<u32>(), message()).prop_map(|(seq, rseq, message)| Frame::new(seq, rseq, message))
}
