//! # Arbor Sync
//!
//! Per-connection protocol engine for exchanging feed roots and object trees
//! between peers.
//!
//! ## Overview
//!
//! Every peer link becomes a [`Connection`]: an actor that reads frames from
//! the link in order, answers the peer's requests and exposes a request API
//! to the local node. Connections of one node share a [`Registry`] that
//! knows the node's feeds, the subscribers of each feed and the single
//! [`FillingOperation`] of each head.
//!
//! ## Key Properties
//!
//! - **Correlated**: every request resolves exactly once, by reply, timeout
//!   or close
//! - **Monotonic**: a root at or below the stored sequence of its head is
//!   never processed again
//! - **One fill per head**: concurrent announcements join or supersede the
//!   running operation
//! - **Isolated teardown**: closing a connection never fails a fill that
//!   other connections still assist
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- Subscribe(feed) -------->|
//!   |<------- Ok ----------------------|
//!   |<------- RootAnnounce ------------|
//!   |-------- ObjectRequest(key) ----->|
//!   |<------- ObjectResponse ----------|
//!   |          ...                     |
//!   |-------- RootDone --------------->|
//! ```

pub mod config;
pub mod conn;
pub mod correlator;
pub mod error;
pub mod feeds;
pub mod filler;
pub mod frame;
pub mod messages;
pub mod registry;
pub mod roots;
pub mod transport;

pub use config::SyncConfig;
pub use conn::Connection;
pub use correlator::{await_reply, PendingTable, SeqCounter};
pub use error::{Result, SyncError};
pub use filler::{FillStatus, FillingOperation, Offer};
pub use frame::{Frame, HEADER_LEN, MIN_FRAME_LEN};
pub use messages::{limits, tags, Message, RootAnnounce};
pub use registry::{AcceptAll, ConnId, Registry, SubscribePolicy};
pub use transport::{memory, Direction, Link, TransportKind};
