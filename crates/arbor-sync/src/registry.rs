//! Node registry: state shared by every connection of one node.
//!
//! A single [`Registry`] is created per node, held in an `Arc` and injected
//! into each connection. It knows which feeds the node shares, which
//! connections are subscribed to each feed, the filling operation of each
//! head, and which connections are waiting for objects the node lacks.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;

use arbor_core::{FeedId, HeadId, ObjectKey};

use crate::conn::Connection;
use crate::error::{Result, SyncError};
use crate::filler::FillingOperation;

/// Process-unique connection identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decides whether a peer may subscribe to a feed.
///
/// Consulted on every inbound Subscribe before the feed-sharing check.
pub trait SubscribePolicy: Send + Sync {
    /// `Err(reason)` refuses the subscription; the reason is sent to the peer.
    fn accept(&self, conn: ConnId, feed: &FeedId) -> std::result::Result<(), String>;
}

/// Accept every subscription to a shared feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl SubscribePolicy for AcceptAll {
    fn accept(&self, _conn: ConnId, _feed: &FeedId) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl<F> SubscribePolicy for F
where
    F: Fn(ConnId, &FeedId) -> std::result::Result<(), String> + Send + Sync,
{
    fn accept(&self, conn: ConnId, feed: &FeedId) -> std::result::Result<(), String> {
        self(conn, feed)
    }
}

/// Shared per-node state.
pub struct Registry {
    public: bool,
    max_feeds: Option<usize>,
    policy: Box<dyn SubscribePolicy>,
    next_conn: AtomicU64,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// Feeds this node holds.
    feeds: BTreeSet<FeedId>,

    /// Live connections.
    connections: HashMap<ConnId, Connection>,

    /// Feed -> connections subscribed to it.
    subscribers: HashMap<FeedId, BTreeSet<ConnId>>,

    /// Head -> its single filling operation.
    fills: HashMap<HeadId, Arc<FillingOperation>>,

    /// Object -> connections that asked for it while we lacked it.
    wants: HashMap<ObjectKey, HashSet<ConnId>>,
}

impl Registry {
    /// Create a registry.
    ///
    /// A public node answers feed-list and preview requests. `max_feeds`
    /// bounds how many feeds [`share`](Self::share) accepts.
    pub fn new(public: bool, max_feeds: Option<usize>) -> Self {
        Self {
            public,
            max_feeds,
            policy: Box::new(AcceptAll),
            next_conn: AtomicU64::new(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Replace the subscribe policy.
    pub fn with_policy(mut self, policy: impl SubscribePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this node advertises its feeds.
    pub fn is_public(&self) -> bool {
        self.public
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feeds
    // ─────────────────────────────────────────────────────────────────────────

    /// Start holding a feed. Returns false if it was already held.
    pub fn share(&self, feed: FeedId) -> Result<bool> {
        if feed.is_blank() {
            return Err(SyncError::BlankFeed);
        }

        let mut state = self.lock();
        if state.feeds.contains(&feed) {
            return Ok(false);
        }
        if let Some(max) = self.max_feeds {
            if state.feeds.len() >= max {
                return Err(SyncError::Rejected(format!("feed limit of {max} reached")));
            }
        }
        state.feeds.insert(feed);
        debug!(%feed, "sharing feed");
        Ok(true)
    }

    /// Whether this node holds `feed`.
    pub fn shares_feed(&self, feed: &FeedId) -> bool {
        self.lock().feeds.contains(feed)
    }

    /// Every feed this node holds, in order.
    pub fn list_feeds(&self) -> Vec<FeedId> {
        self.lock().feeds.iter().copied().collect()
    }

    /// Run the subscribe policy for an inbound subscription.
    pub fn accept_subscriber(&self, conn: ConnId, feed: &FeedId) -> Result<()> {
        self.policy.accept(conn, feed).map_err(SyncError::Rejected)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_connection(&self, conn: Connection) {
        self.lock().connections.insert(conn.id(), conn);
    }

    /// Forget a closed connection, its subscriptions and its wants.
    pub(crate) fn remove_connection(&self, id: ConnId) {
        let mut state = self.lock();
        state.connections.remove(&id);
        for subs in state.subscribers.values_mut() {
            subs.remove(&id);
        }
        state.subscribers.retain(|_, subs| !subs.is_empty());
        for wanting in state.wants.values_mut() {
            wanting.remove(&id);
        }
        state.wants.retain(|_, wanting| !wanting.is_empty());
    }

    /// All live connections, ordered by id.
    pub fn connections(&self) -> Vec<Connection> {
        let mut conns: Vec<Connection> = self.lock().connections.values().cloned().collect();
        conns.sort_by_key(|c| c.id());
        conns
    }

    /// Look up a live connection.
    pub fn connection(&self, id: ConnId) -> Option<Connection> {
        self.lock().connections.get(&id).cloned()
    }

    pub(crate) fn add_subscriber(&self, feed: FeedId, id: ConnId) {
        self.lock().subscribers.entry(feed).or_default().insert(id);
    }

    pub(crate) fn remove_subscriber(&self, feed: &FeedId, id: ConnId) {
        let mut state = self.lock();
        if let Some(subs) = state.subscribers.get_mut(feed) {
            subs.remove(&id);
            if subs.is_empty() {
                state.subscribers.remove(feed);
            }
        }
    }

    /// Connections subscribed to `feed`.
    pub fn subscribers_of(&self, feed: &FeedId) -> Vec<Connection> {
        let state = self.lock();
        state
            .subscribers
            .get(feed)
            .into_iter()
            .flatten()
            .filter_map(|id| state.connections.get(id).cloned())
            .collect()
    }

    /// Call `f` for every connection subscribed to `feed`.
    ///
    /// The registry lock is released before `f` runs.
    pub fn for_each_connection_of(&self, feed: &FeedId, mut f: impl FnMut(&Connection)) {
        for conn in self.subscribers_of(feed) {
            f(&conn);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Filling operations
    // ─────────────────────────────────────────────────────────────────────────

    /// The filling operation of `head`, if one is running.
    pub fn fill_for(&self, head: &HeadId) -> Option<Arc<FillingOperation>> {
        self.lock().fills.get(head).cloned()
    }

    /// The running operation of `head`, or a new one built by `make`.
    pub(crate) fn fill_or_insert(
        &self,
        head: HeadId,
        make: impl FnOnce() -> Arc<FillingOperation>,
    ) -> Arc<FillingOperation> {
        self.lock().fills.entry(head).or_insert_with(make).clone()
    }

    /// Unregister `op` if it is still the operation of `head`.
    pub(crate) fn remove_fill(&self, head: &HeadId, op: &Arc<FillingOperation>) {
        let mut state = self.lock();
        if state.fills.get(head).is_some_and(|current| Arc::ptr_eq(current, op)) {
            state.fills.remove(head);
        }
    }

    /// Number of running filling operations.
    pub fn fill_count(&self) -> usize {
        self.lock().fills.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deferred push
    // ─────────────────────────────────────────────────────────────────────────

    /// Remember that `conn` asked for an object we lack.
    pub(crate) fn add_want(&self, key: ObjectKey, conn: ConnId) {
        self.lock().wants.entry(key).or_default().insert(conn);
    }

    /// Whether anyone is waiting for `key`.
    pub fn is_wanted(&self, key: &ObjectKey) -> bool {
        self.lock().wants.contains_key(key)
    }

    /// A new object was stored locally: push it to every connection that
    /// asked for it.
    pub async fn object_arrived(&self, key: &ObjectKey, bytes: &Bytes) {
        let wanting: Vec<Connection> = {
            let mut state = self.lock();
            let Some(ids) = state.wants.remove(key) else {
                return;
            };
            ids.iter()
                .filter_map(|id| state.connections.get(id).cloned())
                .collect()
        };

        for conn in wanting {
            debug!(conn = %conn.id(), %key, "pushing wanted object");
            if let Err(e) = conn.push_object(bytes.clone()).await {
                debug!(conn = %conn.id(), %key, error = %e, "push failed");
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Registry")
            .field("public", &self.public)
            .field("feeds", &state.feeds.len())
            .field("connections", &state.connections.len())
            .field("fills", &state.fills.len())
            .finish_non_exhaustive()
    }
}
