//! Object filler: resolves an incomplete root into a complete object tree.
//!
//! One [`FillingOperation`] exists per head. It tracks the keys still
//! missing, hands object requests round-robin to the connections assisting
//! it and finishes either done (root saved, assistants told with RootDone)
//! or failed (assistants told with RootError).
//!
//! All state of an operation sits behind one async lock. Requests are
//! computed under the lock and sent by spawned tasks after it is released.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use arbor_core::{HeadId, ObjectKey, ObjectNode, Root};
use arbor_store::ObjectStore;

use crate::config::SyncConfig;
use crate::conn::{reply_error, Connection};
use crate::error::{Result, SyncError};
use crate::messages::{limits, truncate_text, Message, RootAnnounce};
use crate::registry::{ConnId, Registry};

/// Completion state of a filling operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillStatus {
    InProgress,
    Done,
    Failed(String),
}

impl FillStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, FillStatus::InProgress)
    }
}

/// What an offered root did to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// A new operation started on the offered root.
    Started,
    /// The operation now targets the offered root.
    Superseded,
    /// Same root; the offering connection assists.
    Joined,
    /// Older root.
    Ignored,
    /// The operation finished before the offer arrived.
    Finished,
}

/// The filling of one head.
pub struct FillingOperation {
    head: HeadId,
    store: Arc<dyn ObjectStore>,
    registry: Arc<Registry>,
    config: SyncConfig,
    state: Mutex<FillState>,
    status: watch::Sender<FillStatus>,
}

struct FillState {
    root: Root,
    /// Missing set has been computed for `root`.
    ready: bool,
    missing: BTreeSet<ObjectKey>,
    in_flight: HashMap<ObjectKey, ConnId>,
    attempts: HashMap<ObjectKey, u32>,
    assistants: Vec<Connection>,
    cursor: usize,
    finished: bool,
}

/// Work decided under the lock, carried out after it is released.
#[derive(Default)]
struct Followup {
    requests: Vec<(ObjectKey, Connection)>,
    stored: Vec<(ObjectKey, Bytes)>,
    outcome: Option<Outcome>,
}

enum Outcome {
    Done {
        root: Root,
        assistants: Vec<Connection>,
    },
    Failed {
        root: Root,
        assistants: Vec<Connection>,
        reason: String,
    },
}

impl FillingOperation {
    pub(crate) fn new(
        root: Root,
        store: Arc<dyn ObjectStore>,
        registry: Arc<Registry>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(FillStatus::InProgress);
        Arc::new(Self {
            head: root.head(),
            store,
            registry,
            config,
            state: Mutex::new(FillState {
                root,
                ready: false,
                missing: BTreeSet::new(),
                in_flight: HashMap::new(),
                attempts: HashMap::new(),
                assistants: Vec::new(),
                cursor: 0,
                finished: false,
            }),
            status,
        })
    }

    pub fn head(&self) -> HeadId {
        self.head
    }

    /// Current completion state.
    pub fn status(&self) -> FillStatus {
        self.status.borrow().clone()
    }

    /// Wait until the operation is done or failed.
    pub async fn finished(&self) -> FillStatus {
        let mut rx = self.status.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_finished() || rx.changed().await.is_err() {
                return current;
            }
        }
    }

    /// Sequence number of the root being filled.
    pub async fn target_seq(&self) -> u64 {
        self.state.lock().await.root.seq()
    }

    /// Keys still missing.
    pub async fn missing(&self) -> BTreeSet<ObjectKey> {
        self.state.lock().await.missing.clone()
    }

    /// Ids of the assisting connections.
    pub async fn assistants(&self) -> Vec<ConnId> {
        self.state
            .lock()
            .await
            .assistants
            .iter()
            .map(|c| c.id())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Offer a root announced by `conn`.
    ///
    /// A newer root supersedes the target, the same root adds `conn` as an
    /// assistant, an older root is ignored.
    pub(crate) async fn offer(self: &Arc<Self>, root: Root, conn: &Connection) -> Result<Offer> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Ok(Offer::Finished);
        }

        let offer = if root.seq() > state.root.seq() {
            debug!(head = %self.head, from = state.root.seq(), to = root.seq(), "superseding fill target");
            state.root = root;
            state.ready = false;
            state.attempts.clear();
            Offer::Superseded
        } else if root.seq() == state.root.seq() {
            if state.ready || !state.assistants.is_empty() {
                Offer::Joined
            } else {
                Offer::Started
            }
        } else {
            return Ok(Offer::Ignored);
        };

        self.add_assistant(&mut state, conn);

        let mut followup = Followup::default();
        if state.assistants.is_empty() {
            // `conn` went away before it could attach and nobody else helps.
            followup.outcome = Some(self.fail(&mut state, "no assisting connection".into()));
            drop(state);
            self.carry_out(followup).await;
            return Ok(offer);
        }

        if !state.ready {
            let computed = self.store.missing_references(&state.root).await;
            match computed {
                Ok(missing) => {
                    state.in_flight.retain(|key, _| missing.contains(key));
                    state.missing = missing;
                    state.ready = true;
                }
                Err(e) => {
                    followup.outcome = Some(self.fail(&mut state, format!("store: {e}")));
                    drop(state);
                    self.carry_out(followup).await;
                    return Err(e.into());
                }
            }
        }

        self.advance(&mut state, &mut followup);
        drop(state);
        self.carry_out(followup).await;
        Ok(offer)
    }

    /// `conn` reported it holds the full tree of `seq`.
    pub(crate) async fn peer_done(self: &Arc<Self>, seq: u64, conn: &Connection) -> bool {
        let mut state = self.state.lock().await;
        if state.finished || state.root.seq() != seq {
            return false;
        }
        self.add_assistant(&mut state, conn);

        let mut followup = Followup::default();
        if state.ready {
            self.advance(&mut state, &mut followup);
        }
        drop(state);
        self.carry_out(followup).await;
        true
    }

    /// An object pushed by `conn` without a request.
    ///
    /// Accepted only if `conn` assists this operation and the key is missing.
    pub(crate) async fn accept_push(self: &Arc<Self>, conn: ConnId, key: ObjectKey, value: Bytes) -> bool {
        let mut state = self.state.lock().await;
        if state.finished
            || !state.missing.contains(&key)
            || !state.assistants.iter().any(|c| c.id() == conn)
        {
            return false;
        }

        state.in_flight.remove(&key);
        let mut followup = Followup::default();
        if let Err(e) = self.ingest(&mut state, key, value, &mut followup).await {
            followup.outcome = Some(self.fail(&mut state, format!("store: {e}")));
        } else {
            self.advance(&mut state, &mut followup);
        }
        drop(state);
        self.carry_out(followup).await;
        true
    }

    /// `conn` stopped assisting (unsubscribe or close).
    ///
    /// Losing the last assistant fails the operation.
    pub(crate) async fn detach(self: &Arc<Self>, conn: ConnId) {
        let mut state = self.state.lock().await;
        let before = state.assistants.len();
        state.assistants.retain(|c| c.id() != conn);
        if state.finished || state.assistants.len() == before {
            return;
        }

        state.in_flight.retain(|_, assigned| *assigned != conn);

        let mut followup = Followup::default();
        if state.assistants.is_empty() {
            followup.outcome = Some(self.fail(&mut state, "all assisting connections detached".into()));
        } else {
            self.advance(&mut state, &mut followup);
        }
        drop(state);
        self.carry_out(followup).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request results
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_reply(self: &Arc<Self>, key: ObjectKey, conn: ConnId, reply: Result<Message>) {
        let mut state = self.state.lock().await;
        if state.finished {
            return;
        }
        if state.in_flight.get(&key) == Some(&conn) {
            state.in_flight.remove(&key);
        }
        if !state.missing.contains(&key) {
            return;
        }

        let mut followup = Followup::default();
        let failure = match reply {
            Ok(Message::ObjectResponse { value, additional }) if key.matches(&value) => {
                let children: BTreeSet<ObjectKey> = ObjectNode::refs_of(&value).into_iter().collect();
                let mut stored = self.ingest(&mut state, key, value, &mut followup).await;

                for extra in additional.into_iter().take(self.config.max_prefetch) {
                    if stored.is_err() {
                        break;
                    }
                    let extra_key = ObjectKey::of(&extra);
                    if children.contains(&extra_key) && state.missing.contains(&extra_key) {
                        state.in_flight.remove(&extra_key);
                        stored = self.ingest(&mut state, extra_key, extra, &mut followup).await;
                    }
                }

                match stored {
                    Ok(()) => None,
                    Err(e) => {
                        followup.outcome = Some(self.fail(&mut state, format!("store: {e}")));
                        drop(state);
                        self.carry_out(followup).await;
                        return;
                    }
                }
            }
            Ok(Message::ObjectResponse { .. }) => Some(("object does not match its key".to_string(), true)),
            Ok(Message::Error { message }) => Some((format!("peer error: {message}"), true)),
            Ok(other) => Some((format!("unexpected {}", other.kind()), true)),
            Err(e) => {
                let counted = !matches!(e, SyncError::Closed);
                Some((e.to_string(), counted))
            }
        };

        if let Some((reason, counted)) = failure {
            if !counted {
                // The assistant closed; it will detach on its own.
                if let Some(n) = state.attempts.get_mut(&key) {
                    *n = n.saturating_sub(1);
                }
            }
            let attempts = state.attempts.get(&key).copied().unwrap_or(0);
            debug!(head = %self.head, %key, conn = %conn, attempts, %reason, "object request failed");
            if attempts >= self.config.fill_attempts {
                followup.outcome = Some(self.fail(
                    &mut state,
                    format!("object {key} failed after {attempts} attempts: {reason}"),
                ));
                drop(state);
                self.carry_out(followup).await;
                return;
            }
        }

        self.advance(&mut state, &mut followup);
        drop(state);
        self.carry_out(followup).await;
    }

    /// Store a received object and add its own missing descendants.
    async fn ingest(
        &self,
        state: &mut FillState,
        key: ObjectKey,
        value: Bytes,
        followup: &mut Followup,
    ) -> std::result::Result<(), arbor_store::StoreError> {
        if !state.missing.remove(&key) {
            return Ok(());
        }
        self.store.put(&key, value.clone()).await?;
        let below = self.store.missing_below(&ObjectNode::refs_of(&value)).await?;
        state.missing.extend(below);
        if self.registry.is_wanted(&key) {
            followup.stored.push((key, value));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State transitions (lock held)
    // ─────────────────────────────────────────────────────────────────────────

    fn add_assistant(self: &Arc<Self>, state: &mut FillState, conn: &Connection) {
        if state.assistants.iter().any(|c| c.id() == conn.id()) {
            return;
        }
        if conn.attach_fill(self.head, Arc::clone(self)) {
            debug!(head = %self.head, conn = %conn.id(), "connection assists fill");
            state.assistants.push(conn.clone());
        }
    }

    /// Finish if nothing is missing, otherwise hand out more requests.
    fn advance(&self, state: &mut FillState, followup: &mut Followup) {
        if !state.ready {
            return;
        }
        if state.missing.is_empty() {
            followup.outcome = Some(self.complete(state));
            return;
        }
        let live: Vec<Connection> = state
            .assistants
            .iter()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect();
        if live.is_empty() {
            return;
        }

        let budget = self.config.max_in_flight.saturating_sub(state.in_flight.len());
        let idle: Vec<ObjectKey> = state
            .missing
            .iter()
            .filter(|key| !state.in_flight.contains_key(key))
            .take(budget)
            .copied()
            .collect();

        for key in idle {
            let conn = live[state.cursor % live.len()].clone();
            state.cursor = state.cursor.wrapping_add(1);
            state.in_flight.insert(key, conn.id());
            *state.attempts.entry(key).or_insert(0) += 1;
            followup.requests.push((key, conn));
        }
    }

    fn complete(&self, state: &mut FillState) -> Outcome {
        state.finished = true;
        state.in_flight.clear();
        Outcome::Done {
            root: state.root.clone(),
            assistants: std::mem::take(&mut state.assistants),
        }
    }

    fn fail(&self, state: &mut FillState, reason: String) -> Outcome {
        state.finished = true;
        state.in_flight.clear();
        Outcome::Failed {
            root: state.root.clone(),
            assistants: std::mem::take(&mut state.assistants),
            reason,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Side effects (lock released)
    // ─────────────────────────────────────────────────────────────────────────

    async fn carry_out(self: &Arc<Self>, followup: Followup) {
        for (key, conn) in followup.requests {
            self.spawn_request(key, conn);
        }

        for (key, bytes) in &followup.stored {
            self.registry.object_arrived(key, bytes).await;
        }

        match followup.outcome {
            Some(Outcome::Done { root, assistants }) => self.finish_done(root, assistants).await,
            Some(Outcome::Failed {
                root,
                assistants,
                reason,
            }) => self.finish_failed(root, assistants, reason).await,
            None => {}
        }
    }

    fn spawn_request(self: &Arc<Self>, key: ObjectKey, conn: Connection) {
        let op = Arc::clone(self);
        tokio::spawn(async move {
            let reply = conn
                .request(
                    Message::ObjectRequest {
                        key,
                        prefetch: op.config.prefetch,
                    },
                    Some(op.config.object_timeout),
                )
                .await;
            op.on_reply(key, conn.id(), reply).await;
        });
    }

    async fn finish_done(self: &Arc<Self>, root: Root, assistants: Vec<Connection>) {
        if let Err(e) = self.store.save_root(&root).await {
            self.finish_failed(root, assistants, format!("saving root: {e}")).await;
            return;
        }

        self.registry.remove_fill(&self.head, self);
        self.status.send_replace(FillStatus::Done);
        info!(root = %root.short(), "root filled");

        let done = Message::RootDone {
            feed: root.feed(),
            nonce: root.nonce(),
            seq: root.seq(),
        };
        for conn in &assistants {
            conn.detach_fill(&self.head);
            if let Err(e) = conn.notify(done.clone()).await {
                debug!(conn = %conn.id(), error = %e, "RootDone not delivered");
            }
        }

        // Pass the root on to subscribers that did not help fill it.
        let announce = Message::RootAnnounce(RootAnnounce::from_root(&root));
        for conn in self.registry.subscribers_of(&root.feed()) {
            if assistants.iter().any(|a| a.id() == conn.id()) {
                continue;
            }
            if let Err(e) = conn.notify(announce.clone()).await {
                debug!(conn = %conn.id(), error = %e, "announce not delivered");
            }
        }
    }

    async fn finish_failed(self: &Arc<Self>, root: Root, assistants: Vec<Connection>, reason: String) {
        self.registry.remove_fill(&self.head, self);
        self.status.send_replace(FillStatus::Failed(reason.clone()));
        warn!(root = %root.short(), %reason, "root fill failed");

        let mut reason = reason;
        truncate_text(&mut reason);
        let error = Message::RootError {
            feed: root.feed(),
            nonce: root.nonce(),
            seq: root.seq(),
            reason,
        };
        for conn in &assistants {
            conn.detach_fill(&self.head);
            if conn.is_closed() {
                continue;
            }
            if let Err(e) = conn.notify(error.clone()).await {
                debug!(conn = %conn.id(), error = %e, "RootError not delivered");
            }
        }
    }
}

impl std::fmt::Debug for FillingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillingOperation")
            .field("head", &self.head)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

/// Fill `root` with help from `conn`: join the head's running operation or
/// start one.
pub(crate) async fn fill(conn: &Connection, root: Root) -> Result<Offer> {
    let registry = conn.registry();
    loop {
        let op = registry.fill_or_insert(root.head(), || {
            FillingOperation::new(
                root.clone(),
                Arc::clone(conn.store()),
                Arc::clone(registry),
                conn.config().clone(),
            )
        });
        match op.offer(root.clone(), conn).await? {
            // Finished but not yet unregistered: replace it.
            Offer::Finished => registry.remove_fill(&root.head(), &op),
            offer => return Ok(offer),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serving side
// ─────────────────────────────────────────────────────────────────────────────

impl Connection {
    /// Fetch one object from the peer, with its direct children if
    /// `prefetch` is set and the peer has them.
    ///
    /// Nothing is stored. A peer that lacks the object stays silent, so this
    /// resolves [`SyncError::Timeout`] after the
    /// configured response timeout.
    pub async fn fetch_object(&self, key: ObjectKey, prefetch: bool) -> Result<(Bytes, Vec<Bytes>)> {
        match self.call(Message::ObjectRequest { key, prefetch }).await? {
            Message::ObjectResponse { value, additional } if key.matches(&value) => {
                Ok((value, additional))
            }
            Message::ObjectResponse { .. } => Err(SyncError::UnexpectedResponse(format!(
                "object does not match key {key}"
            ))),
            other => Err(reply_error(other)),
        }
    }

    /// Answer an object request, or remember the want if we lack the object.
    pub(crate) async fn handle_object_request(&self, seq: u32, key: ObjectKey, prefetch: bool) -> Result<()> {
        let Some(value) = self.store().get(&key).await? else {
            debug!(conn = %self.id(), %key, "object not held, deferring");
            self.registry().add_want(key, self.id());
            return Ok(());
        };

        let mut additional = Vec::new();
        if prefetch {
            let limit = self.config().max_prefetch.min(limits::MAX_ADDITIONAL_OBJECTS);
            let mut seen = BTreeSet::new();
            for child in ObjectNode::refs_of(&value) {
                if additional.len() >= limit {
                    break;
                }
                if !seen.insert(child) {
                    continue;
                }
                if let Some(bytes) = self.store().get(&child).await? {
                    additional.push(bytes);
                }
            }
        }

        self.respond(seq, Message::ObjectResponse { value, additional })
            .await
    }

    /// An unrequested ObjectResponse: a deferred push for a fill we assist.
    pub(crate) async fn handle_object_push(&self, value: Bytes) -> Result<()> {
        let key = ObjectKey::of(&value);
        let mut accepted = false;
        for op in self.assisted_fills() {
            accepted |= op.accept_push(self.id(), key, value.clone()).await;
        }
        if !accepted {
            debug!(conn = %self.id(), %key, "dropping unrequested object");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{memory, Direction};
    use arbor_core::{Keypair, RootBuilder};
    use arbor_store::MemoryStore;

    #[tokio::test]
    async fn test_fill_without_any_assistant_fails() {
        let registry = Arc::new(Registry::new(true, None));
        let (link, _peer) = memory::pipe(4);
        let conn = Connection::spawn(
            link,
            Direction::Outgoing,
            Arc::clone(&registry),
            Arc::new(MemoryStore::new()),
            SyncConfig::default(),
        );
        conn.close().await;

        let keypair = Keypair::from_seed(&[5; 32]);
        let root = RootBuilder::new(HeadId::new(keypair.feed_id(), 1), 1)
            .add_ref(ObjectKey::of(b"absent"))
            .sign(&keypair);
        let op = registry.fill_or_insert(root.head(), || {
            FillingOperation::new(
                root.clone(),
                Arc::clone(conn.store()),
                Arc::clone(&registry),
                SyncConfig::default(),
            )
        });

        assert_eq!(fill(&conn, root).await.unwrap(), Offer::Started);
        assert!(matches!(op.status(), FillStatus::Failed(_)));
        assert!(op.assistants().await.is_empty());
        assert_eq!(registry.fill_count(), 0);
    }
}
