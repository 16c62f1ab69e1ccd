//! Connection actor: one per peer link.
//!
//! A [`Connection`] owns the receive loop of its link and the request API
//! local callers use. Inbound frames are handled strictly in arrival order
//! by a single task. Responses go to the pending table; everything else is
//! dispatched by message variant to the feed, root and object handlers.
//!
//! Lock rules: the connection lock guards only the pending table, the feed
//! map and the outbound sender, and is never held across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use arbor_core::{FeedId, HeadId};
use arbor_store::ObjectStore;

use crate::config::SyncConfig;
use crate::correlator::{await_reply, PendingTable, SeqCounter};
use crate::error::{Result, SyncError};
use crate::feeds::FeedState;
use crate::frame::Frame;
use crate::messages::Message;
use crate::registry::{ConnId, Registry};
use crate::transport::{Direction, Link, TransportKind};

/// Handle to a live (or closed) connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    id: ConnId,
    direction: Direction,
    kind: TransportKind,
    seq: SeqCounter,
    tables: Mutex<ConnTables>,
    closed: watch::Sender<bool>,
    registry: Arc<Registry>,
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
}

/// Per-connection maps guarded by the connection lock.
pub(crate) struct ConnTables {
    pub(crate) pending: PendingTable,
    pub(crate) feeds: HashMap<FeedId, FeedState>,
    outbound: Option<mpsc::Sender<Bytes>>,
}

impl Connection {
    /// Register a new connection with the node and start its receive loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        link: Link,
        direction: Direction,
        registry: Arc<Registry>,
        store: Arc<dyn ObjectStore>,
        config: SyncConfig,
    ) -> Connection {
        let Link {
            inbound,
            outbound,
            kind,
        } = link;
        let (closed, _) = watch::channel(false);

        let conn = Connection {
            inner: Arc::new(ConnInner {
                id: registry.next_conn_id(),
                direction,
                kind,
                seq: SeqCounter::new(),
                tables: Mutex::new(ConnTables {
                    pending: PendingTable::new(),
                    feeds: HashMap::new(),
                    outbound: Some(outbound),
                }),
                closed,
                registry,
                store,
                config,
            }),
        };

        conn.registry().add_connection(conn.clone());
        debug!(conn = %conn.id(), ?direction, %kind, "connection opened");

        let actor = conn.clone();
        tokio::spawn(async move { actor.run(inbound).await });
        conn
    }

    pub fn id(&self) -> ConnId {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub(crate) fn tables(&self) -> MutexGuard<'_, ConnTables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.tables().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        wait_closed(&mut rx).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue one frame, or fail with Closed once the connection closes.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let outbound = self.tables().outbound.clone().ok_or(SyncError::Closed)?;
        let bytes = frame.encode();
        let mut closed = self.inner.closed.subscribe();

        tokio::select! {
            sent = outbound.send(bytes) => sent.map_err(|_| SyncError::Closed),
            _ = wait_closed(&mut closed) => Err(SyncError::Closed),
        }
    }

    /// Allocate a sequence number. Running out closes the connection.
    fn next_seq(&self) -> Result<u32> {
        match self.inner.seq.next() {
            Some(seq) => Ok(seq),
            None => {
                if !self.is_closed() {
                    error!(conn = %self.id(), "sequence numbers exhausted, closing");
                    let conn = self.clone();
                    tokio::spawn(async move { conn.close().await });
                }
                Err(SyncError::SequenceExhausted)
            }
        }
    }

    /// Send a fire-and-forget message.
    pub async fn notify(&self, message: Message) -> Result<()> {
        self.send_frame(Frame::new(self.next_seq()?, 0, message))
            .await
    }

    /// Answer the peer's request `rseq`.
    pub(crate) async fn respond(&self, rseq: u32, message: Message) -> Result<()> {
        self.send_frame(Frame::new(self.next_seq()?, rseq, message))
            .await
    }

    /// Send a request and wait for its reply.
    ///
    /// Resolves exactly once: with the reply, with [`SyncError::Timeout`]
    /// after `timeout`, or with [`SyncError::Closed`]. Dropping the future
    /// early forgets the reply slot.
    pub async fn request(&self, message: Message, timeout: Option<Duration>) -> Result<Message> {
        let seq = self.next_seq()?;
        let reply = self.tables().pending.register(seq);
        let _slot = SlotGuard { conn: self, seq };

        self.send_frame(Frame::new(seq, 0, message)).await?;
        await_reply(reply, timeout).await
    }

    /// Send a request with the configured response timeout.
    pub(crate) async fn call(&self, message: Message) -> Result<Message> {
        let timeout = self.config().response_timeout;
        self.request(message, timeout).await
    }

    /// Push an object the peer asked for earlier.
    pub(crate) async fn push_object(&self, value: Bytes) -> Result<()> {
        self.notify(Message::ObjectResponse {
            value,
            additional: Vec::new(),
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receive loop
    // ─────────────────────────────────────────────────────────────────────────

    async fn run(self, mut inbound: mpsc::Receiver<Bytes>) {
        let mut closed = self.inner.closed.subscribe();

        loop {
            let raw = tokio::select! {
                raw = inbound.recv() => raw,
                _ = wait_closed(&mut closed) => break,
            };
            let Some(raw) = raw else {
                debug!(conn = %self.id(), "transport closed by peer");
                break;
            };

            if let Err(e) = self.dispatch(&raw).await {
                error!(conn = %self.id(), error = %e, "closing connection");
                break;
            }
        }

        self.close().await;
    }

    /// Handle one inbound frame. Any error returned is fatal.
    async fn dispatch(&self, raw: &[u8]) -> Result<()> {
        let frame = Frame::decode(raw)?;

        if frame.is_response() {
            let kind = frame.message.kind();
            if !self.tables().pending.resolve(frame.rseq, frame.message) {
                debug!(conn = %self.id(), rseq = frame.rseq, kind, "dropping unmatched response");
            }
            return Ok(());
        }

        let seq = frame.seq;
        match frame.message {
            Message::Subscribe { feed } => self.handle_subscribe(seq, feed).await,
            Message::Unsubscribe { feed } => self.handle_unsubscribe(feed).await,
            Message::ListFeedsRequest => self.handle_list_feeds(seq).await,
            Message::PreviewRequest { feed } => self.handle_preview(seq, feed).await,
            Message::RootAnnounce(announce) => self.handle_root_announce(announce).await,
            Message::RootDone {
                feed,
                nonce,
                seq: root_seq,
            } => self.handle_root_done(HeadId::new(feed, nonce), root_seq).await,
            Message::RootError {
                feed,
                nonce,
                seq: root_seq,
                reason,
            } => {
                self.handle_root_error(HeadId::new(feed, nonce), root_seq, &reason);
                Ok(())
            }
            Message::ObjectRequest { key, prefetch } => {
                self.handle_object_request(seq, key, prefetch).await
            }
            Message::ObjectResponse { value, .. } => self.handle_object_push(value).await,
            message @ (Message::Ok | Message::Error { .. } | Message::ListFeedsResponse { .. }) => {
                warn!(conn = %self.id(), kind = message.kind(), "dropping response sent as request");
                Ok(())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Close the connection. Idempotent.
    ///
    /// Pending requests resolve as closed, the connection leaves every
    /// filling operation it assisted and every feed it was subscribed to,
    /// and the registry forgets it.
    pub async fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }

        let (released, feeds) = {
            let mut tables = self.tables();
            let released = tables.pending.close();
            tables.outbound = None;
            (released, std::mem::take(&mut tables.feeds))
        };

        for (feed, state) in feeds {
            self.registry().remove_subscriber(&feed, self.id());
            for op in state.into_fills() {
                op.detach(self.id()).await;
            }
        }
        self.registry().remove_connection(self.id());

        debug!(conn = %self.id(), released, "connection closed");
    }
}

/// Removes a request's reply slot however the request ends.
struct SlotGuard<'a> {
    conn: &'a Connection,
    seq: u32,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.conn.tables().pending.cancel(self.seq);
    }
}

/// Wait until the close flag is set (or its sender is gone).
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Turn a reply that is not the expected variant into an error.
pub(crate) fn reply_error(reply: Message) -> SyncError {
    match reply {
        Message::Error { message } if message == SyncError::NotPublic.to_string() => {
            SyncError::NotPublic
        }
        Message::Error { message } => SyncError::Peer(message),
        other => SyncError::UnexpectedResponse(other.kind().to_string()),
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::pipe;
    use arbor_core::ObjectKey;
    use arbor_store::MemoryStore;

    fn spawn_pair(config: SyncConfig) -> (Connection, Connection) {
        let (a, b) = pipe(config.send_queue);
        let left = Connection::spawn(
            a,
            Direction::Outgoing,
            Arc::new(Registry::new(true, None)),
            Arc::new(MemoryStore::new()),
            config.clone(),
        );
        let right = Connection::spawn(
            b,
            Direction::Incoming,
            Arc::new(Registry::new(true, None)),
            Arc::new(MemoryStore::new()),
            config,
        );
        (left, right)
    }

    #[tokio::test]
    async fn test_request_reply() {
        let (a, b) = spawn_pair(SyncConfig::default());
        b.registry().share(FeedId::from_bytes([1; 32])).unwrap();

        let reply = a.call(Message::ListFeedsRequest).await.unwrap();
        assert_eq!(
            reply,
            Message::ListFeedsResponse {
                feeds: vec![FeedId::from_bytes([1; 32])]
            }
        );
        assert_eq!(a.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_when_peer_is_silent() {
        let (a, b) = spawn_pair(SyncConfig::default());

        let missing = ObjectKey::of(b"nobody has this");
        let reply = a
            .request(
                Message::ObjectRequest {
                    key: missing,
                    prefetch: false,
                },
                Some(Duration::from_millis(200)),
            )
            .await;

        assert!(matches!(reply, Err(SyncError::Timeout)));
        assert_eq!(a.pending_requests(), 0);
        assert!(b.registry().is_wanted(&missing));
    }

    #[tokio::test]
    async fn test_close_releases_pending_request() {
        let (a, _b) = spawn_pair(SyncConfig::default());

        let waiter = {
            let a = a.clone();
            tokio::spawn(async move {
                a.request(
                    Message::ObjectRequest {
                        key: ObjectKey::of(b"x"),
                        prefetch: false,
                    },
                    None,
                )
                .await
            })
        };

        while a.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        a.close().await;

        assert!(matches!(waiter.await.unwrap(), Err(SyncError::Closed)));
        assert!(a.is_closed());
        assert!(a.registry().connection(a.id()).is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, b) = spawn_pair(SyncConfig::default());
        a.close().await;
        a.close().await;
        assert!(matches!(a.notify(Message::Ok).await, Err(SyncError::Closed)));

        // The peer sees its inbound queue end and closes too.
        b.closed().await;
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_abandoned_request_frees_its_slot() {
        let (a, _b) = spawn_pair(SyncConfig::default());

        let request = a.request(
            Message::ObjectRequest {
                key: ObjectKey::of(b"never answered"),
                prefetch: false,
            },
            None,
        );
        let outcome = tokio::time::timeout(Duration::from_millis(50), request).await;

        assert!(outcome.is_err());
        assert_eq!(a.pending_requests(), 0);
        assert!(!a.is_closed());
    }

    #[tokio::test]
    async fn test_exhausted_sequence_closes_connection() {
        let (a, _b) = spawn_pair(SyncConfig::default());
        a.inner.seq.skip_to(u64::from(u32::MAX) + 1);

        assert!(matches!(
            a.notify(Message::Ok).await,
            Err(SyncError::SequenceExhausted)
        ));
        assert!(matches!(
            a.call(Message::ListFeedsRequest).await,
            Err(SyncError::SequenceExhausted)
        ));
        a.closed().await;
        assert!(a.registry().connection(a.id()).is_none());
    }

    #[tokio::test]
    async fn test_short_frame_closes_connection() {
        let (raw, link) = pipe(8);
        let conn = Connection::spawn(
            link,
            Direction::Incoming,
            Arc::new(Registry::new(false, None)),
            Arc::new(MemoryStore::new()),
            SyncConfig::default(),
        );

        raw.outbound
            .send(Bytes::from_static(&[1, 0, 0, 0, 0]))
            .await
            .unwrap();
        conn.closed().await;
        assert!(conn.registry().connections().is_empty());
    }

    #[test]
    fn test_reply_error_mapping() {
        assert!(matches!(
            reply_error(Message::error(SyncError::NotPublic)),
            SyncError::NotPublic
        ));
        assert!(matches!(
            reply_error(Message::error("nope")),
            SyncError::Peer(m) if m == "nope"
        ));
        assert!(matches!(
            reply_error(Message::ListFeedsRequest),
            SyncError::UnexpectedResponse(_)
        ));
    }
}
