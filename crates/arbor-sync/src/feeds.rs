//! Feed subscription table.
//!
//! Each connection keeps one [`FeedState`] per feed shared with its peer.
//! The state is created on the first granted subscription in either
//! direction and holds the filling operations this connection assists for
//! that feed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use arbor_core::{FeedId, HeadId, Root};

use crate::conn::{reply_error, Connection};
use crate::error::{Result, SyncError};
use crate::filler::FillingOperation;
use crate::messages::{limits, Message, RootAnnounce};
use crate::registry::ConnId;

/// One connection's state for one feed.
pub(crate) struct FeedState {
    owner: ConnId,
    /// False while our own Subscribe request is still unanswered.
    granted: bool,
    fills: HashMap<HeadId, Arc<FillingOperation>>,
}

impl FeedState {
    fn new(owner: ConnId, granted: bool) -> Self {
        Self {
            owner,
            granted,
            fills: HashMap::new(),
        }
    }

    pub(crate) fn owner(&self) -> ConnId {
        self.owner
    }

    pub(crate) fn into_fills(self) -> impl Iterator<Item = Arc<FillingOperation>> {
        self.fills.into_values()
    }
}

impl Connection {
    // ─────────────────────────────────────────────────────────────────────────
    // Outbound API
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to `feed` on the peer.
    ///
    /// Succeeds immediately if already subscribed. Otherwise the node starts
    /// sharing the feed, the peer is asked, and on Ok the subscription is
    /// recorded and the node's latest roots of the feed are announced.
    pub async fn subscribe(&self, feed: FeedId) -> Result<()> {
        if feed.is_blank() {
            return Err(SyncError::BlankFeed);
        }
        if self.is_subscribed(&feed) {
            return Ok(());
        }

        self.registry().share(feed)?;

        // Opened before asking so that announcements following the peer's Ok
        // are not dropped.
        let opened = self.open_feed(feed)?;

        let reply = self.call(Message::Subscribe { feed }).await;
        match reply {
            Ok(Message::Ok) => {
                if self.grant_feed(feed)? {
                    debug!(conn = %self.id(), %feed, "subscribed");
                    self.announce_latest(feed).await?;
                }
                Ok(())
            }
            Ok(other) => {
                if opened {
                    self.discard_ungranted(&feed).await;
                }
                Err(reply_error(other))
            }
            Err(e) => {
                if opened {
                    self.discard_ungranted(&feed).await;
                }
                Err(e)
            }
        }
    }

    /// Stop sharing `feed` with the peer. No-op if not subscribed.
    pub async fn unsubscribe(&self, feed: FeedId) -> Result<()> {
        if !self.release_feed(&feed).await {
            return Ok(());
        }
        debug!(conn = %self.id(), %feed, "unsubscribed");
        self.notify(Message::Unsubscribe { feed }).await
    }

    /// Whether a subscription to `feed` is granted on this connection.
    pub fn is_subscribed(&self, feed: &FeedId) -> bool {
        self.tables().feeds.get(feed).is_some_and(|state| state.granted)
    }

    /// Feeds with a granted subscription, in no particular order.
    pub fn subscribed_feeds(&self) -> Vec<FeedId> {
        self.tables()
            .feeds
            .iter()
            .filter(|(_, state)| state.granted)
            .map(|(feed, _)| *feed)
            .collect()
    }

    /// Ask a public peer which feeds it holds.
    pub async fn remote_feeds(&self) -> Result<Vec<FeedId>> {
        match self.call(Message::ListFeedsRequest).await? {
            Message::ListFeedsResponse { feeds } => Ok(feeds),
            other => Err(reply_error(other)),
        }
    }

    /// Fetch the peer's latest root of `feed` without subscribing.
    ///
    /// The root is validated but neither filled nor saved.
    pub async fn preview(&self, feed: FeedId) -> Result<Root> {
        if feed.is_blank() {
            return Err(SyncError::BlankFeed);
        }

        let announce = match self.call(Message::PreviewRequest { feed }).await? {
            Message::RootAnnounce(announce) => announce,
            other => return Err(reply_error(other)),
        };

        let accepted = self
            .store()
            .accept_root(&announce.signature, announce.value.clone())
            .await?;
        if accepted.root.feed() != feed || !announce.matches(&accepted.root) {
            return Err(SyncError::UnexpectedResponse(
                "preview root does not match its header".into(),
            ));
        }
        Ok(accepted.root)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound handlers
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn handle_subscribe(&self, seq: u32, feed: FeedId) -> Result<()> {
        if self.is_subscribed(&feed) {
            return self.respond(seq, Message::Ok).await;
        }

        let refusal = if feed.is_blank() {
            Some(SyncError::BlankFeed)
        } else if let Err(e) = self.registry().accept_subscriber(self.id(), &feed) {
            Some(e)
        } else if !self.registry().shares_feed(&feed) {
            Some(SyncError::FeedNotShared(feed))
        } else {
            None
        };

        if let Some(e) = refusal {
            debug!(conn = %self.id(), %feed, error = %e, "refusing subscription");
            return self.respond(seq, Message::error(e)).await;
        }

        let granted = self.grant_feed(feed)?;
        self.respond(seq, Message::Ok).await?;
        if granted {
            debug!(conn = %self.id(), %feed, "granted subscription");
            self.announce_latest(feed).await?;
        }
        Ok(())
    }

    pub(crate) async fn handle_unsubscribe(&self, feed: FeedId) -> Result<()> {
        if feed.is_blank() {
            warn!(conn = %self.id(), "ignoring unsubscribe of blank feed");
            return Ok(());
        }
        if self.release_feed(&feed).await {
            debug!(conn = %self.id(), %feed, "peer unsubscribed");
        }
        Ok(())
    }

    pub(crate) async fn handle_list_feeds(&self, seq: u32) -> Result<()> {
        if !self.registry().is_public() {
            return self.respond(seq, Message::error(SyncError::NotPublic)).await;
        }

        let mut feeds = self.registry().list_feeds();
        feeds.truncate(limits::MAX_LISTED_FEEDS);
        self.respond(seq, Message::ListFeedsResponse { feeds }).await
    }

    pub(crate) async fn handle_preview(&self, seq: u32, feed: FeedId) -> Result<()> {
        if !self.registry().is_public() {
            return self.respond(seq, Message::error(SyncError::NotPublic)).await;
        }
        if !self.registry().shares_feed(&feed) {
            return self
                .respond(seq, Message::error(SyncError::FeedNotShared(feed)))
                .await;
        }

        let mut newest: Option<Root> = None;
        for head in self.store().heads_of(&feed).await? {
            if let Some(root) = self.store().latest_root(&head).await? {
                let newer = newest
                    .as_ref()
                    .map_or(true, |best| (root.timestamp(), root.seq()) > (best.timestamp(), best.seq()));
                if newer {
                    newest = Some(root);
                }
            }
        }

        let reply = match newest {
            Some(root) => Message::RootAnnounce(RootAnnounce::from_root(&root)),
            None => Message::error(format!("no root for feed {feed}")),
        };
        self.respond(seq, reply).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feed state
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether any feed state (granted or awaiting the peer) exists.
    pub(crate) fn has_feed(&self, feed: &FeedId) -> bool {
        self.tables().feeds.contains_key(feed)
    }

    /// Insert an ungranted state. Returns true if this call created it.
    fn open_feed(&self, feed: FeedId) -> Result<bool> {
        let mut tables = self.tables();
        if tables.pending.is_closed() {
            return Err(SyncError::Closed);
        }
        if tables.feeds.contains_key(&feed) {
            return Ok(false);
        }
        tables.feeds.insert(feed, FeedState::new(self.id(), false));
        Ok(true)
    }

    /// Mark the subscription granted and register it with the node.
    /// Returns true if it was not granted before.
    fn grant_feed(&self, feed: FeedId) -> Result<bool> {
        let newly = {
            let mut tables = self.tables();
            if tables.pending.is_closed() {
                return Err(SyncError::Closed);
            }
            let id = self.id();
            let state = tables
                .feeds
                .entry(feed)
                .or_insert_with(|| FeedState::new(id, false));
            !std::mem::replace(&mut state.granted, true)
        };

        if newly {
            self.registry().add_subscriber(feed, self.id());
        }
        Ok(newly)
    }

    /// Drop a state our refused Subscribe left behind, leaving any filling
    /// operation the peer's announcements attached to it.
    async fn discard_ungranted(&self, feed: &FeedId) {
        let state = {
            let mut tables = self.tables();
            if !tables.feeds.get(feed).is_some_and(|state| !state.granted) {
                return;
            }
            tables.feeds.remove(feed)
        };
        let Some(state) = state else {
            return;
        };

        for op in state.into_fills() {
            op.detach(self.id()).await;
        }
    }

    /// Remove the feed state and detach its filling operations.
    /// Returns false if there was none.
    async fn release_feed(&self, feed: &FeedId) -> bool {
        let Some(state) = self.tables().feeds.remove(feed) else {
            return false;
        };

        debug!(conn = %state.owner(), %feed, fills = state.fills.len(), "releasing feed state");
        self.registry().remove_subscriber(feed, self.id());
        for op in state.into_fills() {
            op.detach(self.id()).await;
        }
        true
    }

    /// Record that this connection assists `op`.
    /// Returns false if the feed is not shared on this connection.
    pub(crate) fn attach_fill(&self, head: HeadId, op: Arc<FillingOperation>) -> bool {
        let mut tables = self.tables();
        if tables.pending.is_closed() {
            return false;
        }
        match tables.feeds.get_mut(&head.feed) {
            Some(state) => {
                state.fills.insert(head, op);
                true
            }
            None => false,
        }
    }

    pub(crate) fn detach_fill(&self, head: &HeadId) {
        if let Some(state) = self.tables().feeds.get_mut(&head.feed) {
            state.fills.remove(head);
        }
    }

    /// Filling operations this connection currently assists.
    pub(crate) fn assisted_fills(&self) -> Vec<Arc<FillingOperation>> {
        self.tables()
            .feeds
            .values()
            .flat_map(|state| state.fills.values().cloned())
            .collect()
    }

    /// Announce the latest saved root of every head of `feed` to the peer.
    async fn announce_latest(&self, feed: FeedId) -> Result<()> {
        for head in self.store().heads_of(&feed).await? {
            if let Some(root) = self.store().latest_root(&head).await? {
                debug!(conn = %self.id(), root = %root.short(), "announcing latest root");
                self.notify(Message::RootAnnounce(RootAnnounce::from_root(&root)))
                    .await?;
            }
        }
        Ok(())
    }
}
