//! Root synchronizer: inbound root announcements and fill notifications.

use tracing::{debug, info, warn};

use arbor_core::{HeadId, Root};

use crate::conn::Connection;
use crate::error::Result;
use crate::filler;
use crate::messages::{Message, RootAnnounce};

impl Connection {
    /// Announce a root to the peer.
    pub async fn announce_root(&self, root: &Root) -> Result<()> {
        self.notify(Message::RootAnnounce(RootAnnounce::from_root(root)))
            .await
    }

    /// Accept, freshness-check and fill an announced root.
    ///
    /// Invalid or stale announcements are dropped. Only store failures
    /// other than validation are returned.
    pub(crate) async fn handle_root_announce(&self, announce: RootAnnounce) -> Result<()> {
        let feed = announce.feed;
        if !self.has_feed(&feed) {
            debug!(conn = %self.id(), %feed, "dropping root of unsubscribed feed");
            return Ok(());
        }

        let accepted = match self
            .store()
            .accept_root(&announce.signature, announce.value.clone())
            .await
        {
            Ok(accepted) => accepted,
            Err(e) if e.is_validation() => {
                warn!(conn = %self.id(), %feed, seq = announce.seq, error = %e, "dropping invalid root");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let root = accepted.root;
        if !announce.matches(&root) {
            warn!(
                conn = %self.id(),
                %feed,
                seq = announce.seq,
                "dropping root whose value disagrees with its header"
            );
            return Ok(());
        }
        if accepted.already_full {
            debug!(conn = %self.id(), root = %root.short(), "root already known");
            return Ok(());
        }

        if let Some(latest) = self.store().latest_root(&root.head()).await? {
            if latest.seq() >= root.seq() {
                debug!(
                    conn = %self.id(),
                    head = %root.head(),
                    latest = latest.seq(),
                    seq = root.seq(),
                    "dropping stale root"
                );
                return Ok(());
            }
        }

        let short = root.short();
        let offer = filler::fill(self, root).await?;
        debug!(conn = %self.id(), root = %short, ?offer, "root offered for filling");
        Ok(())
    }

    /// The peer holds the full tree of `seq`: let it assist our fill.
    pub(crate) async fn handle_root_done(&self, head: HeadId, seq: u64) -> Result<()> {
        let Some(op) = self.registry().fill_for(&head) else {
            debug!(conn = %self.id(), %head, seq, "RootDone without a running fill");
            return Ok(());
        };
        if !self.has_feed(&head.feed) {
            debug!(conn = %self.id(), %head, "RootDone for unsubscribed feed");
            return Ok(());
        }

        if op.peer_done(seq, self).await {
            debug!(conn = %self.id(), %head, seq, "peer joins fill after RootDone");
        }
        Ok(())
    }

    pub(crate) fn handle_root_error(&self, head: HeadId, seq: u64, reason: &str) {
        info!(conn = %self.id(), %head, seq, reason, "peer failed to fill root");
    }
}
