//! The Node: one store, one registry, many connections.
//!
//! A node owns the object store and the registry shared by its
//! connections. Local writes go through the node so that subscribers hear
//! about new roots and peers waiting for an object receive it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, info, warn};

use arbor_core::{
    validate_root, FeedId, HeadId, Keypair, ObjectKey, ObjectNode, Root, RootBuilder,
};
use arbor_store::ObjectStore;
use arbor_sync::{
    memory, Connection, Direction, FillStatus, Link, Registry, SubscribePolicy,
};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// A peer in the feed network.
pub struct Node {
    store: Arc<dyn ObjectStore>,
    registry: Arc<Registry>,
    config: NodeConfig,
}

impl Node {
    /// Create a node over `store`.
    pub fn new(store: impl ObjectStore + 'static, config: NodeConfig) -> Self {
        let registry = Registry::new(config.public, config.max_feeds);
        Self::assemble(Arc::new(store), registry, config)
    }

    /// Create a node whose inbound subscriptions are screened by `policy`.
    pub fn with_policy(
        store: impl ObjectStore + 'static,
        config: NodeConfig,
        policy: impl SubscribePolicy + 'static,
    ) -> Self {
        let registry = Registry::new(config.public, config.max_feeds).with_policy(policy);
        Self::assemble(Arc::new(store), registry, config)
    }

    fn assemble(store: Arc<dyn ObjectStore>, registry: Registry, config: NodeConfig) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a connection actor over an established link.
    pub fn connect(&self, link: Link, direction: Direction) -> Connection {
        Connection::spawn(
            link,
            direction,
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            self.config.sync.clone(),
        )
    }

    /// Link this node to `other` through an in-memory pipe.
    ///
    /// Returns this node's end first.
    pub fn connect_local(&self, other: &Node) -> (Connection, Connection) {
        let (ours, theirs) = memory::pipe(self.config.sync.send_queue);
        (
            self.connect(ours, Direction::Outgoing),
            other.connect(theirs, Direction::Incoming),
        )
    }

    /// Live connections, ordered by id.
    pub fn connections(&self) -> Vec<Connection> {
        self.registry.connections()
    }

    /// Close every connection.
    pub async fn shutdown(&self) {
        for conn in self.connections() {
            conn.close().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Start holding `feed`. Returns false if it was already held.
    pub fn share(&self, feed: FeedId) -> Result<bool> {
        Ok(self.registry.share(feed)?)
    }

    /// Store an object and push it to peers that asked for it.
    pub async fn put_object(&self, bytes: impl Into<Bytes>) -> Result<ObjectKey> {
        let bytes = bytes.into();
        let key = ObjectKey::of(&bytes);
        self.store.put(&key, bytes.clone()).await?;
        self.registry.object_arrived(&key, &bytes).await;
        Ok(key)
    }

    /// Store a reference-bearing object.
    pub async fn put_node(&self, node: &ObjectNode) -> Result<ObjectKey> {
        self.put_object(node.encode()).await
    }

    /// Publish a root whose whole tree is stored locally.
    ///
    /// The root is saved as the latest of its head and announced to every
    /// connection subscribed to its feed.
    pub async fn publish(&self, root: &Root) -> Result<()> {
        validate_root(root)?;

        if let Some(latest) = self.store.latest_root(&root.head()).await? {
            if latest.seq() >= root.seq() {
                return Err(NodeError::StaleRoot {
                    head: root.head(),
                    seq: root.seq(),
                    latest: latest.seq(),
                });
            }
        }

        let missing = self.store.missing_references(root).await?;
        if !missing.is_empty() {
            return Err(NodeError::IncompleteTree {
                root: root.short(),
                missing: missing.len(),
            });
        }

        self.registry.share(root.feed())?;
        self.store.save_root(root).await?;
        info!(root = %root.short(), refs = root.refs().len(), "published root");

        let mut subscribers = Vec::new();
        self.registry
            .for_each_connection_of(&root.feed(), |conn| subscribers.push(conn.clone()));
        for conn in subscribers {
            if let Err(e) = conn.announce_root(root).await {
                warn!(conn = %conn.id(), error = %e, "announce failed");
            }
        }
        Ok(())
    }

    /// Sign and publish the next root of `nonce`'s head over `refs`.
    ///
    /// The first root of a head gets sequence 1, later ones follow the
    /// latest saved root.
    pub async fn commit(&self, keypair: &Keypair, nonce: u64, refs: Vec<ObjectKey>) -> Result<Root> {
        let head = HeadId::new(keypair.feed_id(), nonce);
        let builder = match self.store.latest_root(&head).await? {
            Some(latest) => RootBuilder::after(&latest),
            None => RootBuilder::new(head, 1),
        };

        let root = builder.timestamp(now_millis()).refs(refs).sign(keypair);
        debug!(root = %root.short(), "committing root");
        self.publish(&root).await?;
        Ok(root)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// The latest saved root of `head`.
    pub async fn latest_root(&self, head: &HeadId) -> Result<Option<Root>> {
        Ok(self.store.latest_root(head).await?)
    }

    /// Fetch an object from the local store.
    pub async fn get_object(&self, key: &ObjectKey) -> Result<Option<Bytes>> {
        Ok(self.store.get(key).await?)
    }

    /// State of the running fill of `head`, if any.
    pub fn fill_status(&self, head: &HeadId) -> Option<FillStatus> {
        self.registry.fill_for(head).map(|op| op.status())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::MemoryStore;

    fn node() -> Node {
        Node::new(MemoryStore::new(), NodeConfig::default())
    }

    #[tokio::test]
    async fn test_commit_assigns_sequence() {
        let node = node();
        let keypair = Keypair::from_seed(&[7; 32]);
        let leaf = node.put_object(b"leaf".to_vec()).await.unwrap();

        let first = node.commit(&keypair, 1, vec![leaf]).await.unwrap();
        let second = node.commit(&keypair, 1, vec![leaf]).await.unwrap();

        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 2);
        assert_eq!(second.value().prev, Some(first.hash()));
        assert_eq!(node.latest_root(&first.head()).await.unwrap(), Some(second));
        assert!(node.registry().shares_feed(&keypair.feed_id()));
    }

    #[tokio::test]
    async fn test_publish_rejects_incomplete_tree() {
        let node = node();
        let keypair = Keypair::from_seed(&[7; 32]);
        let absent = ObjectKey::of(b"never stored");

        let root = RootBuilder::new(HeadId::new(keypair.feed_id(), 1), 1)
            .add_ref(absent)
            .sign(&keypair);

        assert!(matches!(
            node.publish(&root).await,
            Err(NodeError::IncompleteTree { missing: 1, .. })
        ));
        assert_eq!(node.latest_root(&root.head()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_rejects_stale_root() {
        let node = node();
        let keypair = Keypair::from_seed(&[7; 32]);
        let head = HeadId::new(keypair.feed_id(), 1);

        let newer = RootBuilder::new(head, 5).sign(&keypair);
        let older = RootBuilder::new(head, 3).sign(&keypair);
        node.publish(&newer).await.unwrap();

        assert!(matches!(
            node.publish(&older).await,
            Err(NodeError::StaleRoot { seq: 3, latest: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_rejects_bad_signature() {
        let node = node();
        let keypair = Keypair::from_seed(&[7; 32]);
        let forger = Keypair::from_seed(&[8; 32]);

        let forged = RootBuilder::new(HeadId::new(keypair.feed_id(), 1), 1).sign(&forger);
        assert!(matches!(
            node.publish(&forged).await,
            Err(NodeError::Validation(_))
        ));
    }
}
