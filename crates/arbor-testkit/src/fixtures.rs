//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: feed keys, object trees, linked
//! node pairs and polling helpers.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use rand::RngCore;

use arbor::{Connection, Node, NodeConfig};
use arbor_core::{FeedId, HeadId, Keypair, ObjectKey, ObjectNode, Root, RootBuilder};
use arbor_store::{MemoryStore, ObjectStore};

/// A feed key and one of its heads.
pub struct TestFixture {
    pub keypair: Keypair,
    pub nonce: u64,
}

impl TestFixture {
    /// Create a new fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            nonce: 1,
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            nonce: 1,
        }
    }

    pub fn feed(&self) -> FeedId {
        self.keypair.feed_id()
    }

    pub fn head(&self) -> HeadId {
        HeadId::new(self.feed(), self.nonce)
    }

    /// Sign a root at `seq` over `refs`.
    pub fn make_root(&self, seq: u64, refs: Vec<ObjectKey>) -> Root {
        RootBuilder::new(self.head(), seq)
            .timestamp(1_700_000_000_000 + seq as i64)
            .refs(refs)
            .sign(&self.keypair)
    }

    /// Sign the root following `prev` over `refs`.
    pub fn make_next(&self, prev: &Root, refs: Vec<ObjectKey>) -> Root {
        RootBuilder::after(prev)
            .timestamp(prev.timestamp() + 1)
            .refs(refs)
            .sign(&self.keypair)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create fixtures with distinct deterministic keys.
pub fn multi_feed_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = 0xA5;
            TestFixture::with_seed(seed)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Object trees
// ─────────────────────────────────────────────────────────────────────────────

/// An object tree built in memory, not yet stored anywhere.
#[derive(Debug, Clone, Default)]
pub struct ObjectTree {
    /// Keys a root should reference.
    pub top: Vec<ObjectKey>,
    /// Every object of the tree, parents after their children.
    pub objects: Vec<(ObjectKey, Bytes)>,
}

impl ObjectTree {
    /// A tree of `depth` levels where every inner node has `fanout`
    /// children and leaves are random blobs of `leaf_len` bytes.
    ///
    /// A depth of 1 is a list of leaves.
    pub fn random(depth: usize, fanout: usize, leaf_len: usize) -> Self {
        let mut tree = ObjectTree::default();
        let top = (0..fanout)
            .map(|_| tree.build(depth.max(1), fanout, leaf_len))
            .collect();
        tree.top = top;
        tree
    }

    /// The three-level tree used by end-to-end tests: one directory, three
    /// sub-directories, two leaves each.
    pub fn three_level() -> Self {
        let mut tree = ObjectTree::default();
        let mut dirs = Vec::new();
        for d in 0..3u8 {
            let leaves = (0..2u8)
                .map(|l| tree.add(Bytes::from(vec![d, l, 0xEE])))
                .collect();
            dirs.push(tree.add(ObjectNode::new(leaves, vec![d]).encode().into()));
        }
        let top = tree.add(ObjectNode::new(dirs, b"top".to_vec()).encode().into());
        tree.top = vec![top];
        tree
    }

    fn build(&mut self, depth: usize, fanout: usize, leaf_len: usize) -> ObjectKey {
        if depth == 1 {
            let mut leaf = vec![0u8; leaf_len];
            rand::thread_rng().fill_bytes(&mut leaf);
            return self.add(leaf.into());
        }
        let children = (0..fanout)
            .map(|_| self.build(depth - 1, fanout, leaf_len))
            .collect();
        let mut tag = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut tag);
        self.add(ObjectNode::new(children, tag.to_vec()).encode().into())
    }

    fn add(&mut self, bytes: Bytes) -> ObjectKey {
        let key = ObjectKey::of(&bytes);
        self.objects.push((key, bytes));
        key
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.objects.iter().map(|(key, _)| *key)
    }

    /// Bytes of one object of the tree.
    pub fn get(&self, key: &ObjectKey) -> Option<&Bytes> {
        self.objects.iter().find(|(k, _)| k == key).map(|(_, b)| b)
    }

    /// Store every object through the node (wanted objects get pushed).
    pub async fn store_into(&self, node: &Node) -> arbor::Result<()> {
        for (_, bytes) in &self.objects {
            node.put_object(bytes.clone()).await?;
        }
        Ok(())
    }

    /// Store every object directly, bypassing any node.
    pub async fn store_raw(&self, store: &dyn ObjectStore) -> arbor_store::Result<()> {
        for (key, bytes) in &self.objects {
            store.put(key, bytes.clone()).await?;
        }
        Ok(())
    }

    /// Whether `node` holds every object of the tree.
    pub async fn is_stored_in(&self, node: &Node) -> arbor::Result<bool> {
        for key in self.keys() {
            if node.get_object(&key).await?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

/// An in-memory node.
pub fn memory_node(config: NodeConfig) -> Node {
    Node::new(MemoryStore::new(), config)
}

/// Config with short timeouts for tests.
pub fn fast_config() -> NodeConfig {
    let mut config = NodeConfig {
        public: true,
        ..NodeConfig::default()
    };
    config.sync.response_timeout = Some(Duration::from_secs(2));
    config.sync.object_timeout = Duration::from_millis(300);
    config
}

/// Two in-memory nodes linked by a pipe.
pub struct LinkedPair {
    pub a: Node,
    pub b: Node,
    /// A's end of the link.
    pub a_conn: Connection,
    /// B's end of the link.
    pub b_conn: Connection,
}

impl LinkedPair {
    pub fn new(config: NodeConfig) -> Self {
        let a = memory_node(config.clone());
        let b = memory_node(config);
        let (a_conn, b_conn) = a.connect_local(&b);
        Self {
            a,
            b,
            a_conn,
            b_conn,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting
// ─────────────────────────────────────────────────────────────────────────────

/// Poll `check` until it yields true or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `node` has saved a root of `head` at `seq` or later.
pub async fn wait_for_latest(node: &Node, head: &HeadId, seq: u64, timeout: Duration) -> Option<Root> {
    let reached = wait_until(timeout, || async move {
        matches!(node.latest_root(head).await, Ok(Some(root)) if root.seq() >= seq)
    })
    .await;
    if !reached {
        return None;
    }
    node.latest_root(head).await.ok().flatten()
}

/// Install a test-friendly tracing subscriber (once per process).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_level_tree_shape() {
        let tree = ObjectTree::three_level();
        assert_eq!(tree.top.len(), 1);
        assert_eq!(tree.len(), 1 + 3 + 6);

        let top = ObjectNode::decode(tree.get(&tree.top[0]).unwrap()).unwrap();
        assert_eq!(top.refs.len(), 3);
        for dir in &top.refs {
            let node = ObjectNode::decode(tree.get(dir).unwrap()).unwrap();
            assert_eq!(node.refs.len(), 2);
        }
    }

    #[test]
    fn test_random_tree_size() {
        let tree = ObjectTree::random(3, 2, 16);
        // 2 top nodes, each 2 children, each 2 leaves.
        assert_eq!(tree.len(), 2 + 4 + 8);
        assert!(tree.keys().all(|key| key.matches(tree.get(&key).unwrap())));
    }

    #[test]
    fn test_fixture_roots_chain() {
        let fixture = TestFixture::with_seed([3; 32]);
        let first = fixture.make_root(1, vec![]);
        let second = fixture.make_next(&first, vec![]);

        assert_eq!(second.seq(), 2);
        assert_eq!(second.value().prev, Some(first.hash()));
        assert!(arbor_core::validate_root(&second).is_ok());
    }

    #[test]
    fn test_multi_feed_distinct() {
        let feeds: Vec<FeedId> = multi_feed_fixtures(3).iter().map(|f| f.feed()).collect();
        assert_ne!(feeds[0], feeds[1]);
        assert_ne!(feeds[1], feeds[2]);
        assert_ne!(feeds[0], feeds[2]);
    }

    #[tokio::test]
    async fn test_store_raw_then_present() {
        let tree = ObjectTree::three_level();
        let node = memory_node(NodeConfig::default());
        tree.store_raw(node.store().as_ref()).await.unwrap();
        assert!(tree.is_stored_in(&node).await.unwrap());
    }
}
