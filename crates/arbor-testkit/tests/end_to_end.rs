//! Whole-node scenarios: publishers, readers and relays linked in memory.

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use arbor::store::{ObjectStore, SqliteStore};
use arbor::{FillStatus, Node, ObjectKey, ObjectNode};
use arbor_testkit::{
    fast_config, init_tracing, memory_node, wait_for_latest, wait_until, LinkedPair, ObjectTree,
    TestFixture,
};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_reader_fills_three_level_tree() -> Result<()> {
    init_tracing();
    let pair = LinkedPair::new(fast_config());
    let fixture = TestFixture::with_seed([21; 32]);
    let tree = ObjectTree::three_level();

    tree.store_into(&pair.b).await?;
    let published = pair.b.commit(&fixture.keypair, fixture.nonce, tree.top.clone()).await?;

    pair.a_conn.subscribe(fixture.feed()).await?;
    let filled = wait_for_latest(&pair.a, &fixture.head(), 1, WAIT).await;

    assert_eq!(filled, Some(published));
    assert!(tree.is_stored_in(&pair.a).await?);
    assert!(pair.a.fill_status(&fixture.head()).is_none());
    Ok(())
}

#[tokio::test]
async fn test_publish_reaches_existing_subscriber() -> Result<()> {
    init_tracing();
    let pair = LinkedPair::new(fast_config());
    let fixture = TestFixture::with_seed([22; 32]);
    pair.b.share(fixture.feed())?;
    pair.a_conn.subscribe(fixture.feed()).await?;

    let first = ObjectTree::random(2, 3, 64);
    first.store_into(&pair.b).await?;
    pair.b.commit(&fixture.keypair, fixture.nonce, first.top.clone()).await?;
    assert!(wait_for_latest(&pair.a, &fixture.head(), 1, WAIT).await.is_some());

    let second = ObjectTree::random(2, 2, 64);
    second.store_into(&pair.b).await?;
    let latest = pair.b.commit(&fixture.keypair, fixture.nonce, second.top.clone()).await?;

    assert_eq!(wait_for_latest(&pair.a, &fixture.head(), 2, WAIT).await, Some(latest));
    assert!(first.is_stored_in(&pair.a).await?);
    assert!(second.is_stored_in(&pair.a).await?);
    Ok(())
}

#[tokio::test]
async fn test_deferred_object_is_pushed() -> Result<()> {
    init_tracing();
    let mut config = fast_config();
    config.sync.object_timeout = Duration::from_secs(30);
    let pair = LinkedPair::new(config);
    let fixture = TestFixture::with_seed([23; 32]);

    // B holds a root whose tree lacks one leaf.
    let late = Bytes::from_static(b"arrives later");
    let present = pair.b.put_object(b"already here".to_vec()).await?;
    let dir = ObjectNode::new(vec![present, ObjectKey::of(&late)], b"dir".to_vec());
    let top = pair.b.put_node(&dir).await?;
    let root = fixture.make_root(1, vec![top]);
    pair.b.share(fixture.feed())?;
    pair.b.store().save_root(&root).await?;

    pair.a_conn.subscribe(fixture.feed()).await?;
    let late_key = ObjectKey::of(&late);
    assert!(wait_until(WAIT, || async { pair.b.registry().is_wanted(&late_key) }).await);
    assert_eq!(pair.a.fill_status(&fixture.head()), Some(FillStatus::InProgress));

    pair.b.put_object(late.clone()).await?;

    assert_eq!(wait_for_latest(&pair.a, &fixture.head(), 1, WAIT).await, Some(root));
    assert_eq!(pair.a.get_object(&late_key).await?, Some(late));
    Ok(())
}

#[tokio::test]
async fn test_filled_root_relays_to_downstream_subscriber() -> Result<()> {
    init_tracing();
    let config = fast_config();
    let publisher = memory_node(config.clone());
    let relay = memory_node(config.clone());
    let reader = memory_node(config);
    let fixture = TestFixture::with_seed([24; 32]);

    let tree = ObjectTree::three_level();
    tree.store_into(&publisher).await?;
    publisher.share(fixture.feed())?;

    // The reader subscribes to the relay before the relay has anything.
    let (reader_conn, _) = reader.connect_local(&relay);
    relay.share(fixture.feed())?;
    reader_conn.subscribe(fixture.feed()).await?;

    let (relay_conn, _) = relay.connect_local(&publisher);
    relay_conn.subscribe(fixture.feed()).await?;
    let published = publisher
        .commit(&fixture.keypair, fixture.nonce, tree.top.clone())
        .await?;

    assert_eq!(
        wait_for_latest(&reader, &fixture.head(), 1, WAIT).await,
        Some(published)
    );
    assert!(tree.is_stored_in(&reader).await?);
    Ok(())
}

#[tokio::test]
async fn test_sqlite_reader_keeps_filled_root() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("reader.db");
    let fixture = TestFixture::with_seed([25; 32]);
    let tree = ObjectTree::random(3, 2, 32);

    let published = {
        let publisher = memory_node(fast_config());
        let reader = Node::new(SqliteStore::open(&path)?, fast_config());
        tree.store_into(&publisher).await?;
        let published = publisher
            .commit(&fixture.keypair, fixture.nonce, tree.top.clone())
            .await?;

        let (conn, _) = reader.connect_local(&publisher);
        conn.subscribe(fixture.feed()).await?;
        assert!(wait_for_latest(&reader, &fixture.head(), 1, WAIT).await.is_some());
        reader.shutdown().await;
        publisher.shutdown().await;
        published
    };

    let reopened = SqliteStore::open(&path)?;
    assert_eq!(reopened.latest_root(&fixture.head()).await?, Some(published.clone()));
    assert!(reopened.missing_references(&published).await?.is_empty());
    Ok(())
}
