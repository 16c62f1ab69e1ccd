use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use arbor_core::ObjectNode;
use arbor_sync::{Frame, Message, RootAnnounce};
use arbor_testkit::{ObjectTree, TestFixture};

fn frames() -> Vec<(&'static str, Frame)> {
    let fixture = TestFixture::with_seed([9; 32]);
    let tree = ObjectTree::random(2, 16, 256);
    let root = fixture.make_root(1, tree.top.clone());

    let top = tree.get(&tree.top[0]).cloned().unwrap_or_default();
    let children = ObjectNode::refs_of(&top)
        .iter()
        .filter_map(|key| tree.get(key).cloned())
        .collect();

    vec![
        ("ok", Frame::new(2, 1, Message::Ok)),
        ("subscribe", Frame::new(1, 0, Message::Subscribe { feed: fixture.feed() })),
        (
            "root_announce",
            Frame::new(3, 0, Message::RootAnnounce(RootAnnounce::from_root(&root))),
        ),
        (
            "object_response",
            Frame::new(
                4,
                7,
                Message::ObjectResponse {
                    value: top,
                    additional: children,
                },
            ),
        ),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");
    for (name, frame) in frames() {
        group.bench_function(name, |b| b.iter(|| black_box(&frame).encode()));
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");
    for (name, frame) in frames() {
        let raw = frame.encode();
        group.bench_function(name, |b| {
            b.iter_batched(|| raw.clone(), |raw| Frame::decode(black_box(&raw)), BatchSize::SmallInput)
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
