//! Throughput benchmarks for Huddle.
//!
//! These benchmarks measure the raw message throughput of the codecs and of
//! hub fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use huddle_core::{
    DisplayIdentity, Hub, HubConfig, HubHandle, Member, MemberId, Message, SlowMemberPolicy,
};
use huddle_protocol::{codec, WireMessage};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn frame(size: usize) -> WireMessage {
    WireMessage::new("x".repeat(size)).with_sender("Alice", "//www.gravatar.com/avatar/abc")
}

/// Benchmark frame encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for (label, size) in [("64B", 64), ("1KB", 1024), ("64KB", 65536)] {
        let frame = frame(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("json/{label}"), |b| {
            b.iter(|| codec::encode_json(black_box(&frame)))
        });
        group.bench_function(format!("msgpack/{label}"), |b| {
            b.iter(|| codec::encode(black_box(&frame)))
        });
    }

    group.finish();
}

/// Benchmark frame decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (label, size) in [("64B", 64), ("1KB", 1024), ("64KB", 65536)] {
        let frame = frame(size);

        let json = codec::encode_json(&frame).unwrap();
        group.throughput(Throughput::Bytes(json.len() as u64));
        group.bench_function(format!("json/{label}"), |b| {
            b.iter(|| codec::decode_json(black_box(&json)))
        });

        let msgpack = codec::encode(&frame).unwrap();
        group.throughput(Throughput::Bytes(msgpack.len() as u64));
        group.bench_function(format!("msgpack/{label}"), |b| {
            b.iter(|| codec::decode(black_box(&msgpack)))
        });
    }

    group.finish();
}

/// Start a hub with `size` members whose queues are drained by background tasks.
///
/// Returns the first member's id to broadcast from; only members can send.
fn room(rt: &Runtime, size: usize, slow_member: SlowMemberPolicy) -> (HubHandle, MemberId) {
    rt.block_on(async {
        let hub = Hub::spawn(HubConfig {
            slow_member,
            ..Default::default()
        });
        let mut first = None;
        for i in 0..size {
            let identity = DisplayIdentity::new(format!("user-{i}"), "", format!("u{i}"));
            let (member, mut outbox) = Member::new(identity, hub.member_queue_capacity());
            first.get_or_insert(member.id());
            hub.join(member).await.unwrap();
            tokio::spawn(async move { while outbox.recv().await.is_some() {} });
        }
        (hub, first.unwrap())
    })
}

/// Benchmark fan-out to every member of the room.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let rt = Runtime::new().unwrap();
    let sender = DisplayIdentity::new("Alice", "", "alice");

    for size in [10usize, 100, 1000] {
        let (hub, from) = room(&rt, size, SlowMemberPolicy::Block);
        let message = Arc::new(Message::received("hello room", &sender));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    hub.broadcast(from, Arc::clone(&message)).await.unwrap();
                    // Stats is answered after the broadcast has been fanned out
                    black_box(hub.stats().await.unwrap())
                })
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out when members may be skipped instead of awaited.
fn bench_fanout_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_drop");
    let rt = Runtime::new().unwrap();
    let sender = DisplayIdentity::new("Alice", "", "alice");
    let size = 1000;

    let (hub, from) = room(&rt, size, SlowMemberPolicy::Drop);
    let message = Arc::new(Message::received("hello room", &sender));

    group.throughput(Throughput::Elements(size as u64));
    group.bench_function(BenchmarkId::from_parameter(size), |b| {
        b.iter(|| {
            rt.block_on(async {
                hub.broadcast(from, Arc::clone(&message)).await.unwrap();
                black_box(hub.stats().await.unwrap())
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_fanout, bench_fanout_drop);
criterion_main!(benches);
