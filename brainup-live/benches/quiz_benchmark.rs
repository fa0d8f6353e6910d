use brainup_live::protocol::{ClientFrame, ServerFrame};
use brainup_live::store::{QuizRules, ResolvedWrite, Tree, WriteRules};
use brainup_live::{
    rank_standings, MemoryStore, Participant, RosterSnapshot, ScoresSnapshot, StorePath, UserId,
    Value, WriteBatch,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;

fn path(s: &str) -> StorePath {
    StorePath::parse(s).unwrap()
}

fn answer_batch() -> WriteBatch {
    WriteBatch::new()
        .require_eq(path("sessions/123456/finished"), Some(Value::Bool(false)))
        .require_eq(path("sessions/123456/currentQuestionIndex"), Some(Value::Int(3)))
        .require_absent(path("sessions/123456/answers/3/bob"))
        .require_eq(path("sessions/123456/scores/bob"), Some(Value::Int(2)))
        .set(
            path("sessions/123456/answers/3/bob"),
            Value::map([("correct", Value::Bool(true)), ("option", Value::Int(1))]),
        )
        .set(path("sessions/123456/scores/bob"), 3u32)
}

fn bench_frame_encode(c: &mut Criterion) {
    let frame = ClientFrame::Apply {
        id: 42,
        batch: answer_batch(),
    };
    c.bench_function("apply_frame_encode", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut scores = BTreeMap::new();
    for i in 0..50 {
        scores.insert(format!("player{i}"), Value::Int(i));
    }
    let encoded = ServerFrame::Update {
        subscription: 7,
        value: Some(Value::Map(scores)),
    }
    .encode()
    .unwrap();
    c.bench_function("scores_update_decode_50", |b| {
        b.iter(|| black_box(ServerFrame::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_rank_standings(c: &mut Criterion) {
    let roster = RosterSnapshot {
        entries: (0..200)
            .map(|i| Participant {
                entry_id: format!("{i:08}"),
                identity: UserId::new(format!("player{i}")),
                display_name: format!("Player {i}"),
                joined_at: i,
            })
            .collect(),
    };
    let scores = ScoresSnapshot {
        scores: (0..200)
            .map(|i| (UserId::new(format!("player{i}")), (i % 17) as u32))
            .collect(),
    };
    c.bench_function("rank_standings_200", |b| {
        b.iter(|| black_box(rank_standings(black_box(&roster), black_box(&scores))))
    });
}

fn bench_rules_check(c: &mut Criterion) {
    let mut tree = Tree::new();
    tree.set(
        &path("sessions/123456"),
        Some(Value::map([
            ("hostId", Value::from("alice")),
            ("started", Value::Bool(true)),
            ("finished", Value::Bool(false)),
            ("currentQuestionIndex", Value::Int(3)),
        ])),
    );
    let writes = vec![
        ResolvedWrite {
            path: path("sessions/123456/answers/3/bob"),
            value: Some(Value::map([("correct", Value::Bool(true))])),
            pushed: false,
        },
        ResolvedWrite {
            path: path("sessions/123456/scores/bob"),
            value: Some(Value::Int(3)),
            pushed: false,
        },
    ];
    let caller = UserId::new("bob");
    c.bench_function("quiz_rules_answer_batch", |b| {
        b.iter(|| QuizRules.check(black_box(&caller), black_box(&tree), black_box(&writes)))
    });
}

fn bench_memory_commit(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let store = MemoryStore::unguarded();
    let handle = store.handle("bench");
    let mut n = 0u64;

    c.bench_function("memory_store_commit", |b| {
        b.iter(|| {
            n += 1;
            let batch = WriteBatch::new().set(path(&format!("bench/{}", n % 1000)), n);
            runtime.block_on(handle.apply(batch)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_rank_standings,
    bench_rules_check,
    bench_memory_commit,
);
criterion_main!(benches);
