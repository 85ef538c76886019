use std::{hint::black_box, sync::Arc};

use corvid_db::{Collection, Document, FindOptions, IndexOptions, Store};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng as _;
use serde_json::json;

const MAJORS: [&str; 6] = ["Physics", "Mathematics", "Chemistry", "Biology", "History", "Art"];

async fn setup_collection(size: usize, indexed: bool) -> Arc<Collection> {
    let store = Store::new();
    let collection = store.collection("bench_students").await.unwrap();
    if indexed {
        collection
            .create_index(
                &Document::from_json(json!({"major": 1, "gpa": -1})).unwrap(),
                IndexOptions::default(),
            )
            .await
            .unwrap();
    }
    let mut rng = rand::thread_rng();
    let documents = (0 .. size)
        .map(|n| {
            let major = MAJORS[rng.gen_range(0 .. MAJORS.len())];
            let gpa: f64 = rng.gen_range(2.0 .. 4.0);
            Document::from_json(json!({
                "student_id": n,
                "name": format!("Student {}", n),
                "major": major,
                "gpa": gpa,
            }))
            .unwrap()
        })
        .collect();
    collection.insert_many(documents).await.unwrap();
    collection
}

fn bench_find(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let filter = Document::from_json(json!({"major": "Physics", "gpa": {"$gte": 3.5}})).unwrap();

    let mut group = c.benchmark_group("find_major_gpa");
    for size in [1_000_usize, 10_000] {
        for indexed in [false, true] {
            let collection = rt.block_on(setup_collection(size, indexed));
            let label = if indexed { "indexed" } else { "scan" };
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, _| {
                b.iter(|| {
                    rt.block_on(async {
                        let cursor = collection
                            .find(black_box(&filter), FindOptions::new())
                            .await
                            .unwrap();
                        black_box(cursor.count());
                    });
                });
            });
        }
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let collection = rt.block_on(setup_collection(10_000, false));
    let stages = [
        Document::from_json(json!({"$group": {"_id": "$major", "avg": {"$avg": "$gpa"}, "count": {"$sum": 1}}})).unwrap(),
        Document::from_json(json!({"$sort": {"avg": -1}})).unwrap(),
    ];

    c.bench_function("aggregate_group_by_major", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(collection.aggregate(black_box(&stages)).await.unwrap());
            });
        });
    });
}

criterion_group!(benches, bench_find, bench_aggregate);
criterion_main!(benches);
