use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use percolator::{FieldType, Mapping, Percolator, PercolatorConfig};
use serde_json::{Value, json};
use std::hint::black_box;

const STATUSES: [&str; 8] = ["new", "open", "pending", "review", "blocked", "done", "closed", "archived"];

fn mapping() -> Mapping {
    Mapping::new()
        .with_field("status", FieldType::Keyword)
        .with_field("tag", FieldType::Keyword)
        .with_field("body", FieldType::Text)
        .with_field("age", FieldType::Integer)
}

/// Mix of verified terms, ranges, conjunctions and negations.
fn query_source(i: usize) -> Value {
    let status = STATUSES[i % STATUSES.len()];
    match i % 4 {
        0 => json!({"query": {"term": {"status": status}}}),
        1 => json!({"query": {"range": {"age": {"gte": i % 90, "lt": i % 90 + 10}}}}),
        2 => json!({"query": {"bool": {
            "must": [{"term": {"tag": format!("t{}", i % 500)}}],
            "must_not": [{"term": {"status": status}}]
        }}}),
        _ => json!({"query": {"match": {"body": format!("word{} word{}", i % 1000, (i + 7) % 1000)}}}),
    }
}

fn setup(query_count: usize) -> Percolator {
    let p = Percolator::new(PercolatorConfig::new().with_mapping(mapping())).expect("percolator");
    for i in 0..query_count {
        p.register_source(&format!("q{i}"), &query_source(i))
            .expect("register should succeed");
    }
    p
}

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("register");
    group.throughput(Throughput::Elements(1));
    let p = setup(1_000);
    let mut i = 0usize;
    group.bench_function("mixed", |b| {
        b.iter(|| {
            i += 1;
            p.register_source(black_box(&format!("bench{}", i % 10_000)), &query_source(i))
                .expect("register should succeed")
        })
    });
    group.finish();
}

fn bench_percolate(c: &mut Criterion) {
    let mut group = c.benchmark_group("percolate");
    let doc = json!({
        "status": "open",
        "tag": ["t1", "t42"],
        "body": "word1 word8 and some unrelated text",
        "age": 33
    });

    for &count in &[1_000usize, 10_000, 50_000] {
        let p = setup(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &doc, |b, doc| {
            b.iter(|| p.percolate(black_box(doc)).expect("percolate should succeed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_register, bench_percolate);
criterion_main!(benches);
