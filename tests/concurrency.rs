//! Registration and percolation from many threads at once.

use std::sync::Arc;
use std::thread;

use percolator::{FieldType, Mapping, Percolator, PercolatorConfig, QueryBuilder};
use serde_json::json;

fn percolator() -> Arc<Percolator> {
    let mapping = Mapping::new()
        .with_field("status", FieldType::Keyword)
        .with_field("writer", FieldType::Integer);
    Arc::new(Percolator::new(PercolatorConfig::new().with_mapping(mapping)).expect("percolator"))
}

#[test]
fn concurrent_registrations_get_distinct_ids() {
    let p = percolator();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let p = Arc::clone(&p);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        p.register_query(&format!("t{t}-q{i}"), &QueryBuilder::term("status", format!("s{i}")))
                            .expect("register should succeed")
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 200);
    assert_eq!(p.len().unwrap(), 200);

    // Every writer registered one query per status value.
    let set = p.percolate(&json!({"status": "s7"})).unwrap();
    assert_eq!(set.len(), 8);
}

#[test]
fn percolation_sees_whole_registrations_only() {
    let p = percolator();
    p.register_query("stable", &QueryBuilder::term("status", "active"))
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let p = Arc::clone(&p);
            thread::spawn(move || {
                for i in 0..50 {
                    let name = format!("w{t}-{i}");
                    let source = json!({"query": {"bool": {"must": [
                        {"term": {"status": "active"}},
                        {"term": {"writer": t}}
                    ]}}});
                    p.register_source(&name, &source).expect("register should succeed");
                    if i % 3 == 0 {
                        p.unregister(&name).expect("unregister should succeed");
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let p = Arc::clone(&p);
            thread::spawn(move || {
                for _ in 0..100 {
                    let set = p
                        .percolate(&json!({"status": "active", "writer": 99}))
                        .expect("percolate should succeed");
                    // Writers' queries need writer == t; only the stable query matches.
                    assert_eq!(set.names().collect::<Vec<_>>(), vec!["stable"]);
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    // 50 per writer minus the 17 removed (i = 0, 3, ..., 48), plus "stable".
    assert_eq!(p.len().unwrap(), 4 * 33 + 1);
}
