//! Benchmarks for entity store merges

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use live_sync::model::{Event, EventLiveData, Market, Odd, Outcome, Status};
use live_sync::parser::FeedMessage;
use live_sync::store::EntityStore;

fn create_event(markets: usize) -> Event {
    let markets = (0..markets)
        .map(|m| Market {
            id: format!("M{}", m),
            name: format!("Market {}", m),
            is_tradable: true,
            is_main: m == 0,
            outcomes: (0..3)
                .map(|o| Outcome {
                    id: format!("M{}-O{}", m, o),
                    name: format!("Outcome {}", o),
                    odd: Odd::fraction(5, 2),
                    is_tradable: true,
                })
                .collect(),
        })
        .collect();

    Event {
        id: "E1".to_string(),
        home_participant: "Lions".to_string(),
        away_participant: "Tigers".to_string(),
        markets,
        ..Default::default()
    }
}

fn benchmark_store_event(c: &mut Criterion) {
    let event = create_event(50);

    c.bench_function("store_event_50_markets", |b| {
        b.iter(|| {
            let store = EntityStore::new();
            store.store_event(black_box(event.clone()));
        })
    });
}

fn benchmark_odd_update(c: &mut Criterion) {
    let store = EntityStore::new();
    store.store_event(create_event(50));
    let mut numerator = 1;

    c.bench_function("update_outcome_odd", |b| {
        b.iter(|| {
            numerator = numerator % 40 + 1;
            black_box(store.update_outcome_odd("M25-O1", Some(numerator), Some(4)));
        })
    });

    c.bench_function("update_outcome_odd_noop", |b| {
        b.iter(|| {
            black_box(store.update_outcome_odd("M25-O1", None, None));
        })
    });
}

fn benchmark_live_data(c: &mut Criterion) {
    let store = EntityStore::new();
    store.store_event(create_event(10));
    let mut minute = 0u32;

    c.bench_function("merge_live_data", |b| {
        b.iter(|| {
            minute = (minute + 1) % 90;
            let bundle = EventLiveData {
                status: Some(Status::InProgress("2nd half".to_string())),
                match_time: Some(format!("{}'", minute)),
                home_score: Some(1),
                away_score: Some(0),
            };
            black_box(store.merge_live_data("E1", &bundle));
        })
    });
}

fn benchmark_parse_frame(c: &mut Criterion) {
    let raw = r#"{"type":"content","contentId":{"type":"market","id":"M1"},
                  "delta":{"kind":"updateOutcomeOdd","outcomeId":"O1","numerator":"7","denominator":2}}"#;

    c.bench_function("parse_content_frame", |b| {
        b.iter(|| {
            black_box(FeedMessage::parse(black_box(raw)).ok());
        })
    });
}

criterion_group!(
    benches,
    benchmark_store_event,
    benchmark_odd_update,
    benchmark_live_data,
    benchmark_parse_frame
);
criterion_main!(benches);
