//! Property tests for diffing and timeline bookkeeping.

use proptest::prelude::*;
use serde_json::{json, Value};
use statetrail::{
    diff::deep_equals, diff_values, CaptureInput, RecordId, Timeline, TimelineConfig,
};

fn finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("finite", |f| f.is_finite())
}

/// JSON trees with scalar leaves. Nulls are left out: the diff treats them
/// as absent.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        finite_f64().prop_map(|f| json!(f)),
        "[a-z]{0,6}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn diff_of_equal_values_is_empty(value in arb_json()) {
        prop_assert!(diff_values(&value, &value.clone(), 1000).is_empty());
    }

    #[test]
    fn diff_is_deterministic(a in arb_json(), b in arb_json()) {
        prop_assert_eq!(diff_values(&a, &b, 1000), diff_values(&a, &b, 1000));
    }

    #[test]
    fn diff_respects_cap(a in arb_json(), b in arb_json(), cap in 0usize..5) {
        prop_assert!(diff_values(&a, &b, cap).len() <= cap);
    }

    #[test]
    fn unequal_values_produce_entries(a in arb_json(), b in arb_json()) {
        prop_assume!(!deep_equals(&a, &b));
        prop_assert!(!diff_values(&a, &b, 1000).is_empty());
    }

    #[test]
    fn timeline_never_exceeds_capacity(capacity in 1usize..8, captures in 0usize..30) {
        let timeline = Timeline::new(TimelineConfig::with_max_records(capacity)).unwrap();
        for i in 0..captures {
            timeline.capture(CaptureInput::update("o", format!("c{}", i)));
            prop_assert!(timeline.len() <= capacity);
        }
        prop_assert_eq!(timeline.len(), captures.min(capacity));
    }

    #[test]
    fn ids_strictly_increase(origins in prop::collection::vec("[abc]", 1..20)) {
        let timeline = Timeline::new(TimelineConfig::with_max_records(5)).unwrap();
        for origin in &origins {
            let input = CaptureInput::update(origin.as_str(), "s").with_state(json!({"o": origin}));
            timeline.capture(input);
        }
        let ids: Vec<RecordId> = timeline.records().iter().map(|r| r.id).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(timeline.last_id(), RecordId(origins.len() as u64));
    }

    #[test]
    fn export_import_preserves_records(
        captures in prop::collection::vec(
            (
                arb_json(),
                prop::collection::btree_map("[a-c]", finite_f64(), 0..3),
                prop::collection::vec("[a-z]{1,5}", 0..3),
                any::<bool>(),
            ),
            0..6,
        )
    ) {
        let source = Timeline::new(TimelineConfig::with_max_records(10)).unwrap();
        for (state, metrics, tags, pinned) in &captures {
            let input = CaptureInput::update("o", "s")
                .with_state(state.clone())
                .with_tags(tags.clone());
            let record = source.capture(input).unwrap();
            source.merge_metrics(record.id, metrics.clone()).unwrap();
            if *pinned {
                source.pin(record.id).unwrap();
            }
        }
        let text = serde_json::to_string(&source.export_session(None)).unwrap();

        let target = Timeline::new(TimelineConfig::with_max_records(10)).unwrap();
        let summary = target.import_json(&text).unwrap();
        prop_assert_eq!(summary.imported, captures.len());
        prop_assert_eq!(summary.skipped, 0);
        prop_assert_eq!(target.records(), source.records());
        prop_assert_eq!(target.pinned_ids(), source.pinned_ids());
    }
}
