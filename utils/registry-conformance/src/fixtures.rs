//! Deterministic dataset and filter expressions shared by conformance runs.

use multicast_registry::{metadata, Metadata, MetadataValue};
use serde_json::{json, Value};

fn tags(values: &[&str]) -> MetadataValue {
    MetadataValue::StringArray(values.iter().map(|tag| tag.to_string()).collect())
}

fn building(name: &str) -> MetadataValue {
    MetadataValue::Map(metadata([("building", name.into())]))
}

/// A small fleet mixing types, zones, numeric priorities, tags, and a nested
/// location map that some identities lack.
pub fn sensor_fleet() -> Vec<(String, Metadata)> {
    vec![
        (
            "svc-a".to_string(),
            metadata([
                ("type", "sensor".into()),
                ("zone", "1".into()),
                ("priority", MetadataValue::Number(1.0)),
                ("active", true.into()),
                ("tags", tags(&["outdoor", "battery"])),
                ("location", building("b1")),
            ]),
        ),
        (
            "svc-b".to_string(),
            metadata([
                ("type", "sensor".into()),
                ("zone", "2".into()),
                ("priority", MetadataValue::Number(3.0)),
                ("active", true.into()),
                ("tags", tags(&["indoor"])),
                ("location", building("b2")),
            ]),
        ),
        (
            "svc-c".to_string(),
            metadata([
                ("type", "actuator".into()),
                ("zone", "1".into()),
                ("priority", MetadataValue::Number(5.0)),
                ("active", false.into()),
            ]),
        ),
        (
            "svc-d".to_string(),
            metadata([
                ("type", "gateway".into()),
                ("zone", "3".into()),
                ("priority", MetadataValue::Number(2.0)),
                ("tags", tags(&["outdoor"])),
                ("location", building("b2")),
            ]),
        ),
        (
            "svc-e".to_string(),
            metadata([
                ("type", "sensor".into()),
                ("zone", "3".into()),
                ("active", false.into()),
            ]),
        ),
        (
            "svc-f".to_string(),
            metadata([
                ("type", "actuator".into()),
                ("zone", "2".into()),
                ("priority", MetadataValue::Number(4.0)),
                ("active", true.into()),
                ("tags", tags(&[])),
                ("location", building("b1")),
            ]),
        ),
        ("svc-g".to_string(), metadata([("type", "sensor".into())])),
        ("svc-h".to_string(), Metadata::new()),
    ]
}

/// Named filter expressions over [`sensor_fleet`], in the JSON filter syntax.
pub fn fleet_filters() -> Vec<(&'static str, Value)> {
    vec![
        ("match_all", json!({})),
        ("equality", json!({"type": "sensor"})),
        ("implicit_and", json!({"type": "sensor", "zone": "1"})),
        ("membership", json!({"zone.in": ["1", "2"]})),
        ("numeric_range", json!({"priority.gte": 2, "priority.lt": 5})),
        ("not_equal", json!({"type.ne": "sensor"})),
        ("prefix", json!({"type.startswith": "sens"})),
        ("suffix", json!({"type.endswith": "way"})),
        ("array_contains", json!({"tags.contains": "outdoor"})),
        ("nested_path", json!({"location.building": "b2"})),
        ("nested_absent", json!({"location.building.exists": false})),
        ("boolean", json!({"active": false})),
        (
            "disjunction",
            json!({"$or": [{"type": "gateway"}, {"active": false}]}),
        ),
        ("negation", json!({"$not": {"zone": "1"}})),
        (
            "nested_combinators",
            json!({"$and": [
                {"$or": [{"zone": "1"}, {"zone": "2"}]},
                {"$not": {"type": "actuator"}},
            ]}),
        ),
        ("no_match", json!({"type": "printer"})),
    ]
}
