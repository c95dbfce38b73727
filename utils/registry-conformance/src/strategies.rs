//! `proptest` strategies over a small field vocabulary.
//!
//! Values are drawn from narrow domains so generated filters hit real matches
//! as well as misses, type mismatches, and absent fields.

use chrono::{DateTime, Utc};
use multicast_registry::{Filter, Metadata, MetadataValue, Operator};
use proptest::collection::vec;
use proptest::prelude::*;

const TYPES: [&str; 4] = ["sensor", "actuator", "gateway", "sensor-array"];
const ZONES: [&str; 3] = ["1", "2", "3"];
const TAGS: [&str; 3] = ["outdoor", "indoor", "battery"];
const BUILDINGS: [&str; 2] = ["b1", "b2"];
const SEEN: [&str; 3] = [
    "2026-05-01T00:00:00Z",
    "2026-05-02T12:00:00Z",
    "2026-05-03T00:00:00Z",
];
/// The same instants as [`SEEN`] and one in between, written with other offsets.
const SEEN_LITERALS: [&str; 4] = [
    "2026-05-01T02:00:00+02:00",
    "2026-05-02T08:00:00-04:00",
    "2026-05-02T00:00:00Z",
    "2026-05-03T00:00:00Z",
];

/// Limits generated filters stay within, matching the namespace defaults.
pub const MAX_GENERATED_DEPTH: usize = 5;
pub const MAX_GENERATED_CLAUSES: usize = 20;

fn one_of_str(values: &'static [&'static str]) -> impl Strategy<Value = String> {
    proptest::sample::select(values).prop_map(str::to_string)
}

fn priority() -> impl Strategy<Value = f64> {
    (0u8..6).prop_map(f64::from)
}

fn seen() -> impl Strategy<Value = DateTime<Utc>> {
    one_of_str(&SEEN).prop_filter_map("RFC 3339 literal", |raw| raw.parse::<DateTime<Utc>>().ok())
}

fn field_value(field: &'static str) -> BoxedStrategy<MetadataValue> {
    match field {
        "seen" => prop_oneof![
            3 => seen().prop_map(MetadataValue::Timestamp),
            // Text that merely looks like a timestamp stays a string.
            1 => one_of_str(&SEEN).prop_map(MetadataValue::String),
        ]
        .boxed(),
        "type" => one_of_str(&TYPES).prop_map(MetadataValue::String).boxed(),
        "zone" => prop_oneof![
            4 => one_of_str(&ZONES).prop_map(MetadataValue::String),
            // A numeric zone never equals its string form.
            1 => (1u8..4).prop_map(|zone| MetadataValue::Number(f64::from(zone))),
        ]
        .boxed(),
        "priority" => priority().prop_map(MetadataValue::Number).boxed(),
        "active" => any::<bool>().prop_map(MetadataValue::Bool).boxed(),
        "tags" => proptest::sample::subsequence(TAGS.to_vec(), 0..=TAGS.len())
            .prop_map(|tags| {
                MetadataValue::StringArray(tags.into_iter().map(str::to_string).collect())
            })
            .boxed(),
        _ => one_of_str(&BUILDINGS)
            .prop_map(|building| {
                let mut location = Metadata::new();
                location.insert("building".to_string(), MetadataValue::String(building));
                MetadataValue::Map(location)
            })
            .boxed(),
    }
}

/// Metadata with any subset of `type`, `zone`, `priority`, `active`, `tags`, `seen`,
/// and `location.building`.
pub fn arb_metadata() -> impl Strategy<Value = Metadata> {
    let fields = ["type", "zone", "priority", "active", "tags", "seen", "location"];
    fields
        .into_iter()
        .map(|field| proptest::option::of(field_value(field)).prop_map(move |value| (field, value)))
        .collect::<Vec<_>>()
        .prop_map(|entries| {
            entries
                .into_iter()
                .filter_map(|(field, value)| value.map(|value| (field.to_string(), value)))
                .collect::<Metadata>()
        })
}

/// Between zero and `max` identities named `id-000`, `id-001`, ...
pub fn arb_dataset(max: usize) -> impl Strategy<Value = Vec<(String, Metadata)>> {
    vec(arb_metadata(), 0..=max).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(index, metadata)| (format!("id-{index:03}"), metadata))
            .collect::<Vec<_>>()
    })
}

fn arb_predicate() -> impl Strategy<Value = Filter> {
    prop_oneof![
        one_of_str(&TYPES).prop_map(|value| Filter::eq("type", value)),
        one_of_str(&ZONES).prop_map(|value| Filter::ne("zone", value)),
        vec(one_of_str(&ZONES), 1..3).prop_map(|values| Filter::one_of("zone", values)),
        (
            proptest::sample::select(vec![Operator::Lt, Operator::Lte, Operator::Gt, Operator::Gte]),
            priority(),
        )
            .prop_map(|(op, bound)| Filter::compare("priority", op, bound)),
        priority().prop_map(|value| Filter::eq("priority", value)),
        any::<bool>().prop_map(|value| Filter::eq("active", value)),
        proptest::sample::select(vec!["sens", "act", "gate"])
            .prop_map(|prefix| Filter::compare("type", Operator::StartsWith, prefix)),
        proptest::sample::select(vec!["or", "way", "array"])
            .prop_map(|suffix| Filter::compare("type", Operator::EndsWith, suffix)),
        one_of_str(&TAGS).prop_map(|tag| Filter::compare("tags", Operator::Contains, tag)),
        one_of_str(&BUILDINGS).prop_map(|building| Filter::eq("location.building", building)),
        one_of_str(&SEEN_LITERALS).prop_map(|at| Filter::eq("seen", at)),
        (
            proptest::sample::select(vec![Operator::Lt, Operator::Lte, Operator::Gt, Operator::Gte]),
            one_of_str(&SEEN_LITERALS),
        )
            .prop_map(|(op, at)| Filter::compare("seen", op, at)),
        seen().prop_map(|at| Filter::compare("seen", Operator::Gte, MetadataValue::Timestamp(at))),
        (
            proptest::sample::select(vec!["type", "zone", "tags", "seen", "location.building"]),
            any::<bool>(),
        )
            .prop_map(|(field, present)| Filter::exists(field, present)),
    ]
}

/// Filter trees within [`MAX_GENERATED_DEPTH`] and [`MAX_GENERATED_CLAUSES`].
pub fn arb_filter() -> impl Strategy<Value = Filter> {
    arb_predicate()
        .prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                vec(inner.clone(), 1..4).prop_map(Filter::and),
                vec(inner.clone(), 1..4).prop_map(Filter::or),
                inner.prop_map(Filter::not),
            ]
        })
        .prop_filter("filter within default limits", |filter| {
            filter.depth() <= MAX_GENERATED_DEPTH && filter.clause_count() <= MAX_GENERATED_CLAUSES
        })
}
