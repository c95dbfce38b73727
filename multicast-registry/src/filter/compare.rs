//! Type-aware value comparisons used by predicate evaluation.
//!
//! Mismatched types never compare: a number is not equal to, less than, or greater
//! than a string. Timestamps compare against RFC 3339 string operands.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::metadata::MetadataValue;

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

pub(crate) fn values_equal(actual: &MetadataValue, expected: &MetadataValue) -> bool {
    match (actual, expected) {
        (MetadataValue::Timestamp(at), MetadataValue::String(raw)) => {
            parse_timestamp(raw).is_some_and(|expected| *at == expected)
        }
        _ => actual == expected,
    }
}

pub(crate) fn compare(actual: &MetadataValue, expected: &MetadataValue) -> Option<Ordering> {
    match (actual, expected) {
        (MetadataValue::Number(a), MetadataValue::Number(b)) => a.partial_cmp(b),
        (MetadataValue::String(a), MetadataValue::String(b)) => Some(a.cmp(b)),
        (MetadataValue::Timestamp(a), MetadataValue::Timestamp(b)) => Some(a.cmp(b)),
        (MetadataValue::Timestamp(a), MetadataValue::String(raw)) => {
            parse_timestamp(raw).map(|b| a.cmp(&b))
        }
        _ => None,
    }
}

pub(crate) fn starts_with(actual: &MetadataValue, prefix: &MetadataValue) -> bool {
    match (actual, prefix) {
        (MetadataValue::String(a), MetadataValue::String(p)) => a.starts_with(p.as_str()),
        _ => false,
    }
}

pub(crate) fn ends_with(actual: &MetadataValue, suffix: &MetadataValue) -> bool {
    match (actual, suffix) {
        (MetadataValue::String(a), MetadataValue::String(s)) => a.ends_with(s.as_str()),
        _ => false,
    }
}

/// Substring match on strings, membership on string arrays.
pub(crate) fn contains(actual: &MetadataValue, needle: &MetadataValue) -> bool {
    match (actual, needle) {
        (MetadataValue::String(a), MetadataValue::String(n)) => a.contains(n.as_str()),
        (MetadataValue::StringArray(items), MetadataValue::String(n)) => {
            items.iter().any(|item| item == n)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{compare, contains, values_equal};
    use crate::metadata::MetadataValue;
    use std::cmp::Ordering;

    #[test]
    fn numbers_and_strings_never_compare_across_types() {
        assert!(!values_equal(&MetadataValue::Number(1.0), &"1".into()));
        assert_eq!(compare(&MetadataValue::Number(1.0), &"2".into()), None);
    }

    #[test]
    fn strings_order_lexicographically() {
        assert_eq!(compare(&"apple".into(), &"banana".into()), Some(Ordering::Less));
    }

    #[test]
    fn timestamps_compare_against_rfc3339_operands() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let actual = MetadataValue::Timestamp(at);

        assert!(values_equal(&actual, &"2026-05-01T00:00:00Z".into()));
        assert_eq!(
            compare(&actual, &"2026-06-01T00:00:00Z".into()),
            Some(Ordering::Less)
        );
        assert_eq!(compare(&actual, &"not a time".into()), None);
    }

    #[test]
    fn contains_covers_substrings_and_array_membership() {
        let caps = MetadataValue::StringArray(vec!["temp".into(), "humidity".into()]);

        assert!(contains(&caps, &"temp".into()));
        assert!(!contains(&caps, &"tem".into()));
        assert!(contains(&"firmware-2.1".into(), &"re-2".into()));
    }
}
