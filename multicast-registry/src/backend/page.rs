//! In-process sort and keyset pagination shared by store bindings and the
//! engine-side evaluation path.

use super::cursor::{self, SortPosition};
use super::{PageRequest, RegistrationRecord, ScanPage, SortKey};
use crate::error::RegistryError;

/// Sorts `records` and cuts the page that follows `page.cursor`.
pub(crate) fn paginate(
    records: Vec<RegistrationRecord>,
    page: &PageRequest,
    sort: SortKey,
) -> Result<ScanPage, RegistryError> {
    let after = page
        .cursor
        .as_deref()
        .map(|token| cursor::decode(token, sort))
        .transpose()?;

    let total_count = records.len();
    let mut keyed: Vec<(SortPosition, RegistrationRecord)> = records
        .into_iter()
        .map(|record| (SortPosition::of(&record, sort), record))
        .collect();
    keyed.sort_by(|(left, _), (right, _)| left.cmp(right));

    let start = match &after {
        Some(position) => keyed.partition_point(|(key, _)| key <= position),
        None => 0,
    };
    let limit = page.effective_limit();
    let mut remaining = keyed.into_iter().skip(start);
    let page_records: Vec<(SortPosition, RegistrationRecord)> =
        remaining.by_ref().take(limit).collect();

    let next_cursor = match (remaining.next(), page_records.last()) {
        (Some(_), Some((position, _))) => Some(cursor::encode(sort, position.clone())),
        _ => None,
    };

    Ok(ScanPage {
        records: page_records.into_iter().map(|(_, record)| record).collect(),
        next_cursor,
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::paginate;
    use crate::backend::{PageRequest, RegistrationRecord, SortKey};
    use crate::metadata::Metadata;
    use chrono::{Duration, Utc};

    fn records(identities: &[&str]) -> Vec<RegistrationRecord> {
        identities
            .iter()
            .map(|id| RegistrationRecord::new(id, Metadata::new(), Utc::now()))
            .collect()
    }

    #[test]
    fn pages_walk_all_records_once_in_order() {
        let all = records(&["d", "a", "c", "e", "b"]);

        let first = paginate(all.clone(), &PageRequest::first(2), SortKey::Identity).unwrap();
        assert_eq!(first.total_count, 5);
        let ids: Vec<_> = first.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let cursor = first.next_cursor.expect("more pages");
        let second = paginate(all.clone(), &PageRequest::after(cursor, 2), SortKey::Identity)
            .unwrap();
        let ids: Vec<_> = second.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let cursor = second.next_cursor.expect("more pages");
        let last = paginate(all, &PageRequest::after(cursor, 2), SortKey::Identity).unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.next_cursor, None);
    }

    #[test]
    fn cursor_survives_removal_of_the_last_seen_record() {
        let all = records(&["a", "b", "c", "d"]);
        let first = paginate(all.clone(), &PageRequest::first(2), SortKey::Identity).unwrap();
        let cursor = first.next_cursor.unwrap();

        let without_b: Vec<_> = all.into_iter().filter(|r| r.identity != "b").collect();
        let second = paginate(without_b, &PageRequest::after(cursor, 2), SortKey::Identity)
            .unwrap();

        let ids: Vec<_> = second.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn registered_at_sort_breaks_ties_by_identity() {
        let at = Utc::now();
        let mut all = records(&["b", "a", "c"]);
        all[0].registered_at = at;
        all[1].registered_at = at;
        all[2].registered_at = at - Duration::seconds(10);

        let page = paginate(all, &PageRequest::first(10), SortKey::RegisteredAt).unwrap();

        let ids: Vec<_> = page.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
