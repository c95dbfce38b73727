//! Opaque keyset cursors.
//!
//! A cursor encodes the sort position of the last record a page returned. The next
//! page starts strictly after that position, so concurrent inserts and deletes never
//! shift records across page boundaries the way offsets would.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{RegistrationRecord, SortKey};
use crate::error::RegistryError;

/// Totally ordered position of a record under one [`SortKey`].
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub(crate) struct SortPosition {
    /// `(seconds, nanos)` of the sort timestamp; `None` when sorting by identity.
    primary: Option<(i64, u32)>,
    identity: String,
}

impl SortPosition {
    pub(crate) fn of(record: &RegistrationRecord, sort: SortKey) -> Self {
        let primary = match sort {
            SortKey::Identity => None,
            SortKey::RegisteredAt => Some((
                record.registered_at.timestamp(),
                record.registered_at.timestamp_subsec_nanos(),
            )),
            // Records that never expire sort last.
            SortKey::ExpiresAt => Some(
                record
                    .expires_at
                    .map(|at| (at.timestamp(), at.timestamp_subsec_nanos()))
                    .unwrap_or((i64::MAX, 0)),
            ),
        };
        Self {
            primary,
            identity: record.identity.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CursorToken {
    sort: SortKey,
    position: SortPosition,
}

pub(crate) fn encode(sort: SortKey, position: SortPosition) -> String {
    let token = CursorToken { sort, position };
    // Serializing plain derives cannot fail.
    let json = serde_json::to_vec(&token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub(crate) fn decode(cursor: &str, sort: SortKey) -> Result<SortPosition, RegistryError> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| RegistryError::invalid_argument("malformed pagination cursor"))?;
    let token: CursorToken = serde_json::from_slice(&raw)
        .map_err(|_| RegistryError::invalid_argument("malformed pagination cursor"))?;
    if token.sort != sort {
        return Err(RegistryError::invalid_argument(
            "pagination cursor was issued for a different sort order",
        ));
    }
    Ok(token.position)
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, SortPosition};
    use crate::backend::{RegistrationRecord, SortKey};
    use crate::error::RegistryCode;
    use crate::metadata::Metadata;
    use chrono::Utc;

    #[test]
    fn cursor_is_bound_to_its_sort_order() {
        let record = RegistrationRecord::new("svc-a", Metadata::new(), Utc::now());
        let cursor = encode(
            SortKey::RegisteredAt,
            SortPosition::of(&record, SortKey::RegisteredAt),
        );

        assert!(decode(&cursor, SortKey::RegisteredAt).is_ok());
        let err = decode(&cursor, SortKey::Identity).unwrap_err();
        assert_eq!(err.code, RegistryCode::InvalidArgument);
    }

    #[test]
    fn garbage_cursor_is_invalid_argument() {
        let err = decode("!!not-base64!!", SortKey::Identity).unwrap_err();

        assert_eq!(err.code, RegistryCode::InvalidArgument);
    }

    #[test]
    fn non_expiring_records_sort_after_expiring_ones() {
        let now = Utc::now();
        let forever = RegistrationRecord::new("a", Metadata::new(), now);
        let expiring = RegistrationRecord::new("b", Metadata::new(), now)
            .with_expiry(std::time::Duration::from_secs(5), now);

        assert!(
            SortPosition::of(&expiring, SortKey::ExpiresAt)
                < SortPosition::of(&forever, SortKey::ExpiresAt)
        );
    }
}
