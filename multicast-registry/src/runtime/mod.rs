//! Runtime integration layer.
//!
//! Isolates background-task ownership and retry timing so async behavior stays
//! localized: the sweeper and redelivery loops run as owned tasks with an explicit
//! stop handle, and idempotent store reads go through one bounded backoff helper.

pub(crate) mod background;
pub mod retry;
