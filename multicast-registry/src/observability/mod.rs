//! Observability layer.
//!
//! Event names and field keys shared by every `tracing` call in the crate, so log
//! pipelines can match on stable identifiers. The library never installs a
//! subscriber; hosting binaries and tests do.

pub mod events;
pub mod fields;
