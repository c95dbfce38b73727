//! Routing layer.
//!
//! Turns a filter into the set of records it selects. Stores that evaluate filters
//! natively receive the filter; for the rest (or when a namespace forces it) the
//! resolver walks the full store and evaluates in-process. Both paths produce the
//! same result set and share one keyset pagination scheme.

pub(crate) mod target_resolution;

pub use target_resolution::EvaluationStrategy;
