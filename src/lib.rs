//! Columnar bitmap-index engine.
//!
//! # Introduction
//!
//! An index answers range, equality, discrete-set, and join predicates over
//! one column of an append-only table by mapping column values to
//! compressed bitvectors and combining them with OR/AND/ANDNOT. The layers,
//! leaves first:
//!
//! | Layer | Responsibility |
//! | --- | --- |
//! | [`bitvector`] | Run-length-compressed bitset: the unit every encoding is built from. |
//! | [`offsets`] | Locates each bitvector within a serialized bitmap region. |
//! | [`store`] | Materializes bitvectors on demand from a file, a memory map, or a caller callback. |
//! | [`combine`] | Sums/ANDs many bitvectors, choosing a strategy from their measured sizes. |
//! | [`bins`] | Divides a value histogram into bin boundaries for binned encodings. |
//! | [`column`] / [`predicate`] / [`extractor`] | The value-extraction façade and predicate types the encodings evaluate. |
//! | [`encoding`] | The concrete index encodings (equality, range, interval, …). |
//! | [`factory`] | Recognizes an on-disk index, or builds one from an index-spec string. |
//! | [`config`] | Typed lookup over the flat key-value configuration table [`factory`] consults. |
//!
//! [`context`] threads an explicit, cheaply-cloned query context (verbosity,
//! cancellation, counters) through the layers above instead of relying on
//! global mutable state. [`error`] is the shared error taxonomy every public
//! entry point returns.

pub mod bins;
pub mod bitvector;
pub mod column;
pub mod combine;
pub mod config;
pub mod context;
pub mod encoding;
pub mod error;
pub mod extractor;
pub mod factory;
pub mod offsets;
pub mod predicate;
pub mod store;

pub use context::Context;
pub use error::{IbisError, Result};
