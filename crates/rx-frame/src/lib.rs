//! # rx-frame
//!
//! Columnar data layer for the rx misID estimator.
//!
//! This crate provides:
//! - [`EventTable`], a structure-of-arrays table with numeric and label columns.
//! - Cut expressions: [`CutTemplate`] (with a per-leg slot) and composable [`Predicate`]s.
//! - Parquet read/write of tables via Arrow.
//! - Injected table sources ([`TableSource`]) and result caches ([`CacheStore`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod expr;
pub mod parquet_io;
pub mod source;
pub mod table;

pub use cache::{CacheKey, CacheKeyBuilder, CacheStats, CacheStore, MemoryCache, ParquetCache};
pub use expr::{CutTemplate, LEG_SLOT, Predicate};
pub use source::{InMemorySource, ParquetSource, TableSource};
pub use table::{Column, EventTable, HADRON_COLUMN, KIND_COLUMN, WEIGHT_COLUMN};
