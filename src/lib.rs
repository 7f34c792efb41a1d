// SPDX-License-Identifier: Apache-2.0

//! This library pages backward through ordered key-value child lists, such as the children of a
//! real-time database location. A [`Paginator`] keeps the entries loaded so far, oldest first, and
//! loads older entries in fixed-size batches, reporting each batch to a [`Listener`] on a
//! foreground execution context.
//!
//! Records are typed through [`Schema`]s declared with [`define_schema!`]. Storage sits behind the
//! [`OrderedCollection`] trait; [`MemoryCollection`] and [`RocksCollection`] are provided.
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod collection;
pub mod executor;
mod iterator;
mod metrics;
pub mod paginator;
pub mod query;
pub mod rocks;
pub mod schema;

mod config;

pub use config::{gen_rocksdb_options, PaginatorConfig, RocksdbConfig};

pub use crate::collection::{MemoryCollection, OrderedCollection, RemoteError};
pub use crate::executor::{ExecutionContext, Job, SerialQueue};
pub use crate::paginator::{
    Entry, Listener, LoadError, LoadResult, LoadTicket, LoadedBatch, Paginator,
};
pub use crate::query::{ChildKey, ChildValue, Query, RawChild};
pub use crate::rocks::RocksCollection;
pub use crate::schema::Schema;
pub use rocksdb;

use thiserror::Error;

fn with_error_logging<F, T, E: Into<anyhow::Error>>(f: F, name: &str) -> anyhow::Result<T>
where
    F: FnOnce() -> Result<T, E>,
{
    let result = f().map_err(|e| e.into());
    if let Err(e) = &result {
        tracing::error!("[backpager] error during {}: {}", name, e);
    }
    result
}

/// Errors reported synchronously by the [`Paginator`] API.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PagerError {
    /// `item` was called with an index outside `0..len`.
    #[error("index {index} is out of range for {len} entries")]
    #[allow(missing_docs)] // The fields' names are self-explanatory.
    IndexOutOfRange { index: usize, len: usize },
    /// `load_older_entries` was called with a batch size of zero.
    #[error("batch size must be positive")]
    ZeroBatchSize,
    /// `load_older_entries` was called with a batch size above the configured maximum.
    #[error("batch size {requested} exceeds the maximum of {max}")]
    #[allow(missing_docs)]
    BatchTooLarge { requested: usize, max: usize },
    /// The query handle given to the paginator already carries a limit.
    #[error("query handle must not be limited, found limit_to_last({limit})")]
    #[allow(missing_docs)]
    LimitedQuery { limit: usize },
    /// An execution context stopped accepting jobs.
    #[error("execution context {context} is closed")]
    #[allow(missing_docs)]
    ContextClosed { context: &'static str },
}

/// An error that occurred during (de)serialization of a [`Schema`]'s values.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Unable to deserialize a value because it has a different length than expected.
    #[error("Invalid value length. Expected {expected:}, got {got:}")]
    #[allow(missing_docs)] // The fields' names are self-explanatory.
    InvalidLength { expected: usize, got: usize },
    /// Some other error occurred when (de)serializing a value. Inspect
    /// the inner [`anyhow::Error`] for more details.
    #[error(transparent)]
    Wrapped(#[from] anyhow::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
