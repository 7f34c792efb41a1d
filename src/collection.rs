//! Client seam for ordered child lists.
//!
//! The paginator never talks to storage directly. It issues one-shot reads through
//! [`OrderedCollection`], which real-time database clients, [`MemoryCollection`] and
//! [`RocksCollection`](crate::rocks::RocksCollection) implement.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::query::{ChildKey, ChildValue, Query, RawChild};
use crate::schema::{Schema, ValueCodec};

/// Failure of a remote read.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The remote refused or cancelled the query, e.g. because of missing permissions.
    #[error("query on {path} was cancelled: {reason}")]
    Cancelled {
        /// Location of the query.
        path: String,
        /// Reason reported by the remote.
        reason: String,
    },
    /// Transport or storage failure.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// An ordered collection of child lists supporting one-shot windowed reads.
#[async_trait]
pub trait OrderedCollection: Send + Sync + 'static {
    /// Reads the window selected by `query` once, without subscribing to changes.
    /// Children are returned in ascending key order.
    async fn fetch_once(&self, query: &Query) -> Result<Vec<RawChild>, RemoteError>;
}

#[async_trait]
impl<C: OrderedCollection + ?Sized> OrderedCollection for Arc<C> {
    async fn fetch_once(&self, query: &Query) -> Result<Vec<RawChild>, RemoteError> {
        self.as_ref().fetch_once(query).await
    }
}

/// Selects the window of `query` out of a sorted child list.
pub(crate) fn select_window(
    children: &BTreeMap<ChildKey, ChildValue>,
    query: &Query,
) -> Vec<RawChild> {
    if query.is_inverted() {
        return Vec::new();
    }
    let lower = query.lower_bound().map_or(Bound::Unbounded, Bound::Included);
    let upper = query.upper_bound().map_or(Bound::Unbounded, Bound::Included);
    let range = children
        .range::<str, _>((lower, upper))
        .map(|(key, value)| RawChild::new(key.clone(), value.clone()));

    match query.limit() {
        Some(limit) => {
            let mut window: Vec<RawChild> = range.rev().take(limit).collect();
            window.reverse();
            window
        }
        None => range.collect(),
    }
}

/// Child lists held in memory.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    locations: RwLock<HashMap<String, BTreeMap<ChildKey, ChildValue>>>,
}

impl MemoryCollection {
    /// Create new empty [`MemoryCollection`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw value of child `key` under `path`.
    pub fn insert(&self, path: &str, key: impl Into<ChildKey>, value: impl Into<ChildValue>) {
        self.locations
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Encodes `value` and stores it as child `key` under `path`.
    pub fn insert_record<S: Schema>(
        &self,
        path: &str,
        key: impl Into<ChildKey>,
        value: &S::Value,
    ) -> anyhow::Result<()> {
        let bytes = <S::Value as ValueCodec<S>>::encode_value(value)?;
        self.insert(path, key, bytes);
        Ok(())
    }

    /// Number of children under `path`.
    pub fn len(&self, path: &str) -> usize {
        self.locations.read().get(path).map_or(0, BTreeMap::len)
    }

    /// `true` if `path` has no children.
    pub fn is_empty(&self, path: &str) -> bool {
        self.len(path) == 0
    }

    /// Reads the window of `query` synchronously.
    pub fn read_window(&self, query: &Query) -> Vec<RawChild> {
        self.locations
            .read()
            .get(query.path())
            .map(|children| select_window(children, query))
            .unwrap_or_default()
    }
}

#[async_trait]
impl OrderedCollection for MemoryCollection {
    async fn fetch_once(&self, query: &Query) -> Result<Vec<RawChild>, RemoteError> {
        Ok(self.read_window(query))
    }
}
