//! Backward pagination over an ordered child list.
//!
//! A [`Paginator`] holds the entries loaded so far, oldest first. Each call to
//! [`Paginator::load_older_entries`] fetches up to `n` entries older than the current oldest one
//! and prepends them. Once the sequence is non-empty the fetch re-reads the current oldest entry
//! (`end_at(oldest).limit_to_last(n + 1)`) to anchor the cursor; that boundary duplicate is
//! dropped before merging.
//!
//! Fetches run on the background [`ExecutionContext`], notifications on the foreground one.
//! The background context runs one job at a time and a load job only finishes once its batch
//! is merged, so loads issued back to back are applied in issue order.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::collection::{OrderedCollection, RemoteError};
use crate::config::PaginatorConfig;
use crate::executor::ExecutionContext;
use crate::metrics::{
    PAGER_BOUNDARY_DUPLICATES, PAGER_ENTRIES_LOADED, PAGER_LOAD_FAILURES,
    PAGER_LOAD_LATENCY_SECONDS,
};
use crate::query::{ChildKey, Query, RawChild};
use crate::schema::{Schema, ValueCodec};
use crate::{CodecError, PagerError};

/// One loaded child: its key and decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<V> {
    /// Key of the child.
    pub key: ChildKey,
    /// Decoded record.
    pub value: V,
}

/// Outcome of a successful backward load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedBatch {
    /// Number of entries held when the load was issued.
    pub original_count: usize,
    /// Number of net new entries prepended by the load.
    pub loaded_count: usize,
}

/// Why a backward load ended without merging a batch.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The collection failed or cancelled the fetch.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// A child could not be decoded into the record type.
    #[error("failed to decode child {key}: {source}")]
    Codec {
        /// Key of the offending child.
        key: ChildKey,
        /// Codec failure.
        source: CodecError,
    },
    /// The fetched batch was not strictly ascending or not older than the loaded entries.
    #[error("child {key} breaks the key order of the loaded entries")]
    OutOfOrder {
        /// First key out of order.
        key: ChildKey,
    },
    /// The paginator was reset while the fetch was in flight; the batch was discarded.
    #[error("paginator was reset while the load was in flight")]
    Reset,
    /// Another load moved the oldest entry while this one was in flight. Only possible when the
    /// background context runs jobs concurrently.
    #[error("another load changed the oldest entry while this load was in flight")]
    Overlapped,
    /// The load job was dropped before it delivered an outcome.
    #[error("load was abandoned before completing")]
    Abandoned,
}

impl LoadError {
    fn reason(&self) -> &'static str {
        match self {
            LoadError::Remote(RemoteError::Cancelled { .. }) => "cancelled",
            LoadError::Remote(RemoteError::Failed(_)) => "remote",
            LoadError::Codec { .. } => "codec",
            LoadError::OutOfOrder { .. } => "out_of_order",
            LoadError::Reset => "reset",
            LoadError::Overlapped => "overlapped",
            LoadError::Abandoned => "abandoned",
        }
    }
}

/// Outcome of a backward load.
pub type LoadResult = Result<LoadedBatch, LoadError>;

/// Receives load notifications on the foreground context.
pub trait Listener: Send + Sync {
    /// `original_count` entries were held when the load was issued; `loaded_count` older
    /// entries were prepended.
    fn on_older_entries_loaded(&self, original_count: usize, loaded_count: usize);

    /// The load failed and nothing was merged.
    fn on_load_failed(&self, _error: &LoadError) {}
}

impl<F> Listener for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_older_entries_loaded(&self, original_count: usize, loaded_count: usize) {
        self(original_count, loaded_count)
    }
}

/// Per-call completion handle returned by [`Paginator::load_older_entries`].
/// Dropping it does not affect the load.
#[derive(Debug)]
pub struct LoadTicket {
    receiver: oneshot::Receiver<LoadResult>,
}

impl LoadTicket {
    /// Waits for the outcome, which is delivered right after the listener has been notified.
    pub async fn wait(self) -> LoadResult {
        self.receiver.await.unwrap_or(Err(LoadError::Abandoned))
    }
}

/// Loaded entries plus the reset generation they belong to.
#[derive(Debug)]
struct EntrySequence<V> {
    entries: Vec<Entry<V>>,
    generation: u64,
}

impl<V> EntrySequence<V> {
    fn oldest_key(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.key.as_str())
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }
}

/// Where a load starts, captured when its fetch is issued.
struct Cursor {
    query: Query,
    boundary: Option<ChildKey>,
    original_count: usize,
    generation: u64,
}

struct Shared<S: Schema, C> {
    config: PaginatorConfig,
    query: Query,
    collection: C,
    foreground: Arc<dyn ExecutionContext>,
    sequence: Mutex<EntrySequence<S::Value>>,
    listener: RwLock<Option<Arc<dyn Listener>>>,
}

/// Loads older entries of an ordered child list in batches. See the [module docs](self).
pub struct Paginator<S: Schema, C> {
    shared: Arc<Shared<S, C>>,
    background: Arc<dyn ExecutionContext>,
}

impl<S: Schema, C> fmt::Debug for Paginator<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("name", &self.shared.config.name)
            .field("record", &S::RECORD_NAME)
            .field("query", &self.shared.query)
            .field("count", &self.shared.sequence.lock().entries.len())
            .finish()
    }
}

impl<S, C> Paginator<S, C>
where
    S: Schema,
    S::Value: Clone + Send + Sync + 'static,
    C: OrderedCollection,
{
    /// Create new empty [`Paginator`] over the children selected by `query`.
    ///
    /// `query` may be bounded with `start_at`/`end_at` but must not carry a limit: the paginator
    /// sets its own limit per load.
    pub fn new(
        query: Query,
        collection: C,
        foreground: Arc<dyn ExecutionContext>,
        background: Arc<dyn ExecutionContext>,
    ) -> Result<Self, PagerError> {
        Self::with_config(
            query,
            collection,
            foreground,
            background,
            PaginatorConfig::default(),
        )
    }

    /// Same as [`Paginator::new`] with an explicit [`PaginatorConfig`].
    ///
    /// Fails with [`PagerError::ZeroBatchSize`] if `config.max_batch_size` is zero.
    pub fn with_config(
        query: Query,
        collection: C,
        foreground: Arc<dyn ExecutionContext>,
        background: Arc<dyn ExecutionContext>,
        config: PaginatorConfig,
    ) -> Result<Self, PagerError> {
        if let Some(limit) = query.limit() {
            return Err(PagerError::LimitedQuery { limit });
        }
        if config.max_batch_size == 0 {
            return Err(PagerError::ZeroBatchSize);
        }
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                query,
                collection,
                foreground,
                sequence: Mutex::new(EntrySequence {
                    entries: Vec::new(),
                    generation: 0,
                }),
                listener: RwLock::new(None),
            }),
            background,
        })
    }

    /// Number of entries currently held.
    pub fn count(&self) -> usize {
        self.shared.sequence.lock().entries.len()
    }

    /// `true` if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Value of the entry at `index`, 0 being the oldest entry held.
    pub fn item(&self, index: usize) -> Result<S::Value, PagerError> {
        let sequence = self.shared.sequence.lock();
        sequence
            .entries
            .get(index)
            .map(|entry| entry.value.clone())
            .ok_or(PagerError::IndexOutOfRange {
                index,
                len: sequence.entries.len(),
            })
    }

    /// Key of the oldest entry held, if any.
    pub fn oldest_key(&self) -> Option<ChildKey> {
        self.shared.sequence.lock().oldest_key().map(str::to_string)
    }

    /// Copy of all entries held, oldest first.
    pub fn entries(&self) -> Vec<Entry<S::Value>> {
        self.shared.sequence.lock().entries.clone()
    }

    /// Replaces the registered listener. `None` unregisters it.
    pub fn set_listener(&self, listener: Option<Arc<dyn Listener>>) {
        *self.shared.listener.write() = listener;
    }

    /// Drops all entries. Loads already in flight are not cancelled, but their batches are
    /// discarded on arrival and reported as [`LoadError::Reset`].
    pub fn reset(&self) {
        self.shared.sequence.lock().clear();
        debug!(paginator = self.shared.config.name, "reset");
    }

    /// Schedules a load of up to `n` entries older than the oldest entry held.
    ///
    /// Returns as soon as the load is posted to the background context. The outcome is
    /// delivered on the foreground context to the listener registered at that time, then to the
    /// returned [`LoadTicket`].
    pub fn load_older_entries(&self, n: usize) -> Result<LoadTicket, PagerError> {
        if n == 0 {
            return Err(PagerError::ZeroBatchSize);
        }
        if n > self.shared.config.max_batch_size {
            return Err(PagerError::BatchTooLarge {
                requested: n,
                max: self.shared.config.max_batch_size,
            });
        }

        let (sender, receiver) = oneshot::channel();
        let shared = self.shared.clone();
        self.background.post(Box::pin(async move {
            let result = shared.load_older_entries(n).await;
            shared.deliver(result, sender);
        }))?;
        Ok(LoadTicket { receiver })
    }
}

impl<S, C> Shared<S, C>
where
    S: Schema,
    S::Value: Clone + Send + Sync + 'static,
    C: OrderedCollection,
{
    fn cursor(&self, n: usize) -> Cursor {
        let sequence = self.sequence.lock();
        let boundary = sequence.oldest_key().map(str::to_string);
        let query = match &boundary {
            None => {
                debug!(paginator = self.config.name, n, "nothing loaded yet, limit_to_last");
                self.query.clone().limit_to_last(n)
            }
            Some(oldest) => {
                debug!(
                    paginator = self.config.name,
                    end_at = %oldest,
                    limit = n.saturating_add(1),
                    "loading entries older than the oldest held"
                );
                self.query
                    .clone()
                    .order_by_key()
                    .end_at(oldest.clone())
                    .limit_to_last(n.saturating_add(1))
            }
        };
        Cursor {
            query,
            boundary,
            original_count: sequence.entries.len(),
            generation: sequence.generation,
        }
    }

    #[tracing::instrument(skip_all, level = "debug", fields(paginator = self.config.name, n = n))]
    async fn load_older_entries(&self, n: usize) -> LoadResult {
        let _timer = PAGER_LOAD_LATENCY_SECONDS
            .with_label_values(&[self.config.name])
            .start_timer();
        let started = Instant::now();

        let cursor = self.cursor(n);
        let children = self.collection.fetch_once(&cursor.query).await?;
        let batch = self.decode_batch(children, cursor.boundary.as_deref())?;

        let mut sequence = self.sequence.lock();
        if sequence.generation != cursor.generation {
            return Err(LoadError::Reset);
        }
        if sequence.oldest_key() != cursor.boundary.as_deref() {
            return Err(LoadError::Overlapped);
        }
        let original_count = sequence.entries.len();
        let mut merged = batch;
        merged.append(&mut sequence.entries);
        sequence.entries = merged;
        let loaded_count = sequence.entries.len() - original_count;
        drop(sequence);

        PAGER_ENTRIES_LOADED
            .with_label_values(&[self.config.name])
            .inc_by(loaded_count as u64);
        debug!(
            original = cursor.original_count,
            loaded = loaded_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merged older entries"
        );
        Ok(LoadedBatch {
            original_count: cursor.original_count,
            loaded_count,
        })
    }

    /// Decodes `children`, dropping the boundary duplicate, and checks that the result is
    /// strictly ascending and strictly older than `boundary`.
    fn decode_batch(
        &self,
        children: Vec<RawChild>,
        boundary: Option<&str>,
    ) -> Result<Vec<Entry<S::Value>>, LoadError> {
        let mut batch: Vec<Entry<S::Value>> = Vec::with_capacity(children.len());
        for RawChild { key, value } in children {
            if boundary == Some(key.as_str()) {
                PAGER_BOUNDARY_DUPLICATES
                    .with_label_values(&[self.config.name])
                    .inc();
                continue;
            }
            let in_order = batch.last().map_or(true, |prev| prev.key < key)
                && boundary.map_or(true, |oldest| key.as_str() < oldest);
            if !in_order {
                return Err(LoadError::OutOfOrder { key });
            }
            let value = <S::Value as ValueCodec<S>>::decode_value(&value)
                .map_err(|source| LoadError::Codec {
                    key: key.clone(),
                    source,
                })?;
            batch.push(Entry { key, value });
        }
        Ok(batch)
    }

    fn deliver(self: &Arc<Self>, result: LoadResult, sender: oneshot::Sender<LoadResult>) {
        if let Err(e) = &result {
            PAGER_LOAD_FAILURES
                .with_label_values(&[self.config.name, e.reason()])
                .inc();
            warn!(paginator = self.config.name, "loading older entries failed: {e}");
        }

        let shared = self.clone();
        let posted = self.foreground.post(Box::pin(async move {
            // Read the slot at delivery time so a listener set after the load was issued is
            // still notified.
            let listener = shared.listener.read().clone();
            if let Some(listener) = listener {
                match &result {
                    Ok(batch) => {
                        listener.on_older_entries_loaded(batch.original_count, batch.loaded_count)
                    }
                    Err(e) => listener.on_load_failed(e),
                }
            }
            let _ = sender.send(result);
        }));
        if let Err(e) = posted {
            warn!(paginator = self.config.name, "dropping load notification: {e}");
        }
    }
}
