//! Child lists stored in RocksDB, one column family per location.

use std::path::Path;
use std::sync::Arc;

use anyhow::format_err;
use async_trait::async_trait;
use tracing::info;

use crate::collection::{OrderedCollection, RemoteError};
use crate::config::{gen_rocksdb_options, RocksdbConfig};
use crate::iterator::{KeyWindow, RawWindowIter, ScanDirection};
use crate::metrics::ROCKS_FETCH_BYTES;
use crate::query::{Query, RawChild};
use crate::schema::{Schema, ValueCodec};
use crate::with_error_logging;

/// Returns the column family descriptor used for child lists. Includes LZ4 compression.
pub fn default_cf_descriptor(cf_name: impl Into<String>) -> rocksdb::ColumnFamilyDescriptor {
    let mut cf_opts = rocksdb::Options::default();
    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    rocksdb::ColumnFamilyDescriptor::new(cf_name, cf_opts)
}

/// An [`OrderedCollection`] backed by RocksDB. The path of a [`Query`] names the column family;
/// keys are stored as their UTF-8 bytes, so RocksDB's bytewise order is the key order.
#[derive(Debug, Clone)]
pub struct RocksCollection {
    name: &'static str, // for logging and metrics
    db: Arc<rocksdb::DB>,
}

impl RocksCollection {
    /// Opens a RocksDB instance at `path` with one column family per location in `locations`.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn open(
        path: impl AsRef<Path>,
        name: &'static str,
        locations: impl IntoIterator<Item = impl Into<String>>,
        config: &RocksdbConfig,
    ) -> anyhow::Result<Self> {
        let db_opts = gen_rocksdb_options(config, false);
        let descriptors = std::iter::once(rocksdb::DEFAULT_COLUMN_FAMILY_NAME.to_string())
            .chain(locations.into_iter().map(Into::into))
            .map(default_cf_descriptor);
        let inner = with_error_logging(
            || rocksdb::DB::open_cf_descriptors(&db_opts, path, descriptors),
            "open",
        )?;
        info!(rocksdb_name = name, path = %inner.path().display(), "Opened child list store");
        Ok(Self {
            name,
            db: Arc::new(inner),
        })
    }

    /// Name of the store that can be used for logging or metrics or tracing.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Writes the raw value of a single child.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn put_child(&self, location: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.put_children(location, [RawChild::new(key, value)])
    }

    /// Writes many children of one location atomically.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn put_children(
        &self,
        location: &str,
        children: impl IntoIterator<Item = RawChild>,
    ) -> anyhow::Result<()> {
        with_error_logging::<_, _, anyhow::Error>(
            || {
                let cf_handle = self.get_cf_handle(location)?;
                let mut batch = rocksdb::WriteBatch::default();
                for child in children {
                    batch.put_cf(cf_handle, child.key.as_bytes(), &child.value);
                }
                self.db.write_opt(batch, &default_write_options())?;
                Ok(())
            },
            "put_children",
        )
    }

    /// Encodes `value` with the codec of `S` and writes it as child `key`.
    pub fn put_record<S: Schema>(
        &self,
        location: &str,
        key: &str,
        value: &S::Value,
    ) -> anyhow::Result<()> {
        let bytes = <S::Value as ValueCodec<S>>::encode_value(value)?;
        self.put_child(location, key, &bytes)
    }

    /// Reads the window of `query` synchronously, in ascending key order.
    #[tracing::instrument(skip_all, level = "debug", fields(location = query.path()))]
    pub fn read_window(&self, query: &Query) -> anyhow::Result<Vec<RawChild>> {
        with_error_logging::<_, _, anyhow::Error>(
            || {
                let cf_handle = self.get_cf_handle(query.path())?;
                let window = KeyWindow {
                    lower: query.lower_bound().map(|key| key.as_bytes().to_vec()),
                    upper: query.upper_bound().map(|key| key.as_bytes().to_vec()),
                };

                let mut fetched_bytes = 0usize;
                let mut to_child = |item: anyhow::Result<(Vec<u8>, Vec<u8>)>| {
                    let (key, value) = item?;
                    fetched_bytes += key.len() + value.len();
                    let key = String::from_utf8(key)
                        .map_err(|e| format_err!("non utf-8 child key in {}: {e}", query.path()))?;
                    Ok::<_, anyhow::Error>(RawChild { key, value })
                };

                let children = match query.limit() {
                    Some(limit) => {
                        // Walk backward from the upper bound and stop after `limit` children.
                        let direction = ScanDirection::Backward;
                        let iter = RawWindowIter::new(&self.db, cf_handle, window, direction);
                        let mut children = iter
                            .take(limit)
                            .map(&mut to_child)
                            .collect::<anyhow::Result<Vec<_>>>()?;
                        children.reverse();
                        children
                    }
                    None => RawWindowIter::new(&self.db, cf_handle, window, ScanDirection::Forward)
                        .map(&mut to_child)
                        .collect::<anyhow::Result<Vec<_>>>()?,
                };

                ROCKS_FETCH_BYTES
                    .with_label_values(&[self.name])
                    .observe(fetched_bytes as f64);
                Ok(children)
            },
            "read_window",
        )
    }

    fn get_cf_handle(&self, cf_name: &str) -> anyhow::Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf_name)
            .ok_or_else(|| format_err!("no child list stored for location: {cf_name}"))
    }
}

#[async_trait]
impl OrderedCollection for RocksCollection {
    async fn fetch_once(&self, query: &Query) -> Result<Vec<RawChild>, RemoteError> {
        let collection = self.clone();
        let query = query.clone();
        let children = tokio::task::spawn_blocking(move || collection.read_window(&query))
            .await
            .map_err(anyhow::Error::from)??;
        Ok(children)
    }
}

/// Writes are synchronous: once a put returns `Ok(())` the children survive a crash.
fn default_write_options() -> rocksdb::WriteOptions {
    let mut opts = rocksdb::WriteOptions::default();
    opts.set_sync(true);
    opts
}
