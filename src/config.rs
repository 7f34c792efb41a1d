/// Settings of a [`Paginator`](crate::paginator::Paginator).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PaginatorConfig {
    /// Name used in logs and as the metrics label. Defaults to `"paginator"`.
    pub name: &'static str,
    /// Largest batch accepted by `load_older_entries`. Defaults to 10_000.
    pub max_batch_size: usize,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            name: "paginator",
            max_batch_size: 10_000,
        }
    }
}

/// Selected RocksDB options for the instance backing a
/// [`RocksCollection`](crate::rocks::RocksCollection).
/// see <https://github.com/facebook/rocksdb/blob/master/include/rocksdb/options.h>
/// for detailed explanations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RocksdbConfig {
    /// The maximum number of files that can be open concurrently. Defaults to 1000
    pub max_open_files: i32,
    /// Once write-ahead logs exceed this size, RocksDB will start forcing the flush of column
    /// families whose memtables are backed by the oldest live WAL file. Defaults to 256MB
    pub max_total_wal_size: u64,
    /// The maximum number of background threads, including threads for flushing and compaction.
    /// Defaults to 4.
    pub max_background_jobs: i32,
}

impl Default for RocksdbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 1000,
            // Child lists are appended to at very different rates, so cap the WAL to force
            // flushing of the quiet ones.
            max_total_wal_size: 1u64 << 28,
            max_background_jobs: 4,
        }
    }
}

/// Generate [`rocksdb::Options`] corresponding to the given [`RocksdbConfig`].
pub fn gen_rocksdb_options(config: &RocksdbConfig, readonly: bool) -> rocksdb::Options {
    let mut db_opts = rocksdb::Options::default();
    db_opts.set_max_open_files(config.max_open_files);
    db_opts.set_max_total_wal_size(config.max_total_wal_size);
    db_opts.set_max_background_jobs(config.max_background_jobs);
    if !readonly {
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
    }

    db_opts
}
