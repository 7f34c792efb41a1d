use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec,
};

pub static PAGER_LOAD_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        // metric name
        "backpager_load_latency_seconds",
        // metric description
        "Backward load latency in seconds, from issuing the fetch to merging the batch",
        // metric labels (dimensions)
        &["name"],
        exponential_buckets(/*start=*/ 1e-4, /*factor=*/ 2.0, /*count=*/ 20).unwrap(),
    )
    .unwrap()
});

pub static PAGER_ENTRIES_LOADED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "backpager_entries_loaded",
        "Net new entries prepended by backward loads",
        &["name"]
    )
    .unwrap()
});

pub static PAGER_LOAD_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "backpager_load_failures",
        "Backward loads that ended without merging a batch",
        &["name", "reason"]
    )
    .unwrap()
});

pub static PAGER_BOUNDARY_DUPLICATES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "backpager_boundary_duplicates",
        "Boundary duplicates dropped while merging older batches",
        &["name"]
    )
    .unwrap()
});

pub static ROCKS_FETCH_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "backpager_rocks_fetch_bytes",
        "Bytes read per windowed fetch from a RocksDB child list",
        &["collection"],
        exponential_buckets(/*start=*/ 64.0, /*factor=*/ 4.0, /*count=*/ 12).unwrap(),
    )
    .unwrap()
});
