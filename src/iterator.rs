use std::iter::FusedIterator;

use rocksdb::{ColumnFamily, ReadOptions};

/// Indicates in which direction iterator should be scanned.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum ScanDirection {
    Forward,
    Backward,
}

/// Inclusive window of encoded keys. `None` means unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct KeyWindow {
    pub(crate) lower: Option<Vec<u8>>,
    pub(crate) upper: Option<Vec<u8>>,
}

impl KeyWindow {
    pub(crate) fn is_inverted(&self) -> bool {
        matches!((&self.lower, &self.upper), (Some(lower), Some(upper)) if lower > upper)
    }
}

/// Iterates over raw key-value pairs of a single column family inside a [`KeyWindow`].
pub(crate) struct RawWindowIter<'a> {
    db_iter: rocksdb::DBRawIterator<'a>,
    direction: ScanDirection,
    upper: Option<Vec<u8>>,
    done: bool,
}

impl<'a> RawWindowIter<'a> {
    pub(crate) fn new(
        inner: &'a rocksdb::DB,
        cf_handle: &ColumnFamily,
        window: KeyWindow,
        direction: ScanDirection,
    ) -> Self {
        // |        | Forward                           | Backward                         |
        // |--------|-----------------------------------|----------------------------------|
        // | lower  | opts lower bound + seek_to_first  | opts lower bound                 |
        // | upper  | checked inside `next()`           | seek_for_prev(upper)             |
        // | none   | seek_to_first                     | seek_to_last                     |
        //
        // RocksDB upper bounds are exclusive, so the inclusive upper bound never goes into the
        // read options.
        let mut opts = ReadOptions::default();
        if let Some(lower) = &window.lower {
            opts.set_iterate_lower_bound(lower.clone());
        }

        let mut db_iter = inner.raw_iterator_cf_opt(cf_handle, opts);
        match (direction, &window.upper) {
            (ScanDirection::Forward, _) => db_iter.seek_to_first(),
            (ScanDirection::Backward, Some(upper)) => db_iter.seek_for_prev(upper),
            (ScanDirection::Backward, None) => db_iter.seek_to_last(),
        }

        RawWindowIter {
            db_iter,
            direction,
            done: window.is_inverted(),
            upper: window.upper,
        }
    }
}

impl Iterator for RawWindowIter<'_> {
    type Item = anyhow::Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // Calling `next` or `prev` requires to check `valid` first.
        // <https://github.com/rust-rocksdb/rust-rocksdb/issues/824>.
        if !self.db_iter.valid() {
            self.done = true;
            return self.db_iter.status().err().map(|e| Err(e.into()));
        }

        let (key, value) = self.db_iter.item()?;
        if self.direction == ScanDirection::Forward {
            if let Some(upper) = &self.upper {
                if key > upper.as_slice() {
                    self.done = true;
                    return None;
                }
            }
        }
        let item = (key.to_vec(), value.to_vec());

        match self.direction {
            ScanDirection::Forward => self.db_iter.next(),
            ScanDirection::Backward => self.db_iter.prev(),
        }

        Some(Ok(item))
    }
}

impl FusedIterator for RawWindowIter<'_> {}
