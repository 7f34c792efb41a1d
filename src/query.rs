//! Query handles over ordered child lists.
//!
//! A [`Query`] is a plain value: re-scoping it (`end_at`, `limit_to_last`, ...) returns a new query
//! and leaves the original untouched, so a paginator can derive one query per request from the
//! handle it was constructed with.

/// Readability alias for the key of a child. Keys are ordered lexicographically by their bytes.
pub type ChildKey = String;
/// Readability alias for the undecoded value of a child.
pub type ChildValue = Vec<u8>;

/// One child of a location, as returned by an
/// [`OrderedCollection`](crate::collection::OrderedCollection), before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChild {
    /// Key of the child.
    pub key: ChildKey,
    /// Raw value of the child.
    pub value: ChildValue,
}

impl RawChild {
    /// Create new [`RawChild`].
    pub fn new(key: impl Into<ChildKey>, value: impl Into<ChildValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Describes a window over the children of a location.
///
/// The window holds every child with `start_at <= key <= end_at` (a missing bound is unbounded).
/// With `limit_to_last(n)` only the `n` children with the greatest keys are kept. Results are
/// always delivered in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    path: String,
    start_at: Option<ChildKey>,
    end_at: Option<ChildKey>,
    limit_to_last: Option<usize>,
    order_by_key: bool,
}

impl Query {
    /// Query over every child of the location at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            start_at: None,
            end_at: None,
            limit_to_last: None,
            order_by_key: false,
        }
    }

    /// Location of the child list.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Restrict to children with key >= `key`.
    pub fn start_at(mut self, key: impl Into<ChildKey>) -> Self {
        self.start_at = Some(key.into());
        self
    }

    /// Restrict to children with key <= `key`.
    pub fn end_at(mut self, key: impl Into<ChildKey>) -> Self {
        self.end_at = Some(key.into());
        self
    }

    /// Keep only the last `n` children of the window.
    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit_to_last = Some(n);
        self
    }

    /// Order by key explicitly. Key order is the native order of a child list, so this only
    /// records intent for collections that support other orderings.
    pub fn order_by_key(mut self) -> Self {
        self.order_by_key = true;
        self
    }

    /// Lower inclusive bound, if any.
    pub fn lower_bound(&self) -> Option<&str> {
        self.start_at.as_deref()
    }

    /// Upper inclusive bound, if any.
    pub fn upper_bound(&self) -> Option<&str> {
        self.end_at.as_deref()
    }

    /// The limit set by [`Query::limit_to_last`], if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit_to_last
    }

    /// `true` when the lower bound is greater than the upper bound; such a window is empty.
    pub fn is_inverted(&self) -> bool {
        match (&self.start_at, &self.end_at) {
            (Some(start), Some(end)) => start > end,
            _ => false,
        }
    }
}
