//! Database configuration.

use std::time::Duration;

/// What happens to a transaction's locks when it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReleasePolicy {
    /// Release every lock once the final flush has succeeded.
    OnCommit,
    /// Keep locks past commit until `release_locks`, `abort` or drop.
    Retain,
}

/// How a query range with `start == end` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleRowRange {
    /// Select exactly the one row at that index.
    Window,
    /// Reject the range as invalid.
    Reject,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a blocking lock request waits before failing.
    pub lock_timeout: Duration,

    /// Lock handling at commit.
    pub lock_release: LockReleasePolicy,

    /// Whether reads and writes acquire locks on their own.
    ///
    /// When false, mutating a persistent object requires a WRITE lock taken
    /// explicitly beforehand.
    pub implicit_locking: bool,

    /// Treatment of single-row query ranges.
    pub single_row_range: SingleRowRange,

    /// Whether queries hand out unresolved handles for objects not yet cached.
    pub proxy_query_results: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            lock_release: LockReleasePolicy::OnCommit,
            implicit_locking: true,
            single_row_range: SingleRowRange::Window,
            proxy_query_results: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the blocking lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the lock release policy.
    #[must_use]
    pub const fn lock_release(mut self, policy: LockReleasePolicy) -> Self {
        self.lock_release = policy;
        self
    }

    /// Sets whether locks are taken implicitly.
    #[must_use]
    pub const fn implicit_locking(mut self, value: bool) -> Self {
        self.implicit_locking = value;
        self
    }

    /// Sets the single-row range policy.
    #[must_use]
    pub const fn single_row_range(mut self, policy: SingleRowRange) -> Self {
        self.single_row_range = policy;
        self
    }

    /// Sets whether query results are proxied.
    #[must_use]
    pub const fn proxy_query_results(mut self, value: bool) -> Self {
        self.proxy_query_results = value;
        self
    }
}
