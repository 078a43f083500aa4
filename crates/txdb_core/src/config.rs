//! Store configuration.

/// Configuration for opening a transaction store and its writer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the log after every record (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to cut the log at the first corrupt record on open instead of
    /// refusing to open. The store only caches pool data, so dropping a
    /// damaged tail loses nothing the pool cannot rebuild.
    pub truncate_corrupt_tail: bool,

    /// Garbage bytes required before open compacts the log. Compaction also
    /// requires garbage to exceed the live bytes.
    pub compact_min_bytes: u64,

    /// Maximum number of queued requests the writer folds into one batch.
    pub max_coalesced_requests: usize,

    /// How many times the writer retries a failed batch commit.
    pub commit_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            truncate_corrupt_tail: true,
            compact_min_bytes: 4 * 1024 * 1024, // 4 MB
            max_coalesced_requests: 10_000,
            commit_retries: 2,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether a corrupt log tail is truncated on open.
    #[must_use]
    pub const fn truncate_corrupt_tail(mut self, value: bool) -> Self {
        self.truncate_corrupt_tail = value;
        self
    }

    /// Sets the garbage threshold for compaction on open.
    #[must_use]
    pub const fn compact_min_bytes(mut self, bytes: u64) -> Self {
        self.compact_min_bytes = bytes;
        self
    }

    /// Sets how many queued requests the writer coalesces per batch.
    /// Zero is treated as one.
    #[must_use]
    pub const fn max_coalesced_requests(mut self, count: usize) -> Self {
        self.max_coalesced_requests = count;
        self
    }

    /// Sets the number of retries for a failed background commit.
    #[must_use]
    pub const fn commit_retries(mut self, retries: u32) -> Self {
        self.commit_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert!(config.truncate_corrupt_tail);
        assert_eq!(config.commit_retries, 2);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .sync_on_commit(false)
            .compact_min_bytes(1024)
            .max_coalesced_requests(16)
            .commit_retries(0);

        assert!(!config.sync_on_commit);
        assert_eq!(config.compact_min_bytes, 1024);
        assert_eq!(config.max_coalesced_requests, 16);
        assert_eq!(config.commit_retries, 0);
    }
}
