//! Engine configuration.

/// Configuration for a [`crate::Factory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether `Default`-durability commits sync the backend.
    pub sync_on_commit: bool,

    /// Largest accepted encoded key, in bytes.
    pub max_key_size: usize,

    /// Largest accepted serialized value, in bytes.
    pub max_value_size: usize,

    /// Whether a file backend is compacted when the factory opens it.
    pub compact_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            max_key_size: 64 * 1024,          // 64 KB
            max_value_size: 64 * 1024 * 1024, // 64 MB
            compact_on_open: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether `Default`-durability commits sync the backend.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the largest accepted encoded key.
    #[must_use]
    pub const fn max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    /// Sets the largest accepted serialized value.
    #[must_use]
    pub const fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Sets whether file backends are compacted on open.
    #[must_use]
    pub const fn compact_on_open(mut self, value: bool) -> Self {
        self.compact_on_open = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.sync_on_commit);
        assert!(!config.compact_on_open);
        assert!(config.max_value_size > config.max_key_size);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .sync_on_commit(false)
            .max_key_size(128)
            .max_value_size(1024)
            .compact_on_open(true);

        assert!(!config.sync_on_commit);
        assert_eq!(config.max_key_size, 128);
        assert_eq!(config.max_value_size, 1024);
        assert!(config.compact_on_open);
    }
}
