//! Factory configuration.

use std::path::PathBuf;

/// Default capacity of the live-resource table.
pub const DEFAULT_MAX_RESOURCES: usize = 1024;

/// Default capacity of the preloader queue.
pub const DEFAULT_MAX_PRELOAD_REQUESTS: usize = 1024;

/// Configuration for a [`Factory`](crate::Factory).
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Maximum number of live (or loading) resources.
    pub max_resources: usize,
    /// Whether `reload` is allowed at all.
    pub reload_support: bool,
    /// Capacity of the preloader queue and of its warm cache. Hints beyond
    /// it are dropped.
    pub max_preload_requests: usize,
    /// Directory of loose files consulted before the archive.
    pub loose_root: Option<PathBuf>,
    /// Whether lifecycle events are buffered for `drain_events`.
    pub record_events: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        FactoryConfig {
            max_resources: DEFAULT_MAX_RESOURCES,
            reload_support: true,
            max_preload_requests: DEFAULT_MAX_PRELOAD_REQUESTS,
            loose_root: None,
            record_events: true,
        }
    }
}

impl FactoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_resources(mut self, max_resources: usize) -> Self {
        self.max_resources = max_resources;
        self
    }

    pub fn with_reload_support(mut self, enabled: bool) -> Self {
        self.reload_support = enabled;
        self
    }

    pub fn with_max_preload_requests(mut self, capacity: usize) -> Self {
        self.max_preload_requests = capacity;
        self
    }

    /// Serve loose files from `root` ahead of the archive.
    pub fn with_loose_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.loose_root = Some(root.into());
        self
    }

    pub fn with_events(mut self, record: bool) -> Self {
        self.record_events = record;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FactoryConfig::default();
        assert_eq!(config.max_resources, 1024);
        assert!(config.reload_support);
        assert_eq!(config.max_preload_requests, 1024);
        assert!(config.loose_root.is_none());
    }

    #[test]
    fn test_builder() {
        let config = FactoryConfig::new()
            .with_max_resources(8)
            .with_reload_support(false)
            .with_loose_root("content");
        assert_eq!(config.max_resources, 8);
        assert!(!config.reload_support);
        assert_eq!(config.loose_root.as_deref(), Some(std::path::Path::new("content")));
    }
}
