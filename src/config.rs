//! Tunables for a [`ShellTree`](crate::ShellTree).

use crate::namespace::{FilterSet, WatchFilter};
use crate::tree::SortPolicy;
use std::time::Duration;

/// Default quiet period before a notification batch is flushed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default number of identifiers kept in the icon cache.
pub const DEFAULT_ICON_CACHE_CAPACITY: usize = 4096;

/// Configuration for the tree synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Quiet period after the last raw notification before a batch is delivered.
    pub debounce: Duration,
    /// List hidden entries.
    pub show_hidden: bool,
    /// List containers only.
    pub folders_only: bool,
    /// Comparison used for non-drive siblings.
    pub sort: SortPolicy,
    /// Maximum number of cached icons.
    pub icon_cache_capacity: usize,
    /// Ask providers for recursive watches instead of one level.
    pub recursive_watches: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            show_hidden: false,
            folders_only: true,
            sort: SortPolicy::default(),
            icon_cache_capacity: DEFAULT_ICON_CACHE_CAPACITY,
            recursive_watches: false,
        }
    }
}

impl TreeConfig {
    /// The listing filter implied by this configuration.
    pub fn filter_set(&self) -> FilterSet {
        FilterSet {
            include_hidden: self.show_hidden,
            folders_only: self.folders_only,
        }
    }

    /// The watch filter implied by this configuration.
    pub fn watch_filter(&self) -> WatchFilter {
        WatchFilter {
            recursive: self.recursive_watches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_describe_a_folder_tree() {
        let config = TreeConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.filter_set(), FilterSet::default());
        assert!(!config.watch_filter().recursive);
    }
}
