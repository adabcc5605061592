//! Node startup options.

use std::path::PathBuf;

/// Configuration for starting a [`crate::Node`].
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Node state directory (identity, configs, router storage).
    pub dir: PathBuf,

    /// Transport config directory to use as-is. When unset, a config is
    /// generated under `<dir>/rns`.
    pub transport_config_dir: Option<PathBuf>,

    /// Display name embedded into announce app-data. Optional.
    pub display_name: String,

    /// Transport log level, 0..7.
    pub log_level: u8,

    /// Inbound stamp cost requirement for this node. None = no requirement.
    pub delivery_stamp_cost: Option<u8>,

    /// Remove transient router state (ratchets) before starting.
    pub reset_router_state: bool,

    /// Overwrite a generated transport config with the embedded template.
    /// Has no effect when `transport_config_dir` is set.
    pub reset_transport_config: bool,

    /// Periodic announce interval in seconds.
    pub announce_interval_secs: u64,

    /// Interface watchdog tick interval in seconds.
    pub watchdog_interval_secs: u64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".lantern"),
            transport_config_dir: None,
            display_name: String::new(),
            log_level: 4,
            delivery_stamp_cost: None,
            reset_router_state: false,
            reset_transport_config: false,
            announce_interval_secs: 60,
            watchdog_interval_secs: 2,
        }
    }
}

impl NodeOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Use an external transport config directory as-is.
    pub fn with_transport_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transport_config_dir = Some(dir.into());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the transport log level (clamped to 0..7 at use).
    pub fn with_log_level(mut self, level: u8) -> Self {
        self.log_level = level;
        self
    }

    /// Require an inbound stamp cost.
    pub fn with_delivery_stamp_cost(mut self, cost: u8) -> Self {
        self.delivery_stamp_cost = Some(cost);
        self
    }

    /// Remove transient router state before starting.
    pub fn with_reset_router_state(mut self) -> Self {
        self.reset_router_state = true;
        self
    }

    /// Overwrite the generated transport config with the template.
    pub fn with_reset_transport_config(mut self) -> Self {
        self.reset_transport_config = true;
        self
    }

    /// Configuration for tests: defaults with state rooted under the
    /// given scratch directory.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = NodeOptions::default();
        assert_eq!(options.dir, PathBuf::from(".lantern"));
        assert_eq!(options.log_level, 4);
        assert_eq!(options.announce_interval_secs, 60);
        assert_eq!(options.watchdog_interval_secs, 2);
        assert!(options.transport_config_dir.is_none());
        assert!(options.delivery_stamp_cost.is_none());
    }

    #[test]
    fn test_for_testing_overrides_only_dir() {
        let options = NodeOptions::for_testing("/tmp/scratch");
        let defaults = NodeOptions::default();

        assert_eq!(options.dir, PathBuf::from("/tmp/scratch"));
        assert_eq!(options.announce_interval_secs, defaults.announce_interval_secs);
        assert_eq!(options.watchdog_interval_secs, defaults.watchdog_interval_secs);
        assert_eq!(options.log_level, defaults.log_level);
    }

    #[test]
    fn test_builder_chain() {
        let options = NodeOptions::new()
            .with_dir("/tmp/n1")
            .with_display_name("Alice")
            .with_log_level(6)
            .with_delivery_stamp_cost(8)
            .with_reset_router_state();

        assert_eq!(options.dir, PathBuf::from("/tmp/n1"));
        assert_eq!(options.display_name, "Alice");
        assert_eq!(options.log_level, 6);
        assert_eq!(options.delivery_stamp_cost, Some(8));
        assert!(options.reset_router_state);
        assert!(!options.reset_transport_config);
    }
}
