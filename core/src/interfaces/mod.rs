//! Interface watchdog and reset controller.
//!
//! Mobile hosts freeze sockets on suspend; after resume an interface can
//! look connected while carrying no traffic. The watchdog detects the
//! all-enabled-offline condition and hard-resets the enabled interfaces
//! (halt, settle, resume). Explicit enable/disable rewrites the transport
//! config and applies the change without a restart.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use tokio::time::{sleep, Instant};

use crate::config::{truthy, ConfigFile, Subsection};
use crate::node::core::{Node, NodeInner};
use crate::node::error::NodeError;

/// Minimum continuous all-offline window before a reset fires.
const STALL_OFFLINE_MIN: Duration = Duration::from_secs(6);

/// Minimum spacing between two resets.
const RESET_COOLDOWN: Duration = Duration::from_secs(12);

/// Settle window between halting and resuming, letting the OS release
/// sockets.
const RESET_SETTLE: Duration = Duration::from_millis(400);

/// One interface as configured in the transport config file.
#[derive(Debug, Clone, Serialize)]
pub struct ConfiguredInterface {
    /// Config section name, e.g. `Default Interface`.
    pub name: String,
    /// Driver type, e.g. `TCPClientInterface`. Possibly empty.
    pub kind: String,
    /// Whether the interface is enabled.
    pub enabled: bool,
}

impl ConfiguredInterface {
    /// Whether the driver is TCP-typed.
    pub(crate) fn is_tcp(&self) -> bool {
        self.kind.to_ascii_lowercase().contains("tcp")
    }
}

/// Watchdog bookkeeping: per-interface offline timestamps and the last
/// reset time.
#[derive(Debug, Default)]
pub(crate) struct WatchState {
    pub(crate) offline_since: HashMap<String, Instant>,
    pub(crate) last_reset: Option<Instant>,
}

impl Node {
    /// Interfaces from the transport config file, including disabled ones,
    /// sorted by name.
    pub fn configured_interfaces(&self) -> Vec<ConfiguredInterface> {
        self.inner.configured_interfaces()
    }

    /// Enable or disable an interface by config section name.
    ///
    /// Writes `interface_enabled` into the config, then reloads the driver
    /// (enabling; reconnects TCP clients) or halts it (disabling).
    pub fn set_interface_enabled(&self, name: &str, enabled: bool) -> Result<(), NodeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NodeError::InvalidInput("missing interface name".into()));
        }

        let config_path = self.inner.transport.config_path();
        let mut config = ConfigFile::load(&config_path)
            .map_err(|e| NodeError::Config(format!("load transport config: {}", e)))?;
        config
            .section_mut("interfaces")
            .subsection_mut(name)
            .set("interface_enabled", if enabled { "Yes" } else { "No" });
        config
            .save(&config_path)
            .map_err(|e| NodeError::Config(format!("save transport config: {}", e)))?;

        if enabled {
            self.inner.transport.reload_interface(name)?;
        } else {
            self.inner.transport.halt_interface(name)?;
        }
        Ok(())
    }

    /// Force-reload enabled interfaces after a host resume.
    ///
    /// Hosts call this from their app-resume hook: TCP clients are always
    /// reloaded (half-open sockets look connected), other drivers only
    /// when currently offline.
    pub fn kick_interfaces(&self) {
        self.inner.kick_enabled_interfaces();
    }
}

impl NodeInner {
    /// Watchdog loop. Terminated by the stop signal.
    pub(crate) async fn run_interface_watchdog(self: std::sync::Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.options.watchdog_interval_secs));
        interval.tick().await;
        loop {
            interval.tick().await;
            if !self.is_running().await {
                break;
            }
            self.check_interface_stall("watchdog").await;
        }
        debug!("interface watchdog stopped");
    }

    /// One watchdog tick: track per-interface offline windows and reset
    /// when everything enabled has been offline long enough.
    pub(crate) async fn check_interface_stall(&self, reason: &str) {
        let enabled = self.enabled_interfaces();
        if enabled.is_empty() {
            return;
        }
        let (by_short, by_name) = self.interface_online_maps();

        let now = Instant::now();
        let mut any_online = false;
        let mut longest_offline = Duration::ZERO;

        let last_reset = {
            let mut state = self.watch_state.lock().unwrap();
            for iface in &enabled {
                let name = iface.name.trim();
                if name.is_empty() {
                    continue;
                }
                let online = lookup_online(&by_short, &by_name, name);
                if online {
                    any_online = true;
                    state.offline_since.remove(name);
                    continue;
                }
                let since = *state.offline_since.entry(name.to_string()).or_insert(now);
                longest_offline = longest_offline.max(now.duration_since(since));
            }
            state.last_reset
        };

        // Reset only when everything enabled has been dark for a while.
        if any_online || longest_offline < STALL_OFFLINE_MIN {
            return;
        }
        if let Some(last) = last_reset {
            if now.duration_since(last) < RESET_COOLDOWN {
                return;
            }
        }

        self.watch_state.lock().unwrap().last_reset = Some(Instant::now());
        debug!(
            reason = %reason,
            offline_for = ?longest_offline,
            "watchdog triggering interface reset"
        );
        self.reset_enabled_interfaces(reason).await;
    }

    /// Hard-reset the enabled interfaces: halt each in order, wait for the
    /// OS to release sockets, resume each in original order. Serialised so
    /// concurrent resume events cannot flap interfaces.
    pub(crate) async fn reset_enabled_interfaces(&self, reason: &str) {
        let _guard = self.reset_lock.lock().await;

        let enabled = self.enabled_interfaces();
        let names: Vec<String> = enabled
            .iter()
            .map(|iface| iface.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            debug!(reason = %reason, "interface reset skipped (no enabled interfaces)");
            return;
        }

        debug!(reason = %reason, enabled = %names.join(","), "interface reset begin");

        for name in &names {
            match self.transport.halt_interface(name) {
                Ok(()) => debug!(reason = %reason, name = %name, "halted interface"),
                Err(e) => debug!(reason = %reason, name = %name, error = %e, "halt interface failed"),
            }
        }

        sleep(RESET_SETTLE).await;

        for name in &names {
            match self.transport.resume_interface(name) {
                Ok(()) => debug!(reason = %reason, name = %name, "resumed interface"),
                Err(e) => debug!(reason = %reason, name = %name, error = %e, "resume interface failed"),
            }
        }

        debug!(reason = %reason, "interface reset end");
    }

    /// Force-reload enabled interfaces after a host resume. TCP clients
    /// are always reloaded (half-open sockets look connected); others only
    /// when currently offline.
    pub(crate) fn kick_enabled_interfaces(&self) {
        let enabled = self.enabled_interfaces();
        if enabled.is_empty() {
            return;
        }
        let (by_short, by_name) = self.interface_online_maps();

        for iface in &enabled {
            let name = iface.name.trim();
            if name.is_empty() {
                continue;
            }
            let online = lookup_online(&by_short, &by_name, name);
            if !iface.is_tcp() && online {
                continue;
            }
            match self.transport.reload_interface(name) {
                Ok(()) => debug!(name = %name, "resume: reloaded interface"),
                Err(e) => debug!(name = %name, error = %e, "resume: reload interface failed"),
            }
        }
    }

    /// Interfaces from the transport config file, sorted by name.
    pub(crate) fn configured_interfaces(&self) -> Vec<ConfiguredInterface> {
        let config_path = self.transport.config_path();
        let config = match ConfigFile::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load transport config");
                return Vec::new();
            }
        };
        let Some(section) = config.section("interfaces") else {
            return Vec::new();
        };

        let mut names = section.subsection_names();
        names.sort();
        names
            .iter()
            .filter_map(|name| section.subsection(name))
            .map(|sub| ConfiguredInterface {
                name: sub.name().to_string(),
                kind: sub.get("type").unwrap_or_default().to_string(),
                enabled: subsection_enabled(sub),
            })
            .collect()
    }

    /// Enabled interfaces only.
    pub(crate) fn enabled_interfaces(&self) -> Vec<ConfiguredInterface> {
        self.configured_interfaces()
            .into_iter()
            .filter(|iface| iface.enabled)
            .collect()
    }

    /// Online flags from the runtime stats, keyed by short name and by
    /// full name.
    pub(crate) fn interface_online_maps(
        &self,
    ) -> (HashMap<String, bool>, HashMap<String, bool>) {
        let mut by_short = HashMap::new();
        let mut by_name = HashMap::new();
        for status in self.transport.interface_stats() {
            let short = status.short_name.trim();
            if !short.is_empty() {
                by_short.insert(short.to_string(), status.online);
            }
            let name = status.name.trim();
            if !name.is_empty() {
                by_name.insert(name.to_string(), status.online);
            }
        }
        (by_short, by_name)
    }

    /// Whether any runtime interface is online, enabled or not.
    pub(crate) fn has_any_online_interface(&self) -> bool {
        self.transport
            .interface_stats()
            .iter()
            .any(|status| status.online)
    }
}

pub(crate) fn lookup_online(
    by_short: &HashMap<String, bool>,
    by_name: &HashMap<String, bool>,
    name: &str,
) -> bool {
    by_short
        .get(name)
        .or_else(|| by_name.get(name))
        .copied()
        .unwrap_or(false)
}

fn subsection_enabled(sub: &Subsection) -> bool {
    for key in ["interface_enabled", "enabled", "enable"] {
        if let Some(value) = sub.get(key) {
            return truthy(value);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeOptions};
    use crate::testing::TestMesh;

    async fn started_node(mesh: &TestMesh, dir: &std::path::Path) -> (Node, std::sync::Arc<crate::testing::TestStack>) {
        let stack = mesh.stack();
        let node = Node::start(NodeOptions::for_testing(dir), stack.clone())
            .await
            .unwrap();
        (node, stack)
    }

    #[tokio::test]
    async fn test_configured_interfaces_from_generated_config() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, _stack) = started_node(&mesh, dir.path()).await;

        let interfaces = node.configured_interfaces();
        let names: Vec<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Default Interface", "TCP Client Interface"]);
        assert!(interfaces.iter().all(|i| i.enabled));
        assert!(interfaces[1].is_tcp());

        node.close().await;
    }

    #[tokio::test]
    async fn test_set_interface_enabled_rewrites_config_and_applies() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, stack) = started_node(&mesh, dir.path()).await;
        let transport = stack.transport().unwrap();

        node.set_interface_enabled("TCP Client Interface", false)
            .unwrap();
        let disabled = node
            .configured_interfaces()
            .into_iter()
            .find(|i| i.name == "TCP Client Interface")
            .unwrap();
        assert!(!disabled.enabled);
        assert!(transport
            .actions()
            .contains(&"halt:TCP Client Interface".to_string()));

        node.set_interface_enabled("TCP Client Interface", true)
            .unwrap();
        let enabled = node
            .configured_interfaces()
            .into_iter()
            .find(|i| i.name == "TCP Client Interface")
            .unwrap();
        assert!(enabled.enabled);
        // Enabling reloads (reconnects TCP) rather than resuming.
        assert!(transport
            .actions()
            .contains(&"reload:TCP Client Interface".to_string()));

        node.close().await;
    }

    #[tokio::test]
    async fn test_set_interface_enabled_rejects_empty_name() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, _stack) = started_node(&mesh, dir.path()).await;

        assert!(node.set_interface_enabled("  ", true).is_err());
        node.close().await;
    }

    #[tokio::test]
    async fn test_kick_reloads_tcp_always_and_others_only_when_offline() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, stack) = started_node(&mesh, dir.path()).await;
        let transport = stack.transport().unwrap();

        transport.add_interface("Default Interface", "AutoInterface", true);
        transport.add_interface("TCP Client Interface", "TCPClientInterface", true);

        node.kick_interfaces();
        let actions = transport.actions();
        assert!(actions.contains(&"reload:TCP Client Interface".to_string()));
        assert!(
            !actions.contains(&"reload:Default Interface".to_string()),
            "online non-TCP interfaces stay untouched"
        );

        node.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_resets_after_prolonged_offline() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, stack) = started_node(&mesh, dir.path()).await;
        let transport = stack.transport().unwrap();

        // Both configured interfaces exist at runtime but are offline.
        transport.add_interface("Default Interface", "AutoInterface", false);
        transport.add_interface("TCP Client Interface", "TCPClientInterface", false);

        // Watchdog ticks every 2s; reset needs >= 6s continuous offline.
        tokio::time::sleep(Duration::from_secs(9)).await;

        let actions = transport.actions();
        assert!(
            actions.contains(&"halt:Default Interface".to_string()),
            "expected halt, got {actions:?}"
        );
        let halt_idx = actions
            .iter()
            .position(|a| a == "halt:Default Interface")
            .unwrap();
        let resume_idx = actions
            .iter()
            .position(|a| a == "resume:Default Interface")
            .unwrap();
        assert!(halt_idx < resume_idx, "halt must precede resume");
        assert!(node.inner.watch_state.lock().unwrap().last_reset.is_some());

        node.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_respects_reset_cooldown() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, stack) = started_node(&mesh, dir.path()).await;
        let transport = stack.transport().unwrap();

        transport.add_interface("Default Interface", "AutoInterface", false);
        transport.add_interface("TCP Client Interface", "TCPClientInterface", false);

        tokio::time::sleep(Duration::from_secs(9)).await;
        // The reset resumes interfaces, which marks them online again in
        // the test transport; force them back offline to simulate a dead
        // network.
        transport.set_online("Default Interface", false);
        transport.set_online("TCP Client Interface", false);
        let resets_after_first = count_resets(&transport.actions());
        assert_eq!(resets_after_first, 1);

        // Within the 12s cooldown nothing new may fire even though the
        // interfaces are still offline.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count_resets(&transport.actions()), 1);

        node.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_holds_while_any_enabled_interface_is_online() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let (node, stack) = started_node(&mesh, dir.path()).await;
        let transport = stack.transport().unwrap();

        transport.add_interface("Default Interface", "AutoInterface", true);
        transport.add_interface("TCP Client Interface", "TCPClientInterface", false);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count_resets(&transport.actions()), 0);

        node.close().await;
    }

    fn count_resets(actions: &[String]) -> usize {
        actions
            .iter()
            .filter(|a| *a == "halt:Default Interface")
            .count()
    }
}
