//! On-disk layout and config templates.
//!
//! The node owns a state directory holding the daemon config, the identity,
//! router storage, and a nested transport config directory. Both config
//! files are written once from embedded templates and treated as
//! user-owned afterwards: ensure operations never clobber an existing file,
//! and targeted edits go through [`conffile`] so the rest of the file
//! survives.

mod conffile;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use conffile::{ConfigFile, Section, Subsection};
pub(crate) use conffile::truthy;

/// Resolved paths under the node state directory.
#[derive(Debug, Clone)]
pub struct DiskLayout {
    /// The state directory itself.
    pub config_dir: PathBuf,
    /// Daemon config file.
    pub config_path: PathBuf,
    /// Identity private-key file.
    pub identity_path: PathBuf,
    /// Router storage root.
    pub storage_dir: PathBuf,
    /// Transport config directory.
    pub transport_config_dir: PathBuf,
    /// Transport config file.
    pub transport_config_path: PathBuf,
}

impl DiskLayout {
    /// Resolve the layout for a state directory.
    pub fn resolve(dir: &Path) -> Self {
        Self {
            config_dir: dir.to_path_buf(),
            config_path: dir.join("config"),
            identity_path: dir.join("identity"),
            storage_dir: dir.join("storage"),
            transport_config_dir: dir.join("rns"),
            transport_config_path: dir.join("rns").join("config"),
        }
    }
}

/// Daemon config template. `display_name` defaults to "Me" when empty.
pub fn default_daemon_config_text(display_name: &str) -> String {
    let display_name = if display_name.is_empty() {
        "Me"
    } else {
        display_name
    };
    format!(
        "[propagation]\n\
         enable_node = no\n\
         announce_interval = 360\n\
         announce_at_start = yes\n\
         autopeer = yes\n\
         autopeer_maxdepth = 4\n\
         \n\
         [lxmf]\n\
         display_name = {display_name}\n\
         announce_at_start = no\n\
         delivery_transfer_max_accepted_size = 1000\n\
         \n\
         [logging]\n\
         loglevel = 4\n"
    )
}

/// Transport config template with an AutoInterface default and a TCP
/// client pointed at the public fallback hub.
pub fn default_transport_config_text(log_level: u8) -> String {
    let log_level = log_level.min(7);
    format!(
        "[reticulum]\n\
         enable_transport = False\n\
         share_instance = False\n\
         instance_name = default\n\
         \n\
         [logging]\n\
         loglevel = {log_level}\n\
         \n\
         [interfaces]\n\
         \x20\x20[[Default Interface]]\n\
         \x20\x20\x20\x20type = AutoInterface\n\
         \x20\x20\x20\x20interface_enabled = Yes\n\
         \x20\x20\x20\x20ingress_control = no\n\
         \n\
         \x20\x20[[TCP Client Interface]]\n\
         \x20\x20\x20\x20type = TCPClientInterface\n\
         \x20\x20\x20\x20interface_enabled = Yes\n\
         \x20\x20\x20\x20target_host = amsterdam.connect.reticulum.network\n\
         \x20\x20\x20\x20target_port = 4965\n"
    )
}

/// Write the daemon config from the template when it does not exist.
/// A present file is user-owned and left untouched.
pub fn ensure_daemon_config(dir: &Path, display_name: &str) -> io::Result<DiskLayout> {
    let layout = DiskLayout::resolve(dir);
    fs::create_dir_all(&layout.config_dir)?;
    if !layout.config_path.exists() {
        fs::write(
            &layout.config_path,
            default_daemon_config_text(display_name),
        )?;
    }
    Ok(layout)
}

/// Persist the profile display name into the daemon config.
pub fn update_display_name(dir: &Path, display_name: &str) -> io::Result<()> {
    let layout = ensure_daemon_config(dir, display_name)?;
    let mut config = ConfigFile::load(&layout.config_path)?;
    let name = if display_name.is_empty() {
        "Me"
    } else {
        display_name
    };
    config.section_mut("lxmf").set("display_name", name);
    config.save(&layout.config_path)
}

/// Produce the transport config directory for the node.
///
/// An externally supplied directory is used as-is. Otherwise the config
/// lives under `<dir>/rns`; the template is written when the file is
/// missing (or unconditionally when `reset` is set), and missing
/// AutoInterface defaults are filled in either way.
pub fn prepare_transport_config(
    layout: &DiskLayout,
    external_dir: Option<&Path>,
    log_level: u8,
    reset: bool,
) -> io::Result<PathBuf> {
    if let Some(external) = external_dir {
        return Ok(external.to_path_buf());
    }

    fs::create_dir_all(&layout.transport_config_dir)?;
    let path = &layout.transport_config_path;

    if reset || !path.exists() {
        fs::write(path, default_transport_config_text(log_level))?;
    }
    ensure_auto_interface_defaults(path)?;

    Ok(layout.transport_config_dir.clone())
}

/// Fill in safe defaults for a generated AutoInterface without clobbering
/// explicit user config.
pub fn ensure_auto_interface_defaults(config_path: &Path) -> io::Result<()> {
    let mut config = ConfigFile::load(config_path)?;
    if !config.has_section("interfaces") {
        return Ok(());
    }

    let section = config.section_mut("interfaces");
    let iface = section.subsection_mut("Default Interface");
    let kind = iface.get("type").unwrap_or_default();
    if !kind.eq_ignore_ascii_case("AutoInterface") {
        return Ok(());
    }

    let mut changed = false;

    match iface.get("devices").map(str::to_string) {
        None => {
            let devices = auto_interface_devices(&system_interface_names());
            if !devices.is_empty() {
                iface.set("devices", &devices.join(", "));
                changed = true;
            }
        }
        Some(pinned) => {
            // Virtual interfaces (utun*, awdl0) break multicast discovery;
            // strip them from user-pinned lists.
            let filtered: Vec<String> = pinned
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty() && !is_virtual_device(name))
                .map(str::to_string)
                .collect();
            let filtered = if filtered.is_empty() {
                auto_interface_devices(&system_interface_names())
            } else {
                filtered
            };
            let normalized = filtered.join(", ");
            if !normalized.is_empty() && normalized != pinned.trim() {
                iface.set("devices", &normalized);
                changed = true;
            }
        }
    }

    if iface.get("ingress_control").unwrap_or_default().is_empty() {
        iface.set("ingress_control", "no");
        changed = true;
    }

    if changed {
        config.save(config_path)?;
    }
    Ok(())
}

/// Filter system interface names down to the conservative allowlist of
/// typical Wi-Fi/Ethernet/cellular devices.
pub fn auto_interface_devices(system_names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = system_names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && !is_virtual_device(name))
        .filter(|name| {
            ["en", "eth", "wlan", "wlp", "wl", "pdp_ip"]
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .map(str::to_string)
        .collect();
    out.sort();
    out.dedup();
    out
}

fn is_virtual_device(name: &str) -> bool {
    name.starts_with("utun") || name == "awdl0"
}

/// Enumerate system network interface names.
#[cfg(target_os = "linux")]
pub fn system_interface_names() -> Vec<String> {
    match fs::read_dir("/sys/class/net") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Enumerate system network interface names.
#[cfg(not(target_os = "linux"))]
pub fn system_interface_names() -> Vec<String> {
    Vec::new()
}
