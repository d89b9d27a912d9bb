//! Session metadata snapshot: the only I/O the platform probe performs.
//!
//! Reads environment variables, `/proc/*/comm`, and the XDG data dirs
//! once. Detection itself (`super::detect`) is a pure function of this
//! snapshot so it can be exercised without a live desktop.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

/// D-Bus activation file advertising the portal frontend.
const PORTAL_SERVICE_FILE: &str = "dbus-1/services/org.freedesktop.portal.Desktop.service";

/// Directory holding `*.portal` backend descriptions.
const PORTAL_BACKEND_DIR: &str = "xdg-desktop-portal/portals";

/// GNOME release metadata, relative to a data dir.
const GNOME_VERSION_FILE: &str = "gnome/gnome-version.xml";

/// One installed portal backend, parsed from its `.portal` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalBackend {
    /// Backend bus name (`DBusName=`).
    pub name: String,
    /// Implemented `org.freedesktop.impl.portal.*` interfaces.
    pub interfaces: Vec<String>,
    /// Desktops the backend declares itself for (`UseIn=`), lowercased.
    pub use_in: Vec<String>,
}

/// Snapshot of everything the probe needs to know about the session.
#[derive(Debug, Clone, Default)]
pub struct SessionEnvironment {
    pub vars: HashMap<String, String>,
    /// Command names of running processes.
    pub processes: Vec<String>,
    /// Whether the portal frontend service is advertised.
    pub portal_service: bool,
    pub portal_backends: Vec<PortalBackend>,
    /// GNOME platform version (`"48"`, `"47.2"`), if installed.
    pub gnome_version: Option<String>,
}

impl SessionEnvironment {
    /// Capture the current process environment and session metadata.
    pub fn capture() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let dirs = data_dirs(&vars);
        let mut env = Self::from_data_dirs(vars, &dirs);
        env.processes = running_processes(Path::new("/proc"));
        env
    }

    /// Build a snapshot from explicit variables and data dirs.
    ///
    /// Process names are left empty.
    pub fn from_data_dirs(vars: HashMap<String, String>, dirs: &[PathBuf]) -> Self {
        let portal_service = dirs.iter().any(|d| d.join(PORTAL_SERVICE_FILE).is_file());

        let mut portal_backends = Vec::new();
        for dir in dirs {
            let Ok(entries) = fs::read_dir(dir.join(PORTAL_BACKEND_DIR)) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("portal") {
                    continue;
                }
                match fs::read_to_string(&path) {
                    Ok(contents) => {
                        if let Some(backend) = parse_portal_file(&contents) {
                            portal_backends.push(backend);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "unreadable portal file");
                    }
                }
            }
        }

        let gnome_version = dirs.iter().find_map(|d| {
            fs::read_to_string(d.join(GNOME_VERSION_FILE))
                .ok()
                .and_then(|xml| parse_gnome_version(&xml))
        });

        Self {
            vars,
            processes: Vec::new(),
            portal_service,
            portal_backends,
            gnome_version,
        }
    }

    /// Look up a non-empty environment variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether a process with this command name is running.
    pub fn has_process(&self, name: &str) -> bool {
        self.processes.iter().any(|p| p == name)
    }
}

/// XDG data dirs in lookup order: `$XDG_DATA_HOME` then `$XDG_DATA_DIRS`.
fn data_dirs(vars: &HashMap<String, String>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    match vars.get("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        Some(home) => dirs.push(PathBuf::from(home)),
        None => {
            if let Some(home) = vars.get("HOME").filter(|v| !v.is_empty()) {
                dirs.push(Path::new(home).join(".local/share"));
            }
        }
    }

    let system = vars
        .get("XDG_DATA_DIRS")
        .filter(|v| !v.is_empty())
        .map(String::as_str)
        .unwrap_or("/usr/local/share:/usr/share");
    dirs.extend(
        system
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
    );

    dirs
}

/// Parse a `.portal` key file. Returns `None` without a `DBusName`.
fn parse_portal_file(contents: &str) -> Option<PortalBackend> {
    let mut name = None;
    let mut interfaces = Vec::new();
    let mut use_in = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let list = || {
            value
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        match key.trim() {
            "DBusName" => name = Some(value.trim().to_string()),
            "Interfaces" => interfaces = list(),
            "UseIn" => use_in = list().into_iter().map(|s| s.to_lowercase()).collect(),
            _ => {}
        }
    }

    Some(PortalBackend {
        name: name?,
        interfaces,
        use_in,
    })
}

/// Extract `<platform>.<minor>` from `gnome-version.xml`.
fn parse_gnome_version(xml: &str) -> Option<String> {
    let platform = Regex::new(r"<platform>\s*(\d+)\s*</platform>").ok()?;
    let minor = Regex::new(r"<minor>\s*(\d+)\s*</minor>").ok()?;

    let major = platform.captures(xml)?.get(1)?.as_str();
    match minor.captures(xml).and_then(|c| c.get(1)) {
        Some(m) => Some(format!("{major}.{}", m.as_str())),
        None => Some(major.to_string()),
    }
}

/// Command names of all processes visible under `proc_root`.
fn running_processes(proc_root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|e| e.file_name().to_str().is_some_and(is_pid))
        .filter_map(|e| fs::read_to_string(e.path().join("comm")).ok())
        .map(|comm| comm.trim().to_string())
        .filter(|comm| !comm.is_empty())
        .collect()
}

fn is_pid(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}
