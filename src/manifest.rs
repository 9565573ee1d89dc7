//! Configuration file parsing for moor
//!
//! Parses the optional `moor.toml` settings file using serde. Every field
//! has a default; a missing file yields the default settings.

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Routing table ids 253-255 are reserved by iproute2 (default, main,
/// local); managed tables must be allocated below them.
const RESERVED_TABLE_FLOOR: u32 = 253;

/// Load settings from a file, falling back to defaults when it is absent
pub fn load(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

/// Tunable settings for moor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Routing table registry file
    pub registry_path: PathBuf,

    /// Resolver configuration file
    pub resolver_path: PathBuf,

    /// First table id handed out by bulk routing setup
    pub base_table_id: u32,

    /// Rule priority base; each rule lands at base + table id
    pub base_priority: u32,

    /// Convenience subnet for namespace bindings (host gets .1, the
    /// namespace gets .2)
    pub bind_subnet: Ipv4Net,

    /// Install a NAT masquerade rule for namespace-originated traffic
    pub masquerade: bool,

    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("/etc/iproute2/rt_tables"),
            resolver_path: PathBuf::from("/etc/resolv.conf"),
            base_table_id: 100,
            base_priority: 1000,
            bind_subnet: "10.200.1.0/24".parse().expect("valid default subnet"),
            masquerade: true,
            command_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Per-command timeout as a Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.base_table_id == 0 || self.base_table_id >= RESERVED_TABLE_FLOOR {
            return Err(Error::ConfigValidation(format!(
                "base_table_id must be between 1 and {}",
                RESERVED_TABLE_FLOOR - 1
            )));
        }

        if self.command_timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "command_timeout_secs must be non-zero".to_string(),
            ));
        }

        // Need distinct host and namespace addresses inside the subnet
        if self.bind_subnet.prefix_len() > 30 {
            return Err(Error::ConfigValidation(format!(
                "bind_subnet {} is too small for a veth pair",
                self.bind_subnet
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_file_absent() {
        let settings = load(Path::new("/nonexistent/moor.toml")).unwrap();
        assert_eq!(settings.base_table_id, 100);
        assert_eq!(settings.base_priority, 1000);
        assert_eq!(settings.registry_path, PathBuf::from("/etc/iproute2/rt_tables"));
        assert!(settings.masquerade);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_table_id = 200\nmasquerade = false").unwrap();

        let settings = load(file.path()).unwrap();
        assert_eq!(settings.base_table_id, 200);
        assert!(!settings.masquerade);
        assert_eq!(settings.command_timeout_secs, 10);
    }

    #[test]
    fn test_rejects_reserved_table_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_table_id = 254").unwrap();

        assert!(matches!(load(file.path()), Err(Error::ConfigValidation(_))));
    }

    #[test]
    fn test_rejects_tiny_bind_subnet() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_subnet = \"10.200.1.0/31\"").unwrap();

        assert!(matches!(load(file.path()), Err(Error::ConfigValidation(_))));
    }
}
