//! Network namespace management
//!
//! Namespaces are created per bound interface and outlive the moor
//! process; creation and deletion are both idempotent.

use crate::cmd::{Runner, tolerant};
use crate::error::Result;
use std::fs;
use std::io;
use std::path::Path;

/// Prefix for namespaces owned by moor
const NAMESPACE_PREFIX: &str = "ns_";

/// Where per-namespace configuration lives; files placed under
/// `<dir>/<namespace>` shadow their /etc counterparts inside it
pub const NETNS_CONFIG_DIR: &str = "/etc/netns";

/// A named network namespace
#[derive(Debug, Clone)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    /// The namespace serving a given interface. The name is derived
    /// deterministically so later invocations find it again.
    pub fn for_interface(interface: &str) -> Self {
        Self {
            name: format!("{}{}", NAMESPACE_PREFIX, interface),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the namespace. An already existing namespace is success;
    /// returns false in that case.
    pub fn create(&self, runner: &dyn Runner) -> Result<bool> {
        tolerant(runner, "namespace create", "ip", &["netns", "add", &self.name])
    }

    /// Delete the namespace. An absent namespace is success; returns
    /// false in that case.
    pub fn delete(&self, runner: &dyn Runner) -> Result<bool> {
        tolerant(runner, "namespace delete", "ip", &["netns", "del", &self.name])
    }

    /// Run an `ip` subcommand inside the namespace, tolerating
    /// already-in-state outcomes.
    pub fn run_ip_inside(
        &self,
        runner: &dyn Runner,
        operation: &str,
        args: &[&str],
    ) -> Result<bool> {
        let mut full: Vec<&str> = vec!["netns", "exec", &self.name, "ip"];
        full.extend_from_slice(args);
        tolerant(runner, operation, "ip", &full)
    }

    /// Create the per-namespace scratch directory under `base`
    /// (normally [`NETNS_CONFIG_DIR`])
    pub fn prepare_scratch_dir(&self, base: &Path) -> io::Result<()> {
        fs::create_dir_all(base.join(&self.name).join("tmp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::testing::ScriptedRunner;

    #[test]
    fn test_name_derivation() {
        let ns = Namespace::for_interface("wlan0");
        assert_eq!(ns.name(), "ns_wlan0");
    }

    #[test]
    fn test_create_tolerates_existing() {
        let runner = ScriptedRunner::new().with_failure(
            "ip netns add ns_wlan0",
            "Cannot create namespace file \"/var/run/netns/ns_wlan0\": File exists",
        );
        let ns = Namespace::for_interface("wlan0");
        assert!(!ns.create(&runner).unwrap());
    }

    #[test]
    fn test_delete_tolerates_absent() {
        let runner = ScriptedRunner::new().with_failure(
            "ip netns del ns_wlan0",
            "Cannot remove namespace file \"/var/run/netns/ns_wlan0\": No such file or directory",
        );
        let ns = Namespace::for_interface("wlan0");
        assert!(!ns.delete(&runner).unwrap());
    }

    #[test]
    fn test_run_ip_inside_wraps_command() {
        let runner = ScriptedRunner::new();
        let ns = Namespace::for_interface("wlan0");
        ns.run_ip_inside(&runner, "loopback up", &["link", "set", "lo", "up"])
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec!["ip netns exec ns_wlan0 ip link set lo up".to_string()]
        );
    }
}
