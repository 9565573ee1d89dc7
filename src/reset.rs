//! Reset manager
//!
//! Returns the host to its default state: managed routing tables and
//! their rules gone, moor-created veth pairs and namespaces deleted,
//! masquerade rules removed. Every step treats "not found" as success,
//! so reset can always be re-invoked.

use crate::binder::Binder;
use crate::cmd::Runner;
use crate::error::Result;
use crate::net::{Namespace, VethPair, inventory, veth};
use crate::registry::{Registry, RegistryEntry};
use crate::report::{StepFailure, best_effort};
use ipnet::Ipv4Net;
use serde::Serialize;
use tracing::info;

/// Outcome of a full reset
#[derive(Debug, Default, Serialize)]
pub struct ResetReport {
    /// Registry entries removed (tables flushed, rules deleted)
    pub cleared_tables: Vec<RegistryEntry>,
    /// Host-side veth endpoints deleted
    pub removed_links: Vec<String>,
    /// Namespaces deleted
    pub removed_namespaces: Vec<String>,
    /// Steps that failed; the reset still ran to completion
    pub failures: Vec<StepFailure>,
}

/// Tears down everything moor created
pub struct ResetManager<'a> {
    runner: &'a dyn Runner,
    registry: Registry,
    bind_subnet: Ipv4Net,
}

impl<'a> ResetManager<'a> {
    pub fn new(runner: &'a dyn Runner, registry: Registry, bind_subnet: Ipv4Net) -> Self {
        Self {
            runner,
            registry,
            bind_subnet,
        }
    }

    /// Undo routing setup and namespace bindings, and clear the binder's
    /// in-memory records. Kernel objects that are already gone are fine.
    pub fn reset(&self, binder: &mut Binder) -> Result<ResetReport> {
        let mut report = ResetReport::default();

        match self.registry.clear_managed(self.runner) {
            Ok(clear) => {
                report.cleared_tables = clear.removed;
                report.failures.extend(clear.failures);
            }
            Err(e) => report
                .failures
                .push(StepFailure::new("registry clear", e.to_string())),
        }

        // Inventory drives link, namespace, and NAT teardown; if it
        // fails the registry is already cleared and records still get
        // dropped below.
        let interfaces = best_effort(
            &mut report.failures,
            "interface enumeration",
            inventory::enumerate(self.runner),
        )
        .unwrap_or_default();

        for iface in &interfaces {
            if !VethPair::matches_host_side(&iface.name) {
                continue;
            }
            let deleted = best_effort(
                &mut report.failures,
                "link delete",
                veth::delete_link(&iface.name, self.runner),
            );
            if deleted == Some(true) {
                report.removed_links.push(iface.name.clone());
            }
        }

        for iface in &interfaces {
            let ns = Namespace::for_interface(&iface.name);
            let deleted = best_effort(
                &mut report.failures,
                "namespace delete",
                ns.delete(self.runner),
            );
            if deleted == Some(true) {
                report.removed_namespaces.push(ns.name().to_string());
            }
        }

        self.remove_masquerade_rules(&interfaces);

        binder.clear_bindings();

        info!(
            tables = report.cleared_tables.len(),
            links = report.removed_links.len(),
            namespaces = report.removed_namespaces.len(),
            "reset complete"
        );
        Ok(report)
    }

    /// Drop the bind-subnet masquerade rule on every interface it may
    /// have been installed for. A missing rule is the common case and
    /// ignored entirely.
    fn remove_masquerade_rules(&self, interfaces: &[inventory::NetworkInterface]) {
        let source = self.bind_subnet.trunc().to_string();
        for iface in interfaces {
            if VethPair::matches_host_side(&iface.name) {
                continue;
            }
            let _ = self.runner.run(
                "iptables",
                &["-t", "nat", "-D", "POSTROUTING", "-s", &source, "-o", &iface.name, "-j", "MASQUERADE"],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::testing::ScriptedRunner;
    use std::fs;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LINKS: &str = r#"[
        {"ifname": "lo", "flags": ["LOOPBACK", "UP"], "link_type": "loopback"},
        {"ifname": "wlan0", "flags": ["UP"], "link_type": "ether", "address": "aa:bb:cc:dd:ee:ff"},
        {"ifname": "veth0_wlan0", "flags": ["UP"], "link_type": "ether", "address": "02:42:00:00:00:01"}
    ]"#;

    fn registry_with_managed() -> (NamedTempFile, Registry) {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "254\tmain").unwrap();
        writeln!(file, "100 wlan0_rt").unwrap();
        let registry = Registry::new(file.path());
        (file, registry)
    }

    fn scripted() -> ScriptedRunner {
        ScriptedRunner::new()
            .with_stdout("ip -j link show", LINKS)
            .with_failure(
                "ip rule del table 100",
                "RTNETLINK answers: No such file or directory",
            )
    }

    #[test]
    fn test_reset_tears_everything_down() {
        let (_file, registry) = registry_with_managed();
        let runner = scripted();
        let subnet: Ipv4Net = "10.200.1.0/24".parse().unwrap();
        let mut binder = Binder::new(&runner, subnet, true);

        let manager = ResetManager::new(&runner, registry, subnet);
        let report = manager.reset(&mut binder).unwrap();

        assert_eq!(report.cleared_tables.len(), 1);
        assert_eq!(report.removed_links, vec!["veth0_wlan0".to_string()]);
        // Namespaces are attempted for every enumerated interface name
        assert!(report.removed_namespaces.contains(&"ns_wlan0".to_string()));

        let calls = runner.calls();
        assert!(calls.contains(&"ip route flush table 100".to_string()));
        assert!(calls.contains(&"ip link del veth0_wlan0".to_string()));
        assert!(calls.contains(&"ip netns del ns_wlan0".to_string()));
        assert!(calls.contains(
            &"iptables -t nat -D POSTROUTING -s 10.200.1.0/24 -o wlan0 -j MASQUERADE".to_string()
        ));
    }

    #[test]
    fn test_reset_clears_binding_records() {
        let (_file, registry) = registry_with_managed();
        let runner = scripted();
        let subnet: Ipv4Net = "10.200.1.0/24".parse().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut binder = Binder::new(&runner, subnet, false).with_scratch_base(dir.path());
        binder.bind("firefox", "wlan0").unwrap();
        assert_eq!(binder.bindings().len(), 1);

        ResetManager::new(&runner, registry, subnet)
            .reset(&mut binder)
            .unwrap();
        assert!(binder.bindings().is_empty());
    }

    #[test]
    fn test_reset_survives_enumeration_failure() {
        let (file, registry) = registry_with_managed();
        let runner = ScriptedRunner::new()
            .with_failure("ip -j link show", "netlink: permission denied")
            .with_failure(
                "ip rule del table 100",
                "RTNETLINK answers: No such file or directory",
            );
        let subnet: Ipv4Net = "10.200.1.0/24".parse().unwrap();
        let mut binder = Binder::new(&runner, subnet, false);

        let report = ResetManager::new(&runner, registry, subnet)
            .reset(&mut binder)
            .unwrap();

        // The registry was still cleared and the failure surfaced
        assert_eq!(report.cleared_tables.len(), 1);
        assert!(report.failures.iter().any(|f| f.operation == "interface enumeration"));
        let content = fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "254\tmain\n");
    }

    #[test]
    fn test_reset_is_reinvocable() {
        let (_file, registry) = registry_with_managed();
        let runner = scripted();
        let subnet: Ipv4Net = "10.200.1.0/24".parse().unwrap();
        let mut binder = Binder::new(&runner, subnet, false);
        let manager = ResetManager::new(&runner, registry, subnet);

        manager.reset(&mut binder).unwrap();
        // Second run finds nothing managed and nothing to delete, and
        // still succeeds
        let report = manager.reset(&mut binder).unwrap();
        assert!(report.cleared_tables.is_empty());
    }
}
