//! Namespace binder
//!
//! Confines an application to a dedicated network namespace wired to the
//! host through a veth pair on a fixed convenience subnet, then launches
//! the application there, detached. Routing setup is independent: the
//! binder only needs the interface name.

use crate::cmd::{Runner, checked, tolerant};
use crate::error::{Error, Result};
use crate::net::{Namespace, VethPair};
use crate::report::{StepFailure, best_effort};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::env;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Application classes whose internal sandboxing is incompatible with
/// external namespace confinement
const SANDBOXED_BROWSER_MARKERS: &[&str] = &["chromium"];

/// A recorded application/namespace association
#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub app: String,
    pub interface: String,
    pub namespace: String,
    /// Pid of the detached process, None when the launch step failed
    pub pid: Option<u32>,
}

/// Outcome of one bind, including any failed wiring steps
#[derive(Debug, Serialize)]
pub struct BindReport {
    pub binding: Binding,
    pub host_endpoint: String,
    pub namespace_endpoint: String,
    pub failures: Vec<StepFailure>,
}

/// Binds applications to interfaces via network namespaces
pub struct Binder<'a> {
    runner: &'a dyn Runner,
    subnet: Ipv4Net,
    masquerade: bool,
    scratch_base: PathBuf,
    bindings: Vec<Binding>,
}

impl<'a> Binder<'a> {
    pub fn new(runner: &'a dyn Runner, subnet: Ipv4Net, masquerade: bool) -> Self {
        Self {
            runner,
            subnet,
            masquerade,
            scratch_base: PathBuf::from(crate::net::netns::NETNS_CONFIG_DIR),
            bindings: Vec::new(),
        }
    }

    /// Override the per-namespace configuration directory
    #[cfg(test)]
    pub fn with_scratch_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.scratch_base = base.into();
        self
    }

    // Test-only accessor for verifying recorded bindings
    #[cfg(test)]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Forget all recorded bindings (kernel state is untouched)
    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    /// Validation that must pass before any kernel mutation.
    ///
    /// Sandboxed browser engines are rejected outright: their internal
    /// sandboxing breaks under external namespace confinement. A literal
    /// filesystem path must exist.
    pub fn preflight(app: &str) -> Result<()> {
        let lowered = app.to_lowercase();
        for marker in SANDBOXED_BROWSER_MARKERS {
            if lowered.contains(marker) {
                return Err(Error::ConfigConflict(
                    app.to_string(),
                    "its sandboxing architecture conflicts with network namespacing".to_string(),
                ));
            }
        }

        if app.contains('/') && !Path::new(app).exists() {
            return Err(Error::AppNotFound(PathBuf::from(app)));
        }

        Ok(())
    }

    /// Bind `app` to `interface` and launch it inside the namespace.
    ///
    /// Pre-flight failures abort before any kernel mutation. The wiring
    /// steps afterwards are best-effort and ordered; each failure is
    /// recorded in the report and later steps still run.
    pub fn bind(&mut self, app: &str, interface: &str) -> Result<BindReport> {
        Self::preflight(app)?;
        let (host_addr, peer_addr) = self.endpoint_addresses()?;

        let ns = Namespace::for_interface(interface);
        let veth = VethPair::for_interface(interface);
        let prefix = self.subnet.prefix_len();
        let mut failures = Vec::new();

        best_effort(&mut failures, "namespace create", ns.create(self.runner));
        best_effort(&mut failures, "veth create", veth.create(self.runner));
        best_effort(
            &mut failures,
            "veth move",
            veth.move_peer_to(ns.name(), self.runner),
        );

        // Host side of the pair
        let host_cidr = format!("{}/{}", host_addr, prefix);
        best_effort(
            &mut failures,
            "host address",
            tolerant(
                self.runner,
                "host address",
                "ip",
                &["addr", "add", &host_cidr, "dev", veth.host_side()],
            ),
        );
        best_effort(
            &mut failures,
            "host link up",
            tolerant(
                self.runner,
                "host link up",
                "ip",
                &["link", "set", veth.host_side(), "up"],
            ),
        );

        // Namespace side
        let peer_cidr = format!("{}/{}", peer_addr, prefix);
        best_effort(
            &mut failures,
            "namespace address",
            ns.run_ip_inside(
                self.runner,
                "namespace address",
                &["addr", "add", &peer_cidr, "dev", veth.peer_side()],
            ),
        );
        best_effort(
            &mut failures,
            "namespace link up",
            ns.run_ip_inside(
                self.runner,
                "namespace link up",
                &["link", "set", veth.peer_side(), "up"],
            ),
        );
        best_effort(
            &mut failures,
            "namespace loopback up",
            ns.run_ip_inside(
                self.runner,
                "namespace loopback up",
                &["link", "set", "lo", "up"],
            ),
        );
        best_effort(
            &mut failures,
            "namespace default route",
            ns.run_ip_inside(
                self.runner,
                "namespace default route",
                &["route", "add", "default", "via", &host_addr.to_string()],
            ),
        );

        if self.masquerade {
            best_effort(
                &mut failures,
                "masquerade",
                self.ensure_masquerade(interface),
            );
        }

        best_effort(
            &mut failures,
            "scratch dir",
            ns.prepare_scratch_dir(&self.scratch_base).map_err(Error::from),
        );

        let pid = best_effort(&mut failures, "launch", self.launch(&ns, app));

        let binding = Binding {
            app: app.to_string(),
            interface: interface.to_string(),
            namespace: ns.name().to_string(),
            pid,
        };
        self.bindings.push(binding.clone());

        info!(
            app,
            interface,
            namespace = ns.name(),
            failed_steps = failures.len(),
            "application bound"
        );

        Ok(BindReport {
            binding,
            host_endpoint: veth.host_side().to_string(),
            namespace_endpoint: veth.peer_side().to_string(),
            failures,
        })
    }

    /// Host gets the first usable address of the subnet, the namespace
    /// the second
    fn endpoint_addresses(&self) -> Result<(Ipv4Addr, Ipv4Addr)> {
        let mut hosts = self.subnet.hosts();
        match (hosts.next(), hosts.next()) {
            (Some(host), Some(peer)) => Ok((host, peer)),
            _ => Err(Error::InvalidAddress(
                self.subnet.to_string(),
                "subnet too small for a veth pair".to_string(),
            )),
        }
    }

    /// Install the NAT masquerade rule for namespace-originated traffic
    /// egressing `interface`. Probes first so repeated binds do not
    /// stack duplicate rules.
    fn ensure_masquerade(&self, interface: &str) -> Result<()> {
        let source = self.subnet.trunc().to_string();
        let probe = self.runner.run(
            "iptables",
            &["-t", "nat", "-C", "POSTROUTING", "-s", &source, "-o", interface, "-j", "MASQUERADE"],
        )?;
        if probe.success() {
            return Ok(());
        }

        checked(
            self.runner,
            "masquerade add",
            "iptables",
            &["-t", "nat", "-A", "POSTROUTING", "-s", &source, "-o", interface, "-j", "MASQUERADE"],
        )?;
        Ok(())
    }

    /// Launch the application detached inside the namespace, carrying
    /// the invoking session's display/auth environment so graphical
    /// output still reaches the desktop.
    fn launch(&self, ns: &Namespace, app: &str) -> Result<u32> {
        let display = env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
        let xauthority = env::var("XAUTHORITY").unwrap_or_else(|_| {
            let home = env::var("HOME").unwrap_or_else(|_| "/root".to_string());
            format!("{}/.Xauthority", home)
        });

        self.runner.spawn_detached(
            "ip",
            &["netns", "exec", ns.name(), app],
            &[
                ("DISPLAY".to_string(), display),
                ("XAUTHORITY".to_string(), xauthority),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::testing::ScriptedRunner;

    fn subnet() -> Ipv4Net {
        "10.200.1.0/24".parse().unwrap()
    }

    fn test_binder<'a>(runner: &'a ScriptedRunner, masquerade: bool) -> (Binder<'a>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let binder = Binder::new(runner, subnet(), masquerade).with_scratch_base(dir.path());
        (binder, dir)
    }

    #[test]
    fn test_sandboxed_browser_rejected_before_any_mutation() {
        let runner = ScriptedRunner::new();
        let mut binder = Binder::new(&runner, subnet(), true);

        let err = binder.bind("chromium", "wlan0").unwrap_err();
        assert!(matches!(err, Error::ConfigConflict(_, _)));
        assert!(runner.calls().is_empty());
        assert!(binder.bindings().is_empty());
    }

    #[test]
    fn test_denylist_matching_is_case_insensitive() {
        assert!(Binder::preflight("/opt/Chromium/chrome").is_err());
        assert!(Binder::preflight("firefox").is_ok());
    }

    #[test]
    fn test_missing_path_rejected_before_any_mutation() {
        let runner = ScriptedRunner::new();
        let mut binder = Binder::new(&runner, subnet(), true);

        let err = binder.bind("/nonexistent/app", "wlan0").unwrap_err();
        assert!(matches!(err, Error::AppNotFound(_)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_bare_command_skips_path_validation() {
        // A command name is resolved via PATH inside the namespace, so
        // only literal paths are checked for existence
        assert!(Binder::preflight("some-obscure-tool").is_ok());
    }

    #[test]
    fn test_bind_wires_namespace_and_launches() {
        let runner = ScriptedRunner::new();
        let (mut binder, _dir) = test_binder(&runner, false);

        let report = binder.bind("firefox", "wlan0").unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(report.binding.namespace, "ns_wlan0");
        assert_eq!(report.host_endpoint, "veth0_wlan0");
        assert_eq!(report.binding.pid, Some(4242));
        assert_eq!(binder.bindings().len(), 1);

        let calls = runner.calls();
        let expect_order = [
            "ip netns add ns_wlan0",
            "ip link add veth0_wlan0 type veth peer name veth1_wlan0",
            "ip link set veth1_wlan0 netns ns_wlan0",
            "ip addr add 10.200.1.1/24 dev veth0_wlan0",
            "ip link set veth0_wlan0 up",
            "ip netns exec ns_wlan0 ip addr add 10.200.1.2/24 dev veth1_wlan0",
            "ip netns exec ns_wlan0 ip link set veth1_wlan0 up",
            "ip netns exec ns_wlan0 ip link set lo up",
            "ip netns exec ns_wlan0 ip route add default via 10.200.1.1",
            "spawn ip netns exec ns_wlan0 firefox",
        ];
        let mut last = 0;
        for expected in expect_order {
            let pos = calls
                .iter()
                .position(|c| c == expected)
                .unwrap_or_else(|| panic!("missing call: {}", expected));
            assert!(pos >= last, "out of order: {}", expected);
            last = pos;
        }
    }

    #[test]
    fn test_failed_step_recorded_but_bind_continues() {
        let runner = ScriptedRunner::new()
            .with_failure("ip link add veth0_wlan0", "RTNETLINK answers: Operation not permitted");
        let (mut binder, _dir) = test_binder(&runner, false);

        let report = binder.bind("firefox", "wlan0").unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, "veth create");
        // Later steps were still attempted
        assert!(runner.calls().iter().any(|c| c.contains("link set lo up")));
        assert!(runner.calls().iter().any(|c| c.starts_with("spawn ")));
    }

    #[test]
    fn test_masquerade_not_duplicated_when_present() {
        // Probe succeeds: rule already installed, no -A issued
        let runner = ScriptedRunner::new().with_stdout("iptables -t nat -C", "");
        let (mut binder, _dir) = test_binder(&runner, true);
        binder.bind("firefox", "wlan0").unwrap();

        assert!(
            runner
                .calls()
                .iter()
                .all(|c| !c.starts_with("iptables -t nat -A"))
        );
    }

    #[test]
    fn test_masquerade_added_when_absent() {
        let runner = ScriptedRunner::new().with_failure(
            "iptables -t nat -C",
            "iptables: Bad rule (does a matching rule exist in that chain?).",
        );
        let (mut binder, _dir) = test_binder(&runner, true);
        binder.bind("firefox", "wlan0").unwrap();

        assert!(runner.calls().contains(
            &"iptables -t nat -A POSTROUTING -s 10.200.1.0/24 -o wlan0 -j MASQUERADE".to_string()
        ));
    }
}
