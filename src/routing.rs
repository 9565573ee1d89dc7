//! Policy routing engine
//!
//! Installs, per interface, a dedicated routing table (a scope-link
//! subnet route plus a default route via the interface gateway) and a
//! source-address rule pointing at it. Everything is flush-first and
//! idempotent, so re-running after a partial failure converges.

use crate::cmd::{Runner, tolerant};
use crate::net::NetworkInterface;
use crate::registry::{MANAGED_SUFFIX, Registry};
use crate::report::{StepFailure, best_effort};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, info};

/// Outcome of installing one interface's table + rule pair
#[derive(Debug, Serialize)]
pub struct RouteReport {
    pub interface: String,
    pub address: Ipv4Net,
    pub gateway: IpAddr,
    pub table_id: u32,
    pub priority: u32,
    pub failures: Vec<StepFailure>,
}

/// Why an interface was passed over during bulk setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Down,
    NoIpv4Address,
    NoGateway,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Down => "administratively down",
            SkipReason::NoIpv4Address => "no IPv4 address",
            SkipReason::NoGateway => "no discovered gateway",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate outcome of bulk routing setup
#[derive(Debug, Default, Serialize)]
pub struct SetupReport {
    pub routes: Vec<RouteReport>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl SetupReport {
    /// Total failed sub-steps across all interfaces
    pub fn failure_count(&self) -> usize {
        self.routes.iter().map(|r| r.failures.len()).sum()
    }

    /// True when every planned mutation succeeded
    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }
}

/// One allocation bulk setup would perform
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRoute {
    pub interface: String,
    pub address: Ipv4Net,
    pub gateway: IpAddr,
    pub table_id: u32,
    pub priority: u32,
}

/// Decide what bulk setup would do for `interfaces`, without touching
/// the kernel. Table ids are handed out from `base_table_id`, one per
/// eligible interface; rule priorities are base_priority + table id, so
/// they come out strictly increasing in allocation order.
pub fn plan(
    interfaces: &[NetworkInterface],
    base_table_id: u32,
    base_priority: u32,
) -> (Vec<PlannedRoute>, Vec<(String, SkipReason)>) {
    let mut planned = Vec::new();
    let mut skipped = Vec::new();
    let mut table_id = base_table_id;

    for iface in interfaces {
        match eligibility(iface) {
            Ok((address, gateway)) => {
                planned.push(PlannedRoute {
                    interface: iface.name.clone(),
                    address,
                    gateway,
                    table_id,
                    priority: base_priority + table_id,
                });
                table_id += 1;
            }
            Err(reason) => {
                debug!(interface = %iface.name, %reason, "skipped");
                skipped.push((iface.name.clone(), reason));
            }
        }
    }

    (planned, skipped)
}

fn eligibility(iface: &NetworkInterface) -> std::result::Result<(Ipv4Net, IpAddr), SkipReason> {
    if !iface.is_up() {
        return Err(SkipReason::Down);
    }
    let address = iface.primary_ipv4().ok_or(SkipReason::NoIpv4Address)?;
    let gateway = iface.first_gateway().ok_or(SkipReason::NoGateway)?;
    Ok((address, gateway))
}

/// Installs source-based policy routing
pub struct PolicyRouter<'a> {
    runner: &'a dyn Runner,
    registry: Registry,
    base_priority: u32,
}

impl<'a> PolicyRouter<'a> {
    pub fn new(runner: &'a dyn Runner, registry: Registry, base_priority: u32) -> Self {
        Self {
            runner,
            registry,
            base_priority,
        }
    }

    /// Install the table + rule pair for one interface.
    ///
    /// Flush-first: the table is emptied and any matching rule deleted
    /// before reinstalling, so a rerun with identical arguments leaves
    /// identical state. Each kernel mutation executes independently;
    /// failures are recorded in the report and later steps still run.
    pub fn setup_route(
        &self,
        interface: &str,
        address: Ipv4Net,
        gateway: IpAddr,
        table_id: u32,
    ) -> RouteReport {
        let priority = self.base_priority + table_id;
        let table = table_id.to_string();
        let prio = priority.to_string();
        let host = address.addr().to_string();
        let mut failures = Vec::new();

        let table_name = format!("{}{}", interface, MANAGED_SUFFIX);
        best_effort(
            &mut failures,
            "registry entry",
            self.registry.ensure(table_id, &table_name),
        );

        // Clear whatever a prior run reusing this id left behind
        best_effort(
            &mut failures,
            "table flush",
            tolerant(self.runner, "table flush", "ip", &["route", "flush", "table", &table]),
        );
        best_effort(
            &mut failures,
            "rule delete",
            tolerant(
                self.runner,
                "rule delete",
                "ip",
                &["rule", "del", "from", &host, "table", &table, "priority", &prio],
            ),
        );

        // Keep same-subnet traffic on-link instead of bouncing it
        // through the default route
        let network = address.trunc().to_string();
        best_effort(
            &mut failures,
            "subnet route",
            tolerant(
                self.runner,
                "subnet route",
                "ip",
                &["route", "add", &network, "dev", interface, "scope", "link", "table", &table],
            ),
        );

        let gw = gateway.to_string();
        best_effort(
            &mut failures,
            "default route",
            tolerant(
                self.runner,
                "default route",
                "ip",
                &["route", "add", "default", "via", &gw, "dev", interface, "table", &table],
            ),
        );

        best_effort(
            &mut failures,
            "source rule",
            tolerant(
                self.runner,
                "source rule",
                "ip",
                &["rule", "add", "from", &host, "table", &table, "priority", &prio],
            ),
        );

        info!(
            interface,
            table_id,
            priority,
            failed_steps = failures.len(),
            "policy route installed"
        );

        RouteReport {
            interface: interface.to_string(),
            address,
            gateway,
            table_id,
            priority,
            failures,
        }
    }

    /// Install every allocation in a previously computed plan
    pub fn install(&self, planned: &[PlannedRoute]) -> Vec<RouteReport> {
        planned
            .iter()
            .map(|p| self.setup_route(&p.interface, p.address, p.gateway, p.table_id))
            .collect()
    }

    /// Bulk setup: allocate table ids from `base_table_id` and install a
    /// route for every eligible interface. Ineligible interfaces are
    /// skipped silently, never an error.
    pub fn setup_all(&self, interfaces: &[NetworkInterface], base_table_id: u32) -> SetupReport {
        let (planned, skipped) = plan(interfaces, base_table_id, self.base_priority);
        let routes = self.install(&planned);
        SetupReport { routes, skipped }
    }
}
