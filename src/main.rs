//! moor - pin application traffic to a chosen network interface
//!
//! Discovers interface state, installs per-interface policy routing, and
//! confines applications to network namespaces wired to the host through
//! veth pairs.

mod binder;
mod cli;
mod cmd;
mod error;
mod manifest;
mod net;
mod registry;
mod report;
mod reset;
mod routing;

use binder::Binder;
use cli::{Cli, Commands};
use cmd::SystemRunner;
use error::{Error, Result};
use net::NetworkInterface;
use registry::Registry;
use reset::ResetManager;
use routing::PolicyRouter;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Commands::Completion { shell } = &cli.command {
        Cli::generate_completion(*shell);
        return Ok(());
    }

    let settings = manifest::load(&cli.config)?;
    let runner = SystemRunner::new(settings.command_timeout());

    match cli.command {
        Commands::Completion { .. } => unreachable!("handled above"),

        Commands::List { all, json } => {
            let interfaces = net::inventory::enumerate(&runner)?;
            let shown: Vec<&NetworkInterface> = interfaces
                .iter()
                .filter(|i| all || i.is_up())
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else if shown.is_empty() {
                println!("No active network interfaces found.");
            } else {
                print_interfaces(&shown);
            }
        }

        Commands::Dns { json } => {
            let servers = net::dns::nameservers(&settings.resolver_path);
            if json {
                println!("{}", serde_json::to_string_pretty(&servers)?);
            } else if servers.is_empty() {
                println!("No DNS servers found.");
            } else {
                println!("System DNS servers:");
                for server in servers {
                    println!("  {}", server);
                }
            }
        }

        Commands::Setup { iface, dry_run } => {
            if !dry_run {
                require_root()?;
            }
            let interfaces = net::inventory::enumerate(&runner)?;
            let (mut planned, mut skipped) =
                routing::plan(&interfaces, settings.base_table_id, settings.base_priority);

            // A named interface must be fully eligible; bulk setup just
            // skips the ones that are not. The interface keeps the table
            // id the bulk allocation would give it.
            if let Some(name) = &iface {
                let selected = interfaces
                    .iter()
                    .find(|i| &i.name == name)
                    .ok_or_else(|| Error::InterfaceNotFound(name.clone()))?;
                if !selected.is_up() {
                    return Err(Error::InterfaceDown(name.clone()));
                }
                if selected.primary_ipv4().is_none() {
                    return Err(Error::MissingAddress(name.clone()));
                }
                if selected.first_gateway().is_none() {
                    return Err(Error::MissingGateway(name.clone()));
                }
                planned.retain(|p| &p.interface == name);
                skipped.clear();
            }

            if dry_run {
                println!("=== DRY RUN - No changes will be made ===\n");
                for p in &planned {
                    println!(
                        "Would route {} ({}) via {} [table {}, priority {}]",
                        p.interface, p.address, p.gateway, p.table_id, p.priority
                    );
                }
                for (name, reason) in &skipped {
                    println!("Would skip {}: {}", name, reason);
                }
                return Ok(());
            }

            let registry = Registry::new(&settings.registry_path);
            let router = PolicyRouter::new(&runner, registry, settings.base_priority);
            let report = match iface {
                Some(_) => routing::SetupReport {
                    routes: router.install(&planned),
                    skipped,
                },
                None => router.setup_all(&interfaces, settings.base_table_id),
            };

            for route in &report.routes {
                println!(
                    "Routing set for {} ({}) via {} [table {}, priority {}]",
                    route.interface, route.address, route.gateway, route.table_id, route.priority
                );
                for failure in &route.failures {
                    println!("  [!] {}", failure);
                }
            }
            if report.routes.is_empty() {
                println!("No eligible interfaces for routing setup.");
            }
            if !report.skipped.is_empty() {
                println!("Skipped {} interface(s).", report.skipped.len());
            }
            if !report.is_clean() {
                println!(
                    "{} step(s) failed; rerunning 'setup' retries them.",
                    report.failure_count()
                );
            }
        }

        Commands::Bind { app, iface } => {
            require_root()?;

            let interfaces = net::inventory::enumerate(&runner)?;
            if !interfaces.iter().any(|i| i.name == iface) {
                return Err(Error::InterfaceNotFound(iface));
            }

            let mut binder = Binder::new(&runner, settings.bind_subnet, settings.masquerade);
            let report = binder.bind(&app, &iface)?;

            println!(
                "Bound '{}' to '{}' in namespace '{}'.",
                app, iface, report.binding.namespace
            );
            match report.binding.pid {
                Some(pid) => println!("Application launched (pid {}).", pid),
                None => println!("Application was not launched."),
            }
            for failure in &report.failures {
                println!("  [!] {}", failure);
            }
        }

        Commands::Clear => {
            require_root()?;

            let registry = Registry::new(&settings.registry_path);
            if !registry.has_managed()? {
                println!("No managed routing tables found.");
                return Ok(());
            }

            let report = registry.clear_managed(&runner)?;
            println!("Cleared {} routing table(s):", report.removed.len());
            for entry in &report.removed {
                println!("  {} {}", entry.id, entry.name);
            }
            for failure in &report.failures {
                println!("  [!] {}", failure);
            }
        }

        Commands::Reset => {
            require_root()?;

            let registry = Registry::new(&settings.registry_path);
            let mut binder = Binder::new(&runner, settings.bind_subnet, settings.masquerade);
            let manager = ResetManager::new(&runner, registry, settings.bind_subnet);
            let report = manager.reset(&mut binder)?;

            println!(
                "Reset complete: {} table(s), {} link(s), {} namespace(s) removed.",
                report.cleared_tables.len(),
                report.removed_links.len(),
                report.removed_namespaces.len()
            );
            for failure in &report.failures {
                println!("  [!] {}", failure);
            }
        }
    }

    Ok(())
}

fn print_interfaces(interfaces: &[&NetworkInterface]) {
    for iface in interfaces {
        println!("\nInterface: {}", iface.name);
        println!("  Status: {}", iface.state);
        println!("  Type: {}", iface.kind);
        if let Some(ref mac) = iface.mac {
            println!("  MAC Address: {}", mac);
        }
        if !iface.addresses.is_empty() {
            let addresses: Vec<String> = iface.addresses.iter().map(|a| a.to_string()).collect();
            println!("  IP Addresses: {}", addresses.join(", "));
        }
        if let Some(metric) = iface.metric {
            println!("  Metric: {}", metric);
        }
        if !iface.gateways.is_empty() {
            let gateways: Vec<String> = iface.gateways.iter().map(|g| g.to_string()).collect();
            println!("  Gateways: {}", gateways.join(", "));
        }
    }
}

/// Mutating commands need root for the whole process lifetime; there is
/// no per-operation re-escalation.
fn require_root() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(Error::NotRoot);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "moor=debug" } else { "moor=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
