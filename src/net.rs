//! Network state discovery and namespace plumbing
//!
//! Provides:
//! - Interface inventory via structured kernel-state queries
//! - Resolver configuration reading
//! - Network namespace management
//! - Veth pair creation for namespace bindings

pub mod dns;
pub mod inventory;
pub mod netns;
pub mod veth;

pub use inventory::{InterfaceKind, LinkState, NetworkInterface};
pub use netns::Namespace;
pub use veth::VethPair;
