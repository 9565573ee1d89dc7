//! Veth pair management for namespace bindings
//!
//! Veth pairs are virtual Ethernet links used to connect a namespace to
//! the host. One end stays on the host, the other is moved into the
//! namespace.

use crate::cmd::{Runner, tolerant};
use crate::error::Result;

/// Kernel limit on interface name length
const IFNAMSIZ: usize = 15;

/// Endpoint name prefixes; the host-side prefix doubles as the pattern
/// the reset manager matches against
const HOST_PREFIX: &str = "veth0_";
const PEER_PREFIX: &str = "veth1_";

/// A veth pair connecting a namespace to the host
#[derive(Debug, Clone)]
pub struct VethPair {
    /// Host-side endpoint name (e.g., "veth0_wlan0")
    host_side: String,
    /// Namespace-side endpoint name (e.g., "veth1_wlan0")
    peer_side: String,
}

impl VethPair {
    /// Endpoint names derived from the interface being bound
    pub fn for_interface(interface: &str) -> Self {
        let tag = sanitize_name(interface);
        Self {
            host_side: format!("{}{}", HOST_PREFIX, tag),
            peer_side: format!("{}{}", PEER_PREFIX, tag),
        }
    }

    /// Get the host-side endpoint name
    pub fn host_side(&self) -> &str {
        &self.host_side
    }

    /// Get the namespace-side endpoint name
    pub fn peer_side(&self) -> &str {
        &self.peer_side
    }

    /// True when `link` is a host-side endpoint created by this system
    pub fn matches_host_side(link: &str) -> bool {
        link.starts_with(HOST_PREFIX)
    }

    /// Create the pair, replacing any stale pair left by a prior run.
    ///
    /// A leftover host endpoint with the same name would make the add
    /// fail, so it is deleted first (absent is fine).
    pub fn create(&self, runner: &dyn Runner) -> Result<()> {
        delete_link(&self.host_side, runner)?;
        tolerant(
            runner,
            "veth create",
            "ip",
            &[
                "link",
                "add",
                &self.host_side,
                "type",
                "veth",
                "peer",
                "name",
                &self.peer_side,
            ],
        )?;
        Ok(())
    }

    /// Move the namespace-side endpoint into a namespace
    pub fn move_peer_to(&self, namespace: &str, runner: &dyn Runner) -> Result<bool> {
        tolerant(
            runner,
            "veth move",
            "ip",
            &["link", "set", &self.peer_side, "netns", namespace],
        )
    }

}

/// Delete a veth endpoint by name. Deleting either end removes both;
/// an absent link is success.
pub fn delete_link(link: &str, runner: &dyn Runner) -> Result<bool> {
    tolerant(runner, "link delete", "ip", &["link", "del", link])
}

/// Sanitize an interface name for embedding in an endpoint name.
///
/// Keeps alphanumerics and underscore and truncates so the endpoint name
/// fits the kernel limit.
fn sanitize_name(name: &str) -> String {
    let limit = IFNAMSIZ - HOST_PREFIX.len();
    let tag: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(limit)
        .collect();

    if tag.is_empty() { "if".to_string() } else { tag }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::testing::ScriptedRunner;

    #[test]
    fn test_endpoint_names() {
        let pair = VethPair::for_interface("wlan0");
        assert_eq!(pair.host_side(), "veth0_wlan0");
        assert_eq!(pair.peer_side(), "veth1_wlan0");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("wlan0"), "wlan0");
        assert_eq!(sanitize_name("wl-an0"), "wlan0");
        assert_eq!(sanitize_name("enp0s31f6xxxx"), "enp0s31f6");
        assert_eq!(sanitize_name(""), "if");
    }

    #[test]
    fn test_names_fit_kernel_limit() {
        let pair = VethPair::for_interface("enp0s31f6longname");
        assert!(pair.host_side().len() <= IFNAMSIZ);
        assert!(pair.peer_side().len() <= IFNAMSIZ);
    }

    #[test]
    fn test_create_deletes_stale_pair_first() {
        let runner = ScriptedRunner::new();
        let pair = VethPair::for_interface("wlan0");
        pair.create(&runner).unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], "ip link del veth0_wlan0");
        assert_eq!(
            calls[1],
            "ip link add veth0_wlan0 type veth peer name veth1_wlan0"
        );
    }

    #[test]
    fn test_host_side_pattern() {
        assert!(VethPair::matches_host_side("veth0_wlan0"));
        assert!(!VethPair::matches_host_side("veth1_wlan0"));
        assert!(!VethPair::matches_host_side("vethabc123"));
        assert!(!VethPair::matches_host_side("wlan0"));
    }
}
