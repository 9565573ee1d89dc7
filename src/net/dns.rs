//! Resolver configuration reading
//!
//! The system resolver list is informational: it is shown alongside the
//! interface inventory and is never required for routing setup, so every
//! failure here is non-fatal.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::warn;

/// Read nameserver addresses from a resolv.conf-style file.
///
/// Extracts `nameserver <ip>` lines and validates each address as an
/// IPv4/IPv6 literal. A missing file or malformed entries yield warnings
/// and are skipped; the result may be empty.
pub fn nameservers(path: &Path) -> Vec<IpAddr> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "resolver configuration unavailable");
            return Vec::new();
        }
    };

    let mut servers = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            continue;
        }

        match fields.next().map(str::parse::<IpAddr>) {
            Some(Ok(ip)) => servers.push(ip),
            _ => warn!(line, "skipping malformed nameserver entry"),
        }
    }

    servers
}
