//! Routing table registry
//!
//! Owns this system's entries in the shared iproute2 rt_tables file.
//! Entries whose name carries the reserved suffix are managed here;
//! every other line — reserved tables, comments, malformed lines — is
//! preserved byte-for-byte. The file is the sole source of truth for
//! ownership.

use crate::cmd::{Runner, tolerant};
use crate::error::Result;
use crate::report::{StepFailure, best_effort};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Names ending with this suffix mark registry entries owned by moor
pub const MANAGED_SUFFIX: &str = "_rt";

/// Upper bound on rule deletions per table when clearing; a table id is
/// never referenced by more than a handful of rules in practice
const MAX_RULES_PER_TABLE: usize = 64;

/// One `id name` registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub id: u32,
    pub name: String,
}

impl RegistryEntry {
    /// True when the entry is owned by moor
    pub fn is_managed(&self) -> bool {
        self.name.ends_with(MANAGED_SUFFIX)
    }
}

/// Outcome of clearing the managed entries
#[derive(Debug, Default, Serialize)]
pub struct ClearReport {
    /// Entries removed from the registry file
    pub removed: Vec<RegistryEntry>,
    /// Kernel teardown steps that failed
    pub failures: Vec<StepFailure>,
}

/// The rt_tables registry file
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    // Test-only accessor for verifying file contents
    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append `id name` unless that exact pair is already present.
    ///
    /// Idempotent, and never rewrites unrelated lines. A missing file is
    /// created. Returns true when an entry was appended.
    pub fn ensure(&self, id: u32, name: &str) -> Result<bool> {
        let content = self.read_or_empty()?;

        let present = content
            .lines()
            .filter_map(parse_line)
            .any(|entry| entry.id == id && entry.name == name);
        if present {
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if !content.is_empty() && !content.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{} {}", id, name)?;

        debug!(id, name, path = %self.path.display(), "registry entry added");
        Ok(true)
    }

    /// Entries whose name carries the managed suffix
    pub fn list_managed(&self) -> Result<Vec<RegistryEntry>> {
        let content = self.read_or_empty()?;
        Ok(content
            .lines()
            .filter_map(parse_line)
            .filter(RegistryEntry::is_managed)
            .collect())
    }

    /// True iff any managed entry exists
    pub fn has_managed(&self) -> Result<bool> {
        Ok(!self.list_managed()?.is_empty())
    }

    /// Remove every managed entry, tearing down its kernel state.
    ///
    /// For each removed entry the kernel routing table is flushed and
    /// every rule referencing its id deleted; teardown failures are
    /// collected in the report, not fatal. Non-managed lines are
    /// rewritten verbatim in their original order.
    pub fn clear_managed(&self, runner: &dyn Runner) -> Result<ClearReport> {
        let content = self.read_or_empty()?;

        let mut kept: Vec<&str> = Vec::new();
        let mut removed: Vec<RegistryEntry> = Vec::new();
        for line in content.lines() {
            match parse_line(line) {
                Some(entry) if entry.is_managed() => removed.push(entry),
                _ => kept.push(line),
            }
        }

        if removed.is_empty() {
            return Ok(ClearReport::default());
        }

        let mut failures = Vec::new();
        for entry in &removed {
            let table = entry.id.to_string();
            best_effort(
                &mut failures,
                "table flush",
                tolerant(runner, "table flush", "ip", &["route", "flush", "table", &table]),
            );
            best_effort(
                &mut failures,
                "rule teardown",
                delete_rules_for_table(runner, entry.id),
            );
        }

        let mut rewritten = kept.join("\n");
        if !rewritten.is_empty() {
            rewritten.push('\n');
        }
        fs::write(&self.path, rewritten)?;

        info!(count = removed.len(), path = %self.path.display(), "managed routing tables cleared");
        Ok(ClearReport { removed, failures })
    }

    fn read_or_empty(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Delete every rule referencing a table id. The kernel removes one rule
/// per delete, so this repeats until "not found".
fn delete_rules_for_table(runner: &dyn Runner, table_id: u32) -> Result<usize> {
    let table = table_id.to_string();
    let mut deleted = 0;

    for _ in 0..MAX_RULES_PER_TABLE {
        if !tolerant(runner, "rule delete", "ip", &["rule", "del", "table", &table])? {
            break;
        }
        deleted += 1;
    }

    Ok(deleted)
}

/// Parse a well-formed two-field `id name` line. Comments, blanks, and
/// malformed lines (including any with extra fields) yield None and are
/// preserved untouched by the rewrite.
fn parse_line(line: &str) -> Option<RegistryEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let mut fields = trimmed.split_whitespace();
    let id = fields.next()?.parse().ok()?;
    let name = fields.next()?.to_string();
    if fields.next().is_some() {
        return None;
    }

    Some(RegistryEntry { id, name })
}
