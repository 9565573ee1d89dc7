//! Aggregate results for best-effort multi-step flows
//!
//! Routing setup, binding, and reset all run ordered sequences of
//! independently-failing kernel mutations. Instead of aborting (or only
//! logging), each flow records its failed sub-steps and returns them to
//! the caller.

use crate::error::Result;
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// One failed sub-step inside a best-effort sequence
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    /// Short name of the sub-step (e.g. "default route")
    pub operation: String,
    /// What went wrong
    pub detail: String,
}

impl StepFailure {
    pub fn new(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.detail)
    }
}

/// Record a failed sub-step and keep going.
///
/// Successful results pass through as `Some`; failures are warn-logged,
/// appended to `failures`, and collapsed to `None` so the sequence
/// continues.
pub fn best_effort<T>(
    failures: &mut Vec<StepFailure>,
    operation: &str,
    result: Result<T>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "step failed, continuing");
            failures.push(StepFailure::new(operation, e.to_string()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_best_effort_records_and_continues() {
        let mut failures = Vec::new();

        let ok = best_effort(&mut failures, "first", Ok(1));
        let err: Option<()> = best_effort(
            &mut failures,
            "second",
            Err(Error::KernelOperation {
                operation: "second".to_string(),
                message: "denied".to_string(),
            }),
        );

        assert_eq!(ok, Some(1));
        assert!(err.is_none());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "second");
    }
}
