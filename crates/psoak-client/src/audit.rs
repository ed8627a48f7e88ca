//! ---
//! psoak_section: "07-controller-client"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Allow-list audit of ERROR and WARN lines in the controller log."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

/// A log line at ERROR or WARN level that no allow-list pattern matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFinding {
    /// One-based line number within the scanned file.
    pub line_number: usize,
    pub line: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub scanned_lines: usize,
    /// ERROR/WARN lines matched by an allow-list pattern.
    pub allowed: usize,
    pub findings: Vec<LogFinding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Scans controller logs for unexpected errors and warnings.
#[derive(Debug, Clone)]
pub struct LogAudit {
    level: Regex,
    allowed: Vec<Regex>,
}

impl LogAudit {
    /// Compile the allow-list; any pattern that fails to compile is an error.
    pub fn new<S: AsRef<str>>(allowed_patterns: &[S]) -> Result<Self> {
        let level = Regex::new(r"\b(ERROR|WARN)\b").context("invalid level pattern")?;
        let allowed = allowed_patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern)
                    .with_context(|| format!("invalid allowed log pattern '{pattern}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { level, allowed })
    }

    pub fn scan_str(&self, contents: &str) -> AuditReport {
        let mut report = AuditReport::default();
        for (index, line) in contents.lines().enumerate() {
            report.scanned_lines += 1;
            if !self.level.is_match(line) {
                continue;
            }
            if self.allowed.iter().any(|pattern| pattern.is_match(line)) {
                report.allowed += 1;
                continue;
            }
            report.findings.push(LogFinding {
                line_number: index + 1,
                line: line.to_owned(),
            });
        }
        report
    }

    pub async fn scan_file(&self, path: &Path) -> Result<AuditReport> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read controller log {}", path.display()))?;
        let report = self.scan_str(&contents);
        if report.is_clean() {
            info!(
                path = %path.display(),
                scanned = report.scanned_lines,
                allowed = report.allowed,
                "controller log audit clean"
            );
        } else {
            warn!(
                path = %path.display(),
                findings = report.findings.len(),
                "controller log contains unexpected errors"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
2024-05-01T10:00:00Z  INFO reconciler: reconciled shard
2024-05-01T10:00:01Z  WARN scheduler: Many shards are waiting to reconcile
2024-05-01T10:00:02Z ERROR drain: Scheduling error when draining pageserver 3
2024-05-01T10:00:03Z ERROR persistence: database connection reset
2024-05-01T10:00:04Z  INFO http: ERRORS counter exported";

    #[test]
    fn flags_only_unlisted_errors_and_warnings() {
        let audit = LogAudit::new(&[
            ".*Many shards are waiting to reconcile",
            ".*Scheduling error when draining pageserver.*",
        ])
        .unwrap();
        let report = audit.scan_str(LOG);
        assert_eq!(report.scanned_lines, 5);
        assert_eq!(report.allowed, 2);
        assert_eq!(
            report.findings,
            vec![LogFinding {
                line_number: 4,
                line: "2024-05-01T10:00:03Z ERROR persistence: database connection reset".into(),
            }]
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = LogAudit::new(&["(unclosed"]).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }
}
