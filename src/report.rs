//! Run reporting
//!
//! Each pass produces one [`PassReport`]: what was scanned, what the detector
//! flagged, what the executor applied and what verification found afterwards.
//! `Display` renders the plain-text summary printed to stdout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::executor::ExecutionSummary;
use crate::verify::Verification;

/// Counts for a single pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassCounts {
    pub scanned: usize,
    /// Entities needing a correction or review
    pub flagged: usize,
    pub planned_operations: usize,
    /// Correction groups committed
    pub fixed: usize,
    /// Correction groups in rejected chunks
    pub failed: usize,
    pub transform_errors: usize,
    pub for_review: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: PassCounts,
    /// Findings left for a person, capped at the sample limit
    pub review: Vec<String>,
    /// Transform errors, capped at the sample limit
    pub errors: Vec<String>,
    pub failed_entities: Vec<String>,
    /// `None` when the run applied nothing
    pub verification: Option<Verification>,
    pub dry_run: bool,
}

impl PassReport {
    pub fn new(pass: &str) -> Self {
        Self {
            pass: pass.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            counts: PassCounts::default(),
            review: Vec::new(),
            errors: Vec::new(),
            failed_entities: Vec::new(),
            verification: None,
            dry_run: false,
        }
    }

    pub fn record_execution(&mut self, summary: &ExecutionSummary) {
        self.counts.fixed = summary.groups_applied;
        self.counts.failed = summary.groups_failed;
        self.failed_entities = summary.failed_entities.clone();
        self.dry_run = summary.dry_run;
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// No rejected chunks; verification leftovers do not count against it
    pub fn is_success(&self) -> bool {
        self.counts.failed == 0
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(f, "== {}{} ==", self.pass, if self.dry_run { " (dry run)" } else { "" })?;
        writeln!(f, "  scanned:          {}", c.scanned)?;
        writeln!(f, "  flagged:          {}", c.flagged)?;
        writeln!(f, "  fixed:            {}", c.fixed)?;
        writeln!(f, "  failed:           {}", c.failed)?;
        if c.transform_errors > 0 {
            writeln!(f, "  transform errors: {}", c.transform_errors)?;
        }
        if c.for_review > 0 {
            writeln!(f, "  for review:       {}", c.for_review)?;
        }
        for line in self.review.iter().chain(&self.errors) {
            writeln!(f, "    - {}", line)?;
        }
        if !self.failed_entities.is_empty() {
            writeln!(f, "  failed entities:  {}", self.failed_entities.join(", "))?;
        }
        match &self.verification {
            Some(v) if v.is_clean() => writeln!(f, "  verification:     clean"),
            Some(v) => writeln!(f, "  verification:     {} remaining, re-run recommended", v.remaining),
            None if self.dry_run => writeln!(f, "  verification:     skipped (dry run)"),
            None => writeln!(f, "  verification:     nothing applied"),
        }
    }
}

/// Reports for every pass in a run, in execution order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<PassReport>,
    /// Pass that hit a fatal error, and the error
    pub aborted: Option<(String, String)>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.reports.iter().all(PassReport::is_success)
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            write!(f, "{}", report)?;
        }
        if let Some((pass, error)) = &self.aborted {
            writeln!(f, "== {} aborted ==", pass)?;
            writeln!(f, "  error: {}", error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_chunks_fail_the_run() {
        let mut report = PassReport::new("orphan-profiles");
        report.record_execution(&ExecutionSummary {
            groups_submitted: 3,
            groups_applied: 2,
            groups_failed: 1,
            failed_entities: vec!["profiles/p-9".to_string()],
            ..Default::default()
        });

        assert!(!report.is_success());
        let summary = RunSummary {
            reports: vec![report],
            aborted: None,
        };
        assert_eq!(summary.exit_code(), 1);
        assert!(summary.to_string().contains("profiles/p-9"));
    }

    #[test]
    fn test_remaining_violations_are_not_a_failure() {
        let mut report = PassReport::new("fix-approvals");
        report.verification = Some(Verification {
            remaining: 2,
            for_review: 0,
        });

        assert!(report.is_success());
        assert!(report.to_string().contains("2 remaining, re-run recommended"));
    }

    #[test]
    fn test_aborted_run_exits_non_zero() {
        let summary = RunSummary {
            reports: Vec::new(),
            aborted: Some(("check-references".into(), "store unreachable".into())),
        };
        assert_eq!(summary.exit_code(), 1);
        assert!(summary.to_string().contains("aborted"));
    }
}
