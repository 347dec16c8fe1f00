//! Pass runner
//!
//! Drives one pass through detect, plan preview, chunked apply and verify.
//! Every pass receives the same injected store; nothing else is shared between
//! passes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::executor::{BatchExecutor, ExecutorConfig};
use crate::operation::OperationGroup;
use crate::passes::Pass;
use crate::report::{PassReport, RunSummary};
use crate::scanner::Scanner;
use crate::store::EntityStore;
use crate::verify::Verifier;

pub struct Reconciler {
    scanner: Scanner,
    executor: BatchExecutor,
    verifier: Verifier,
    sample_limit: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EntityStore>, executor_config: ExecutorConfig, sample_limit: usize) -> Self {
        let scanner = Scanner::new(store.clone());
        Self {
            verifier: Verifier::new(scanner.clone()),
            executor: BatchExecutor::new(store, executor_config),
            scanner,
            sample_limit,
        }
    }

    /// Run one pass; `Err` only when a scan fails
    pub async fn run(&self, pass: &dyn Pass) -> Result<PassReport> {
        let now = Utc::now();
        let mut report = PassReport::new(pass.name());
        info!(pass = pass.name(), description = pass.description(), "Starting pass");

        let detection = pass.detect(&self.scanner, now).await?;
        for err in &detection.errors {
            warn!(pass = pass.name(), error = %err, "Transform error");
        }

        report.counts.scanned = detection.scanned;
        report.counts.flagged = detection.flagged();
        report.counts.planned_operations = detection.planned_operations();
        report.counts.transform_errors = detection.errors.len();
        report.counts.for_review = detection.review.len();
        report.review = detection.review.iter().take(self.sample_limit).cloned().collect();
        report.errors = detection
            .errors
            .iter()
            .take(self.sample_limit)
            .map(ToString::to_string)
            .collect();

        self.print_plan(pass.name(), &detection.groups);

        let summary = self.executor.execute(pass.name(), &detection.groups).await;
        report.record_execution(&summary);

        if !summary.dry_run && summary.groups_submitted > 0 {
            report.verification = Some(self.verifier.verify(pass, now).await?);
        }

        report.complete();
        info!(
            pass = pass.name(),
            scanned = report.counts.scanned,
            flagged = report.counts.flagged,
            fixed = report.counts.fixed,
            failed = report.counts.failed,
            "Pass complete"
        );
        Ok(report)
    }

    /// Run passes in order, stopping at the first fatal error
    pub async fn run_all(&self, passes: &[Box<dyn Pass>]) -> RunSummary {
        let mut summary = RunSummary::default();
        for pass in passes {
            match self.run(pass.as_ref()).await {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    error!(pass = pass.name(), error = %e, "Pass aborted");
                    summary.aborted = Some((pass.name().to_string(), e.to_string()));
                    break;
                }
            }
        }
        summary
    }

    /// Counts and a sample of affected records, before anything is applied
    fn print_plan(&self, pass: &str, groups: &[OperationGroup]) {
        if groups.is_empty() {
            return;
        }
        let deletes = groups.iter().filter(|g| g.is_destructive()).count();
        println!(
            "{}: {} correction(s) planned, {} delete(s)",
            pass,
            groups.len(),
            deletes
        );

        let mut sample: Vec<&OperationGroup> = groups.iter().filter(|g| g.is_destructive()).collect();
        if sample.is_empty() {
            sample = groups.iter().collect();
        }
        for group in sample.iter().take(self.sample_limit) {
            println!("  {}", group.sample_line());
        }
        if sample.len() > self.sample_limit {
            println!("  ... and {} more", sample.len() - self.sample_limit);
        }
    }
}
