//! Post-apply verification
//!
//! Re-runs a pass's detector against a fresh scan. Anything it still wants to
//! fix is counted as remaining; a non-zero count is a recommendation to re-run,
//! never a failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::passes::Pass;
use crate::scanner::Scanner;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// Corrections the detector would still plan
    pub remaining: usize,
    /// Findings left for human review
    pub for_review: usize,
}

impl Verification {
    pub fn is_clean(&self) -> bool {
        self.remaining == 0
    }
}

pub struct Verifier {
    scanner: Scanner,
}

impl Verifier {
    pub fn new(scanner: Scanner) -> Self {
        Self { scanner }
    }

    pub async fn verify(&self, pass: &dyn Pass, now: DateTime<Utc>) -> Result<Verification> {
        let detection = pass.detect(&self.scanner, now).await?;
        let verification = Verification {
            remaining: detection.groups.len(),
            for_review: detection.review.len() + detection.errors.len(),
        };

        if verification.is_clean() {
            info!(pass = pass.name(), for_review = verification.for_review, "Verification clean");
        } else {
            warn!(
                pass = pass.name(),
                remaining = verification.remaining,
                "Violations remain after apply, re-run recommended"
            );
        }
        Ok(verification)
    }
}
