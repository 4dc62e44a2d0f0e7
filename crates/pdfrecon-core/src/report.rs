use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{
    FileReport, Finding, Revision, RevisionStatus, RiskLevel, Severity, TimelineEvent,
};

/// Classification is a pure function of severity and revision status:
/// any High finding is Red; any Medium finding or any intact prior revision
/// is Yellow; otherwise Green.
pub fn classify(findings: &[Finding], revisions: &[Revision]) -> RiskLevel {
    if findings.iter().any(|f| f.severity == Severity::High) {
        return RiskLevel::Red;
    }
    let has_valid_revision =
        revisions.iter().any(|r| r.status == RevisionStatus::Valid);
    if !findings.is_empty() || has_valid_revision {
        return RiskLevel::Yellow;
    }
    RiskLevel::Green
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
}

pub fn summarize(findings: &[Finding]) -> Summary {
    Summary {
        total: findings.len(),
        high: findings.iter().filter(|f| f.severity == Severity::High).count(),
        medium: findings.iter().filter(|f| f.severity == Severity::Medium).count(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_report(
    path: PathBuf,
    size: u64,
    md5: String,
    findings: Vec<Finding>,
    revisions: Vec<Revision>,
    timeline: Vec<TimelineEvent>,
    errors: Vec<String>,
) -> FileReport {
    let classification = classify(&findings, &revisions);
    // Corrupt revisions stay out of the user-facing list; their bytes remain
    // on disk for manual inspection.
    let revisions = revisions.into_iter().filter(|r| !r.is_corrupt()).collect();
    FileReport { path, size, md5, findings, revisions, classification, timeline, errors }
}
