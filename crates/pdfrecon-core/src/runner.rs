use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info_span, warn};

use pdfrecon_pdf::object::PdfAtom;
use pdfrecon_pdf::{parse_pdf, ObjectGraph, ParseOptions};

use crate::cancel::{CancelToken, Cancelled};
use crate::config::ScanConfig;
use crate::detect::{Cost, Evaluator, Needs};
use crate::metadata::MetadataSource;
use crate::model::{FileReport, RevisionStatus, RiskLevel};
use crate::report::build_report;
use crate::revisions::extract_revisions;
use crate::scan::ScanContext;
use crate::timeline::{build_timeline, SignatureDate};
use crate::visual::{revision_visually_identical, PageRenderer};

const MAX_RECORDED_ISSUES: usize = 100;

/// The analyzer's external collaborators. Both are optional: without a
/// renderer the visual-identity check is skipped, and without an extractor
/// the metadata reader relies on its own Info/XMP parsing.
#[derive(Default)]
pub struct Collaborators<'a> {
    pub renderer: Option<&'a dyn PageRenderer>,
    pub external_metadata: Option<&'a dyn MetadataSource>,
    pub cancel: CancelToken,
}

/// Scans one file through the full pipeline. Never panics and never fails
/// for file-level problems: an unopenable or non-PDF input produces a
/// Green report carrying the error. Only cancellation propagates as `Err`,
/// discarding the in-progress report.
pub fn scan_with(
    path: &Path,
    config: &ScanConfig,
    evaluators: &[Box<dyn Evaluator>],
    collab: &Collaborators<'_>,
) -> Result<FileReport, Cancelled> {
    let span = info_span!("scan", path = %path.display());
    let _guard = span.enter();
    let bytes = match map_or_read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(domain = "scan", kind = "open_failed", error = %e, "cannot open file");
            return Ok(fatal_report(path, 0, String::new(), format!("cannot open file: {e}")));
        }
    };
    scan_bytes(&bytes, path, config, evaluators, collab)
}

/// Memory-maps when possible, falls back to a full read.
fn map_or_read(path: &Path) -> Result<FileBytes> {
    let file = fs::File::open(path)?;
    // SAFETY: the mapping is read-only and dropped before the scan returns;
    // concurrent truncation of a scanned file is outside the threat model.
    match unsafe { memmap2::Mmap::map(&file) } {
        Ok(map) => Ok(FileBytes::Mapped(map)),
        Err(_) => Ok(FileBytes::Owned(fs::read(path)?)),
    }
}

enum FileBytes {
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl std::ops::Deref for FileBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(m) => m,
            FileBytes::Owned(v) => v,
        }
    }
}

pub fn scan_bytes(
    bytes: &[u8],
    path: &Path,
    config: &ScanConfig,
    evaluators: &[Box<dyn Evaluator>],
    collab: &Collaborators<'_>,
) -> Result<FileReport, Cancelled> {
    let cancel = &collab.cancel;
    let size = bytes.len() as u64;
    let digest = format!("{:x}", md5::compute(bytes));

    if !has_pdf_header(bytes) {
        return Ok(fatal_report(
            path,
            size,
            digest,
            "not a PDF: no %PDF- header in the first 1024 bytes".to_string(),
        ));
    }

    let mut errors = Vec::new();
    let graph = match parse_pdf(
        bytes,
        ParseOptions {
            max_objects: config.max_objects,
            max_stream_size: config.max_stream_size,
            expand_object_streams: true,
        },
    ) {
        Ok(g) => g,
        Err(e) => {
            return Ok(fatal_report(path, size, digest, format!("parse failed: {e}")));
        }
    };
    cancel.checkpoint()?;

    for issue in graph.issues.iter().take(MAX_RECORDED_ISSUES) {
        errors.push(format!("parse: {} at {}", issue.kind, issue.span.start));
    }
    if graph.issues.len() > MAX_RECORDED_ISSUES {
        errors.push(format!("parse: {} further issues suppressed", graph.issues.len() - MAX_RECORDED_ISSUES));
    }

    let eof_count = graph.eof_offsets.len();
    let ctx = ScanContext::new(bytes, graph, config.clone());
    cancel.checkpoint()?;

    // Warm the shared views the registered evaluators declare they read, so
    // each evaluator run is a pure lookup.
    let wanted = evaluators.iter().fold(Needs::empty(), |acc, e| acc | e.needs());
    if wanted.contains(Needs::METADATA) {
        let _ = ctx.metadata();
    }
    if wanted.contains(Needs::PAGE_CONTENT) {
        let _ = ctx.page_stats();
    }
    cancel.checkpoint()?;

    // Cheap evaluators first; the cancel token is polled between cost tiers.
    let mut findings = Vec::new();
    for tier in [Cost::Cheap, Cost::Moderate, Cost::Expensive] {
        for evaluator in evaluators.iter().filter(|e| e.cost() == tier) {
            match evaluator.run(&ctx) {
                Ok(mut out) => findings.append(&mut out),
                Err(e) => {
                    // An evaluator's own failure never affects the others.
                    warn!(domain = "scan", evaluator = evaluator.id(), error = %e, "evaluator failed");
                    errors.push(format!("evaluator {}: {e}", evaluator.id()));
                }
            }
        }
        cancel.checkpoint()?;
    }

    let mut revisions = Vec::new();
    if eof_count >= 2 {
        let out_dir = revision_dir(path, config);
        match extract_revisions(bytes, path, &out_dir, cancel) {
            Ok(mut out) => revisions.append(&mut out),
            Err(e) if e.is::<Cancelled>() => return Err(Cancelled),
            Err(e) => errors.push(format!("revision extraction: {e}")),
        }
    }
    cancel.checkpoint()?;

    if let Some(renderer) = collab.renderer {
        let final_pages = ctx.graph.pages.len();
        for revision in &mut revisions {
            if revision.is_corrupt() {
                continue;
            }
            let end = (revision.byte_range.end as usize).min(bytes.len());
            let identical = revision_visually_identical(
                renderer,
                bytes,
                &bytes[..end],
                final_pages,
                revision.page_count,
                config.visual_check_pages,
                config.visual_check_dpi,
            );
            if identical {
                debug!(domain = "visual", index = revision.index, "revision visually identical");
                revision.status = RevisionStatus::VisuallyIdentical;
            }
        }
    }
    cancel.checkpoint()?;

    let external = match collab.external_metadata {
        Some(source) => match source.extract(path) {
            Ok(map) => Some(map),
            Err(e) => {
                errors.push(format!("external metadata: {e}"));
                None
            }
        },
        None => None,
    };
    let signature_dates = collect_signature_dates(&ctx.graph);
    let timeline = build_timeline(ctx.metadata(), &signature_dates, external.as_ref());
    errors.extend(ctx.metadata().read_errors.iter().cloned());
    errors.extend(ctx.take_errors());

    Ok(build_report(
        path.to_path_buf(),
        size,
        digest,
        findings,
        revisions,
        timeline,
        errors,
    ))
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(1024)];
    memchr::memmem::find(window, b"%PDF-").is_some()
}

fn revision_dir(path: &Path, config: &ScanConfig) -> PathBuf {
    if config.revision_output_dir.is_absolute() {
        config.revision_output_dir.clone()
    } else {
        path.parent().unwrap_or_else(|| Path::new(".")).join(&config.revision_output_dir)
    }
}

fn fatal_report(path: &Path, size: u64, md5: String, error: String) -> FileReport {
    FileReport {
        path: path.to_path_buf(),
        size,
        md5,
        findings: Vec::new(),
        revisions: Vec::new(),
        classification: RiskLevel::Green,
        timeline: Vec::new(),
        errors: vec![error],
    }
}

fn collect_signature_dates(graph: &ObjectGraph<'_>) -> Vec<SignatureDate> {
    let mut out = Vec::new();
    for entry in &graph.objects {
        let dict = match &entry.atom {
            PdfAtom::Dict(d) => d,
            PdfAtom::Stream(st) => &st.dict,
            _ => continue,
        };
        if !dict.has_name(b"/Type", b"/Sig") {
            continue;
        }
        if let Some(m) = dict.string_value(b"/M") {
            out.push(SignatureDate {
                object: format!("{} {} obj", entry.obj, entry.gen),
                raw: String::from_utf8_lossy(m.decoded()).to_string(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_fatal_green() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty.pdf");
        fs::write(&file, b"").unwrap();
        let report =
            scan_with(&file, &ScanConfig::default(), &[], &Collaborators::default()).unwrap();
        assert_eq!(report.classification, RiskLevel::Green);
        assert_eq!(report.errors.len(), 1);
        assert!(report.findings.is_empty());
        assert!(report.revisions.is_empty());
    }

    #[test]
    fn non_pdf_is_fatal_green() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.pdf");
        fs::write(&file, b"just some text, no header anywhere").unwrap();
        let report =
            scan_with(&file, &ScanConfig::default(), &[], &Collaborators::default()).unwrap();
        assert_eq!(report.classification, RiskLevel::Green);
        assert!(report.errors[0].contains("not a PDF"));
    }

    #[test]
    fn missing_file_reports_open_error() {
        let report = scan_with(
            Path::new("/nonexistent/really/not/here.pdf"),
            &ScanConfig::default(),
            &[],
            &Collaborators::default(),
        )
        .unwrap();
        assert_eq!(report.classification, RiskLevel::Green);
        assert!(report.errors[0].contains("cannot open file"));
    }

    #[test]
    fn cancelled_scan_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        fs::write(&file, b"%PDF-1.4\n1 0 obj\n<< >>\nendobj\n%%EOF\n").unwrap();
        let collab = Collaborators::default();
        collab.cancel.cancel();
        let result = scan_with(&file, &ScanConfig::default(), &[], &collab);
        assert!(result.is_err());
    }

    #[test]
    fn md5_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        fs::write(&file, b"%PDF-1.4\n%%EOF\n").unwrap();
        let config = ScanConfig::default();
        let a = scan_with(&file, &config, &[], &Collaborators::default()).unwrap();
        let b = scan_with(&file, &config, &[], &Collaborators::default()).unwrap();
        assert_eq!(a.md5, b.md5);
        assert_eq!(a.md5.len(), 32);
    }
}
