use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pdfrecon_pdf::{parse_pdf, ByteRange, ParseOptions};

use crate::cancel::{CancelToken, Cancelled};
use crate::model::{Revision, RevisionStatus};

/// Extracts every prior revision of `bytes`: for K EOF markers, revisions
/// 1..K-1 are the byte prefixes ending at each earlier `%%EOF`. The latest
/// revision is the file itself and is not materialized.
///
/// Each slice is sanity-parsed before writing; a slice whose xref cannot be
/// read is still written (for manual inspection) but marked `Corrupt` and
/// excluded from the user-facing list by the report builder.
pub fn extract_revisions(
    bytes: &[u8],
    source_path: &Path,
    out_dir: &Path,
    cancel: &CancelToken,
) -> Result<Vec<Revision>> {
    let eof_ends = eof_end_offsets(bytes);
    if eof_ends.len() < 2 {
        return Ok(Vec::new());
    }
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let mut out = Vec::new();
    for (i, &end) in eof_ends[..eof_ends.len() - 1].iter().enumerate() {
        let index = i + 1;
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        let end = (end as usize).min(bytes.len());
        let slice = &bytes[..end];
        let (status, page_count) = sanity_check(slice);
        let file_name = format!("{stem}_rev{index}.pdf");
        let path = out_dir.join(&file_name);
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating {}", out_dir.display()))?;
        match write_revision(slice, &path, cancel) {
            Ok(()) => {
                info!(
                    domain = "revision",
                    index,
                    bytes = slice.len(),
                    path = %path.display(),
                    "extracted revision"
                );
                out.push(Revision {
                    index,
                    byte_range: ByteRange { start: 0, end: end as u64 },
                    status,
                    output_path: Some(path),
                    page_count,
                });
            }
            Err(e) if e.is::<Cancelled>() => return Err(e),
            Err(e) => {
                warn!(domain = "revision", index, error = %e, "could not write revision");
                out.push(Revision {
                    index,
                    byte_range: ByteRange { start: 0, end: end as u64 },
                    status: RevisionStatus::Corrupt(format!("write failed: {e}")),
                    output_path: None,
                    page_count,
                });
            }
        }
    }
    Ok(out)
}

/// Standalone entry point mirroring the scan-independent extraction the
/// driver may call.
pub fn extract_revisions_from_file(path: &Path, out_dir: &Path) -> Result<Vec<Revision>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    extract_revisions(&bytes, path, out_dir, &CancelToken::new())
}

fn write_revision(slice: &[u8], path: &Path, cancel: &CancelToken) -> Result<()> {
    fs::write(path, slice).with_context(|| format!("writing {}", path.display()))?;
    if cancel.is_cancelled() {
        // Cancellation must not leave partial output behind.
        let _ = fs::remove_file(path);
        return Err(Cancelled.into());
    }
    Ok(())
}

fn eof_end_offsets(bytes: &[u8]) -> Vec<u64> {
    memchr::memmem::find_iter(bytes, b"%%EOF").map(|p| (p + 5) as u64).collect()
}

/// A revision is usable when its own last startxref leads to a parseable
/// xref section; anything else is recorded as the corruption reason.
fn sanity_check(slice: &[u8]) -> (RevisionStatus, usize) {
    match parse_pdf(slice, ParseOptions::default()) {
        Ok(graph) => {
            let page_count = graph.pages.len();
            if graph.startxrefs.is_empty() {
                return (RevisionStatus::Corrupt("no startxref in revision".into()), page_count);
            }
            let usable = graph
                .xref_sections
                .first()
                .map(|s| s.kind != pdfrecon_pdf::xref::XrefKind::Unknown)
                .unwrap_or(false);
            if usable {
                (RevisionStatus::Valid, page_count)
            } else {
                (
                    RevisionStatus::Corrupt("xref section unreadable at declared offset".into()),
                    page_count,
                )
            }
        }
        Err(e) => (RevisionStatus::Corrupt(e.to_string()), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_revision_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let obj_off = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref_off = pdf.len();
        pdf.extend_from_slice(b"xref\n0 2\n0000000000 65535 f \n");
        pdf.extend_from_slice(format!("{obj_off:010} 00000 n \n").as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n");
        pdf.extend_from_slice(xref_off.to_string().as_bytes());
        pdf.extend_from_slice(b"\n%%EOF\n");
        pdf
    }

    fn two_revision_pdf() -> Vec<u8> {
        let mut pdf = one_revision_pdf();
        let obj_off = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Note (added later) >>\nendobj\n");
        let xref_off = pdf.len();
        pdf.extend_from_slice(b"xref\n2 1\n");
        pdf.extend_from_slice(format!("{obj_off:010} 00000 n \n").as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n");
        pdf.extend_from_slice(xref_off.to_string().as_bytes());
        pdf.extend_from_slice(b"\n%%EOF\n");
        pdf
    }

    #[test]
    fn single_eof_extracts_nothing() {
        let pdf = one_revision_pdf();
        let dir = tempfile::tempdir().unwrap();
        let revisions =
            extract_revisions(&pdf, Path::new("doc.pdf"), dir.path(), &CancelToken::new())
                .unwrap();
        assert!(revisions.is_empty());
    }

    #[test]
    fn prior_revision_extracted_and_valid() {
        let pdf = two_revision_pdf();
        let dir = tempfile::tempdir().unwrap();
        let revisions =
            extract_revisions(&pdf, Path::new("doc.pdf"), dir.path(), &CancelToken::new())
                .unwrap();
        assert_eq!(revisions.len(), 1);
        let rev = &revisions[0];
        assert_eq!(rev.index, 1);
        assert_eq!(rev.status, RevisionStatus::Valid);
        let written = fs::read(rev.output_path.as_ref().unwrap()).unwrap();
        assert_eq!(written.len() as u64, rev.byte_range.end);
        assert!(written.ends_with(b"%%EOF"));
        // Round trip: the extracted revision has exactly one EOF marker.
        assert_eq!(eof_end_offsets(&written).len(), rev.index);
    }

    #[test]
    fn corrupt_revision_marked_but_written() {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n1 0 obj\n<< >>\nendobj\nstartxref\n999999\n%%EOF\n");
        pdf.extend_from_slice(b"2 0 obj\n<< >>\nendobj\nstartxref\n9\n%%EOF\n");
        let dir = tempfile::tempdir().unwrap();
        let revisions =
            extract_revisions(&pdf, Path::new("doc.pdf"), dir.path(), &CancelToken::new())
                .unwrap();
        assert_eq!(revisions.len(), 1);
        assert!(revisions[0].is_corrupt());
        assert!(revisions[0].output_path.as_ref().unwrap().exists());
    }

    #[test]
    fn cancelled_extraction_returns_error() {
        let pdf = two_revision_pdf();
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = extract_revisions(&pdf, Path::new("doc.pdf"), dir.path(), &token);
        assert!(err.is_err());
    }
}
