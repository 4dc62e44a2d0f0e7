use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{EvidenceSpan, Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;

/// Revision-layer facts read straight off the marker scan: incremental
/// updates, repeated `startxref`, and a linearized file that was saved again
/// (linearization is only ever written for the first generation of a file).
pub struct RevisionStructureEvaluator;

impl Evaluator for RevisionStructureEvaluator {
    fn id(&self) -> &'static str {
        "revision_structure"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let eof_count = ctx.graph.eof_offsets.len();
        if eof_count >= 2 {
            let mut finding = Finding::new(
                IndicatorKind::HasRevisions,
                format!(
                    "File contains {eof_count} complete revisions; earlier versions can be recovered"
                ),
            )
            .meta("revision_count", eof_count.to_string());
            for (i, end) in ctx.graph.eof_offsets.iter().enumerate() {
                finding = finding.evidence(EvidenceSpan::at_offset(
                    end.saturating_sub(5),
                    &format!("%%EOF marker {}", i + 1),
                ));
            }
            findings.push(finding);
        }
        if ctx.graph.startxrefs.len() >= 2 {
            let mut finding = Finding::new(
                IndicatorKind::MultipleStartxref,
                format!(
                    "{} startxref entries; the file was written in more than one pass",
                    ctx.graph.startxrefs.len()
                ),
            );
            for sx in &ctx.graph.startxrefs {
                finding = finding
                    .evidence(EvidenceSpan::at_offset(sx.marker_offset, "startxref marker"));
            }
            findings.push(finding);
        }
        if ctx.graph.linearized && eof_count >= 2 {
            findings.push(Finding::new(
                IndicatorKind::LinearizedAndUpdated,
                "Linearized file carries later incremental updates; the linearization predates an edit",
            ));
        }
        Ok(findings)
    }
}

/// Reference accounting: every referenced id must resolve, and the defined
/// population should be mostly referenced and mostly gap-free.
pub struct ReferenceIntegrityEvaluator;

impl Evaluator for ReferenceIntegrityEvaluator {
    fn id(&self) -> &'static str {
        "reference_integrity"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let graph = &ctx.graph;

        let missing: Vec<(u32, u16)> =
            graph.referenced_ids.difference(&graph.defined_ids).copied().collect();
        if !missing.is_empty() {
            let mut finding = Finding::new(
                IndicatorKind::MissingObjects,
                format!(
                    "{} referenced object(s) have no definition; content was removed or the file was truncated",
                    missing.len()
                ),
            )
            .meta("missing_count", missing.len().to_string());
            // Every missing id belongs to this one finding's evidence.
            finding = finding.objects(missing.iter().copied());
            findings.push(finding);
        }

        let orphaned: Vec<(u32, u16)> = graph
            .defined_ids
            .difference(&graph.referenced_ids)
            .copied()
            .filter(|id| !is_structural(ctx, *id))
            .collect();
        if orphaned.len() > ctx.config.orphan_objects_threshold {
            findings.push(
                Finding::new(
                    IndicatorKind::OrphanedObjects,
                    format!(
                        "{} defined object(s) are never referenced; stale content from earlier edits may remain",
                        orphaned.len()
                    ),
                )
                .meta("orphan_count", orphaned.len().to_string())
                .objects(orphaned.into_iter().take(10)),
            );
        }
        Ok(findings)
    }
}

/// Xref containers and object streams are reached through the trailer, not
/// through object references; counting them as orphans would flag every
/// modern PDF.
fn is_structural(ctx: &ScanContext, id: (u32, u16)) -> bool {
    ctx.graph
        .get_object(id.0, id.1)
        .and_then(crate::entry_dict)
        .map(|d| d.has_name(b"/Type", b"/XRef") || d.has_name(b"/Type", b"/ObjStm"))
        .unwrap_or(false)
}

/// Nonzero generation numbers mean an object number was freed and reused,
/// something ordinary writers never do.
pub struct GenerationReuseEvaluator;

impl Evaluator for GenerationReuseEvaluator {
    fn id(&self) -> &'static str {
        "generation_reuse"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let reused: Vec<(u32, u16)> =
            ctx.graph.defined_ids.iter().copied().filter(|(_, gen)| *gen > 0).collect();
        if reused.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::new(
            IndicatorKind::ObjectsWithGenGreaterZero,
            format!("{} object(s) carry a generation above zero (object number reuse)", reused.len()),
        )
        .meta("count", reused.len().to_string())
        .objects(reused.into_iter().take(10))])
    }
}

/// Sparse object numbering: large gaps in `[1, max]` indicate objects were
/// deleted wholesale or the file was assembled from parts.
pub struct ObjectNumberGapEvaluator;

impl Evaluator for ObjectNumberGapEvaluator {
    fn id(&self) -> &'static str {
        "object_number_gaps"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let numbers: std::collections::BTreeSet<u32> =
            ctx.graph.defined_ids.iter().map(|(num, _)| *num).collect();
        let Some(&max) = numbers.iter().max() else { return Ok(Vec::new()) };
        if max < 10 {
            // Too few objects for a gap fraction to mean anything.
            return Ok(Vec::new());
        }
        let present = numbers.iter().filter(|&&n| n >= 1).count();
        let gap_fraction = 1.0 - (present as f64 / max as f64);
        if gap_fraction <= ctx.config.object_gap_fraction {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::new(
            IndicatorKind::LargeObjectNumberGaps,
            format!(
                "{:.0}% of object numbers up to {} are absent",
                gap_fraction * 100.0,
                max
            ),
        )
        .meta("max_object_number", max.to_string())
        .meta("defined_numbers", present.to_string())
        .meta("gap_fraction", format!("{gap_fraction:.3}"))])
    }
}
