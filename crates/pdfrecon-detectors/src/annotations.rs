use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{EvidenceSpan, Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::PdfAtom;

use crate::entry_dict;

/// Annotation presence and redaction annotations. Annotations sit above the
/// page content, which is exactly where content gets covered; `/Redact`
/// annotations are unapplied redactions whose target text is still in the
/// file.
pub struct AnnotationEvaluator;

impl Evaluator for AnnotationEvaluator {
    fn id(&self) -> &'static str {
        "annotations"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut pages_with_annots = 0usize;
        let mut annot_count = 0usize;
        for &page in &ctx.graph.pages {
            let Some(entry) = ctx.graph.get_object(page.0, page.1) else { continue };
            let Some(dict) = entry_dict(entry) else { continue };
            let Some(annots_obj) = dict.get(b"/Annots") else { continue };
            let count = match &annots_obj.atom {
                PdfAtom::Array(items) => items.len(),
                PdfAtom::Ref { .. } => ctx
                    .graph
                    .resolve_ref(annots_obj)
                    .map(|e| match &e.atom {
                        PdfAtom::Array(items) => items.len(),
                        _ => 0,
                    })
                    .unwrap_or(0),
                _ => 0,
            };
            if count > 0 {
                pages_with_annots += 1;
                annot_count += count;
            }
        }
        if pages_with_annots > 0 {
            findings.push(
                Finding::new(
                    IndicatorKind::HasAnnotations,
                    format!("{annot_count} annotation(s) across {pages_with_annots} page(s)"),
                )
                .meta("annotation_count", annot_count.to_string())
                .meta("pages_with_annotations", pages_with_annots.to_string()),
            );
        }

        for entry in &ctx.graph.objects {
            let Some(dict) = entry_dict(entry) else { continue };
            if dict.has_name(b"/Subtype", b"/Redact") {
                findings.push(
                    Finding::new(
                        IndicatorKind::HasRedactions,
                        "Redaction annotation present; redacted content may still be recoverable",
                    )
                    .object(entry.obj, entry.gen)
                    .evidence(EvidenceSpan::from_span(entry.full_span, "/Subtype /Redact")),
                );
                break;
            }
        }
        Ok(findings)
    }
}
