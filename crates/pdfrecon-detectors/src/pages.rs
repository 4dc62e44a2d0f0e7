use std::collections::BTreeSet;

use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::graph::page_attribute;
use pdfrecon_pdf::object::{PdfAtom, PdfObj};

/// Optional content groups (layers) versus page count. More layers than
/// pages is the signature of stacked alternative content.
pub struct LayerCountEvaluator;

impl Evaluator for LayerCountEvaluator {
    fn id(&self) -> &'static str {
        "layer_count"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let Some(catalog) = ctx.graph.catalog() else { return Ok(Vec::new()) };
        let Some(ocprops_obj) = catalog.get(b"/OCProperties") else { return Ok(Vec::new()) };
        let Some(ocprops) = ctx.graph.resolve_dict(ocprops_obj) else { return Ok(Vec::new()) };
        let Some(ocgs) = ocprops.get(b"/OCGs") else { return Ok(Vec::new()) };

        // Distinct OCG object ids, nested arrays flattened.
        let mut layers: BTreeSet<(u32, u16)> = BTreeSet::new();
        collect_refs(ocgs, &mut layers, 0);

        let page_count = ctx.graph.pages.len();
        if layers.len() <= page_count {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::new(
            IndicatorKind::MoreLayersThanPages,
            format!("{} optional content layers over {page_count} page(s)", layers.len()),
        )
        .meta("layer_count", layers.len().to_string())
        .meta("page_count", page_count.to_string())])
    }
}

fn collect_refs(obj: &PdfObj<'_>, out: &mut BTreeSet<(u32, u16)>, depth: usize) {
    if depth > 8 {
        return;
    }
    match &obj.atom {
        PdfAtom::Ref { obj: num, gen } => {
            out.insert((*num, *gen));
        }
        PdfAtom::Array(items) => {
            for item in items {
                collect_refs(item, out, depth + 1);
            }
        }
        _ => {}
    }
}

/// A CropBox substantially smaller than the MediaBox hides whatever sits in
/// the trimmed margin.
pub struct PageBoxEvaluator;

const VISIBLE_AREA_THRESHOLD: f64 = 0.8;

impl Evaluator for PageBoxEvaluator {
    fn id(&self) -> &'static str {
        "page_boxes"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        for (page_index, &page) in ctx.graph.pages.iter().enumerate() {
            let Some(media) = page_attribute(&ctx.graph, page, b"/MediaBox").and_then(rect_area)
            else {
                continue;
            };
            let Some(crop) = page_attribute(&ctx.graph, page, b"/CropBox").and_then(rect_area)
            else {
                continue;
            };
            if media <= 0.0 || crop <= 0.0 {
                continue;
            }
            let ratio = crop / media;
            if ratio < VISIBLE_AREA_THRESHOLD {
                return Ok(vec![Finding::new(
                    IndicatorKind::CropBoxMediaBoxMismatch,
                    format!(
                        "Page {} CropBox shows only {:.0}% of the MediaBox",
                        page_index + 1,
                        ratio * 100.0
                    ),
                )
                .object(page.0, page.1)
                .meta("page", (page_index + 1).to_string())
                .meta("visible_ratio", format!("{ratio:.3}"))]);
            }
        }
        Ok(Vec::new())
    }
}

fn rect_area(obj: &PdfObj<'_>) -> Option<f64> {
    let PdfAtom::Array(items) = &obj.atom else { return None };
    if items.len() != 4 {
        return None;
    }
    let values: Vec<f64> = items.iter().filter_map(PdfObj::as_f64).collect();
    if values.len() != 4 {
        return None;
    }
    Some(((values[2] - values[0]) * (values[3] - values[1])).abs())
}
