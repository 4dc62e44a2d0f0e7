use std::collections::{BTreeMap, HashSet};

use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::{ObjId, PdfAtom, PdfDict, PdfObj};

use crate::string_lossy;

const MAX_OUTLINE_NODES: usize = 10_000;

/// Bookmark (outline) anomalies: duplicated titles, and destinations pointing
/// at pages the document does not have. Both are artifacts of document
/// assembly or page removal.
pub struct OutlineEvaluator;

impl Evaluator for OutlineEvaluator {
    fn id(&self) -> &'static str {
        "outlines"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let Some(catalog) = ctx.graph.catalog() else { return Ok(findings) };
        let Some(outlines_obj) = catalog.get(b"/Outlines") else { return Ok(findings) };
        let Some(outlines) = ctx.graph.resolve_dict(outlines_obj) else { return Ok(findings) };

        let mut titles: Vec<String> = Vec::new();
        let mut bad_destination: Option<(String, String)> = None;
        let mut visited: HashSet<ObjId> = HashSet::new();
        let page_ids: HashSet<ObjId> = ctx.graph.pages.iter().copied().collect();
        let page_count = ctx.graph.pages.len();

        let mut queue: Vec<ObjId> = Vec::new();
        if let Some(first) = outlines.get(b"/First").and_then(PdfObj::as_ref_id) {
            queue.push(first);
        }
        while let Some(id) = queue.pop() {
            if visited.len() > MAX_OUTLINE_NODES || !visited.insert(id) {
                continue;
            }
            let Some(entry) = ctx.graph.get_object(id.0, id.1) else { continue };
            let Some(dict) = crate::entry_dict(entry) else { continue };
            if let Some(title) = dict.string_value(b"/Title") {
                titles.push(string_lossy(title));
            }
            if bad_destination.is_none() {
                bad_destination = invalid_destination(ctx, dict, &page_ids, page_count);
            }
            for key in [&b"/First"[..], &b"/Next"[..]] {
                if let Some(next) = dict.get(key).and_then(PdfObj::as_ref_id) {
                    queue.push(next);
                }
            }
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for title in &titles {
            *counts.entry(title.as_str()).or_default() += 1;
        }
        let duplicates: Vec<&str> =
            counts.iter().filter(|(_, &c)| c > 1).map(|(t, _)| *t).collect();
        if !duplicates.is_empty() {
            findings.push(
                Finding::new(
                    IndicatorKind::DuplicateBookmarks,
                    format!("{} bookmark title(s) appear more than once", duplicates.len()),
                )
                .meta("titles", duplicates.join("; ")),
            );
        }
        if let Some((title, reason)) = bad_destination {
            findings.push(
                Finding::new(
                    IndicatorKind::InvalidBookmarkDestinations,
                    format!("Bookmark {title:?} targets a page the document does not have"),
                )
                .meta("reason", reason),
            );
        }
        Ok(findings)
    }
}

/// Checks `/Dest` (or `/A` GoTo `/D`) destinations. Numeric destinations are
/// page indices; reference destinations must land on a known page object.
fn invalid_destination(
    ctx: &ScanContext,
    dict: &PdfDict<'_>,
    page_ids: &HashSet<ObjId>,
    page_count: usize,
) -> Option<(String, String)> {
    let title = dict.string_value(b"/Title").map(string_lossy).unwrap_or_default();
    let dest = dict.get(b"/Dest").or_else(|| {
        let action = dict.get(b"/A")?;
        let action_dict = ctx.graph.resolve_dict(action)?;
        if action_dict.has_name(b"/S", b"/GoTo") {
            action_dict.get(b"/D")
        } else {
            None
        }
    })?;
    let PdfAtom::Array(items) = &dest.atom else { return None };
    let first = items.first()?;
    match &first.atom {
        PdfAtom::Ref { obj, gen } => {
            if !page_ids.contains(&(*obj, *gen)) {
                return Some((title, format!("destination page object {obj} {gen} R not in page tree")));
            }
        }
        PdfAtom::Int(i) => {
            if *i < 0 || *i as usize >= page_count {
                return Some((
                    title,
                    format!("destination page index {i} out of range (pages: {page_count})"),
                ));
            }
        }
        _ => {}
    }
    None
}
