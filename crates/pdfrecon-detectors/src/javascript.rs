use std::collections::BTreeSet;

use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{EvidenceSpan, Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::{PdfAtom, PdfDict, PdfObj};

use crate::for_each_dict_in_entry;

/// JavaScript indicators. Auto-executing scripts (an `/OpenAction` resolving
/// to a `/S /JavaScript` action, or any `/AA` additional-actions entry doing
/// the same) are the high-severity case. Script that merely exists
/// elsewhere is reported once at medium severity, without double-counting
/// actions already reported as auto-executing.
pub struct JavaScriptEvaluator;

impl Evaluator for JavaScriptEvaluator {
    fn id(&self) -> &'static str {
        "javascript"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        // Object ids whose JavaScript is already reported as auto-executing.
        let mut consumed: BTreeSet<(u32, u16)> = BTreeSet::new();

        if let Some(catalog) = ctx.graph.catalog() {
            if let Some(open_action) = catalog.get(b"/OpenAction") {
                if let Some((target, dict)) = resolve_action(ctx, open_action) {
                    if is_js_action(dict) {
                        match target {
                            Some(id) => {
                                consumed.insert(id);
                            }
                            // Inline action: the catalog object itself holds
                            // the JavaScript.
                            None => {
                                if let Some(id) = catalog_id(ctx) {
                                    consumed.insert(id);
                                }
                            }
                        }
                        let mut finding = Finding::new(
                            IndicatorKind::JavaScriptAutoExecute,
                            "Document /OpenAction runs JavaScript when the file is opened",
                        )
                        .evidence(EvidenceSpan::from_span(dict.span, "/OpenAction action"));
                        if let Some((obj, gen)) = target {
                            finding = finding.object(obj, gen);
                        }
                        findings.push(finding);
                    }
                }
            }
        }

        // /AA dictionaries anywhere: catalog, pages, annotations, fields.
        let mut aa_hits: Vec<((u32, u16), pdfrecon_pdf::ByteRange)> = Vec::new();
        for entry in &ctx.graph.objects {
            let mut local: Vec<pdfrecon_pdf::ByteRange> = Vec::new();
            for_each_dict_in_entry(entry, &mut |dict| {
                let Some(aa) = dict.get(b"/AA") else { return };
                let Some(aa_dict) = ctx.graph.resolve_dict(aa) else { return };
                for (_, value) in &aa_dict.entries {
                    if let Some((target, action)) = resolve_action(ctx, value) {
                        if is_js_action(action) {
                            if let Some(id) = target {
                                consumed.insert(id);
                            }
                            local.push(action.span);
                        }
                    }
                }
            });
            for span in local {
                aa_hits.push(((entry.obj, entry.gen), span));
                consumed.insert((entry.obj, entry.gen));
            }
        }
        if let Some(((obj, gen), span)) = aa_hits.first() {
            findings.push(
                Finding::new(
                    IndicatorKind::JavaScriptAutoExecute,
                    format!(
                        "{} additional-action (/AA) JavaScript trigger(s) fire without user intent",
                        aa_hits.len()
                    ),
                )
                .object(*obj, *gen)
                .evidence(EvidenceSpan::from_span(*span, "/AA JavaScript action"))
                .meta("trigger_count", aa_hits.len().to_string()),
            );
        }

        // Remaining JavaScript actions: present but not auto-executing.
        let mut other: Vec<(u32, u16)> = Vec::new();
        for entry in &ctx.graph.objects {
            if consumed.contains(&(entry.obj, entry.gen)) {
                continue;
            }
            let mut has_js = false;
            for_each_dict_in_entry(entry, &mut |dict| {
                if is_js_action(dict) {
                    has_js = true;
                }
            });
            if has_js {
                other.push((entry.obj, entry.gen));
            }
        }
        if !other.is_empty() {
            findings.push(
                Finding::new(
                    IndicatorKind::ContainsJavaScript,
                    format!("{} JavaScript action(s) present", other.len()),
                )
                .meta("count", other.len().to_string())
                .objects(other.into_iter().take(10)),
            );
        }
        Ok(findings)
    }
}

fn is_js_action(dict: &PdfDict<'_>) -> bool {
    dict.has_name(b"/S", b"/JavaScript")
}

fn catalog_id(ctx: &ScanContext) -> Option<(u32, u16)> {
    for trailer in &ctx.graph.trailers {
        if let Some(id) = trailer.get(b"/Root").and_then(PdfObj::as_ref_id) {
            return Some(id);
        }
    }
    ctx.graph.objects.iter().rev().find_map(|e| match &e.atom {
        PdfAtom::Dict(d) if d.has_name(b"/Type", b"/Catalog") => Some((e.obj, e.gen)),
        _ => None,
    })
}

/// Resolves an action value to its dictionary, reporting the target object id
/// when the action was indirect.
fn resolve_action<'s, 'a>(
    ctx: &'s ScanContext<'a>,
    obj: &'s PdfObj<'a>,
) -> Option<(Option<(u32, u16)>, &'s PdfDict<'a>)> {
    match &obj.atom {
        PdfAtom::Dict(d) => Some((None, d)),
        PdfAtom::Ref { obj: num, gen } => {
            let entry = ctx.graph.get_object(*num, *gen)?;
            match &entry.atom {
                PdfAtom::Dict(d) => Some((Some((*num, *gen)), d)),
                PdfAtom::Stream(st) => Some((Some((*num, *gen)), &st.dict)),
                _ => None,
            }
        }
        _ => None,
    }
}
