use std::collections::HashSet;

use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::{PdfAtom, PdfObj};

/// AcroForm facts: `/NeedAppearances true` (field values may render
/// differently than they were signed or saved), an unusually large field
/// population, and XFA forms.
pub struct AcroFormEvaluator;

impl Evaluator for AcroFormEvaluator {
    fn id(&self) -> &'static str {
        "acroform"
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
        let Some(acroform_obj) = catalog.get(b"/AcroForm") else { return Ok(findings) };
        let Some(acroform) = ctx.graph.resolve_dict(acroform_obj) else { return Ok(findings) };

        if acroform.bool_value(b"/NeedAppearances") == Some(true) {
            findings.push(Finding::new(
                IndicatorKind::AcroFormNeedAppearances,
                "/NeedAppearances true: form field rendering is regenerated by the viewer",
            ));
        }

        if acroform.has_key(b"/XFA") {
            findings.push(Finding::new(
                IndicatorKind::HasXfaForm,
                "XFA form definition present; form content lives outside the page streams",
            ));
        }

        if let Some(fields) = acroform.array(b"/Fields") {
            let mut visited = HashSet::new();
            let mut count = 0usize;
            for field in fields {
                count += count_terminal_fields(ctx, field, &mut visited, 0);
            }
            if count > ctx.config.form_fields_threshold {
                findings.push(
                    Finding::new(
                        IndicatorKind::ExcessiveFormFields,
                        format!(
                            "{count} form fields (threshold {})",
                            ctx.config.form_fields_threshold
                        ),
                    )
                    .meta("field_count", count.to_string()),
                );
            }
        }
        Ok(findings)
    }
}

const MAX_FIELD_DEPTH: usize = 32;

fn count_terminal_fields(
    ctx: &ScanContext,
    field: &PdfObj<'_>,
    visited: &mut HashSet<(u32, u16)>,
    depth: usize,
) -> usize {
    if depth > MAX_FIELD_DEPTH {
        return 0;
    }
    if let PdfAtom::Ref { obj, gen } = field.atom {
        if !visited.insert((obj, gen)) {
            return 0;
        }
    }
    let Some(dict) = ctx.graph.resolve_dict(field) else { return 0 };
    match dict.array(b"/Kids") {
        Some(kids) if !kids.is_empty() => kids
            .iter()
            .map(|kid| count_terminal_fields(ctx, kid, visited, depth + 1))
            .sum(),
        _ => 1,
    }
}
