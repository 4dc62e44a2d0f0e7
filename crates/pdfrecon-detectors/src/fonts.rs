use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;

use crate::for_each_dict_in_entry;

/// Several subsets of the same base font (`ABCDEF+Calibri`, `GHIJKL+Calibri`)
/// mean text was set by more than one tool or at more than one time; a
/// single producer reuses its subset.
pub struct FontSubsetEvaluator;

impl Evaluator for FontSubsetEvaluator {
    fn id(&self) -> &'static str {
        "font_subsets"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut by_base: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in &ctx.graph.objects {
            for_each_dict_in_entry(entry, &mut |dict| {
                let Some(name) = dict.name_value(b"/BaseFont") else { return };
                let full = String::from_utf8_lossy(&name.decoded)
                    .trim_start_matches('/')
                    .to_string();
                let Some(base) = subset_base(&full) else { return };
                by_base.entry(base).or_default().insert(full);
            });
        }
        let conflicting: Vec<(String, BTreeSet<String>)> =
            by_base.into_iter().filter(|(_, subsets)| subsets.len() > 1).collect();
        if conflicting.is_empty() {
            return Ok(Vec::new());
        }
        let detail = conflicting
            .iter()
            .map(|(base, subsets)| {
                format!("{base}: {}", subsets.iter().cloned().collect::<Vec<_>>().join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");
        Ok(vec![Finding::new(
            IndicatorKind::MultipleFontSubsets,
            format!(
                "{} base font(s) embedded as multiple subsets; text came from different passes",
                conflicting.len()
            ),
        )
        .meta("fonts", detail)])
    }
}

/// `ABCDEF+Name-Style` → `Name`. Only the conventional six-uppercase-letter
/// subset prefix counts; anything else is not a subset name.
fn subset_base(full: &str) -> Option<String> {
    let (prefix, rest) = full.split_once('+')?;
    if prefix.len() != 6 || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let base = rest.split('-').next().unwrap_or(rest);
    if base.is_empty() {
        return None;
    }
    Some(base.to_string())
}
