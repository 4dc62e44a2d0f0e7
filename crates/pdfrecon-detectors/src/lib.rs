use std::path::Path;

use pdfrecon_core::cancel::Cancelled;
use pdfrecon_core::detect::Evaluator;
use pdfrecon_core::model::FileReport;
use pdfrecon_core::runner::{scan_with, Collaborators};
use pdfrecon_core::ScanConfig;
use pdfrecon_pdf::object::{PdfAtom, PdfDict, PdfStr};
use pdfrecon_pdf::parser::ObjEntry;

pub mod annotations;
pub mod content;
pub mod fonts;
pub mod forms;
pub mod images;
pub mod javascript;
pub mod metadata;
pub mod outlines;
pub mod pages;
pub mod signatures;
pub mod structure;

/// The full indicator catalog. Order is the report order; the classifier
/// only looks at severity, so ordering is presentational.
pub fn default_evaluators() -> Vec<Box<dyn Evaluator>> {
    vec![
        Box::new(structure::RevisionStructureEvaluator),
        Box::new(structure::ReferenceIntegrityEvaluator),
        Box::new(structure::GenerationReuseEvaluator),
        Box::new(structure::ObjectNumberGapEvaluator),
        Box::new(metadata::TouchUpEvaluator),
        Box::new(metadata::PieceInfoEvaluator),
        Box::new(metadata::CreatorProducerEvaluator),
        Box::new(metadata::XmpHistoryEvaluator),
        Box::new(metadata::DocumentIdEvaluator),
        Box::new(metadata::DateConsistencyEvaluator),
        Box::new(metadata::VersionMismatchEvaluator),
        Box::new(javascript::JavaScriptEvaluator),
        Box::new(content::TextPositioningEvaluator),
        Box::new(content::WhiteRectangleEvaluator),
        Box::new(content::DrawingOpsEvaluator),
        Box::new(fonts::FontSubsetEvaluator),
        Box::new(forms::AcroFormEvaluator),
        Box::new(annotations::AnnotationEvaluator),
        Box::new(signatures::SignatureEvaluator),
        Box::new(images::ImageEvaluator),
        Box::new(pages::LayerCountEvaluator),
        Box::new(pages::PageBoxEvaluator),
        Box::new(outlines::OutlineEvaluator),
    ]
}

/// Convenience entry point: full pipeline with the default catalog and no
/// external collaborators.
pub fn scan(path: &Path, config: &ScanConfig) -> Result<FileReport, Cancelled> {
    scan_with(path, config, &default_evaluators(), &Collaborators::default())
}

pub(crate) fn entry_dict<'e, 'a>(entry: &'e ObjEntry<'a>) -> Option<&'e PdfDict<'a>> {
    match &entry.atom {
        PdfAtom::Dict(d) => Some(d),
        PdfAtom::Stream(st) => Some(&st.dict),
        _ => None,
    }
}

pub(crate) fn string_lossy(s: &PdfStr<'_>) -> String {
    String::from_utf8_lossy(s.decoded()).to_string()
}

const MAX_WALK_DEPTH: usize = 32;

/// Visits every dictionary nested inside an indirect object (through arrays
/// and stream dicts). Depth-capped. Object references are not followed;
/// each indirect object is visited on its own.
pub(crate) fn for_each_dict_in_entry<'a, 'e, F: FnMut(&'e PdfDict<'a>)>(
    entry: &'e ObjEntry<'a>,
    f: &mut F,
) {
    walk_atom(&entry.atom, f, 0);
}

fn walk_atom<'a, 'e, F: FnMut(&'e PdfDict<'a>)>(atom: &'e PdfAtom<'a>, f: &mut F, depth: usize) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    match atom {
        PdfAtom::Dict(d) => {
            f(d);
            for (_, v) in &d.entries {
                walk_atom(&v.atom, f, depth + 1);
            }
        }
        PdfAtom::Stream(st) => {
            f(&st.dict);
            for (_, v) in &st.dict.entries {
                walk_atom(&v.atom, f, depth + 1);
            }
        }
        PdfAtom::Array(items) => {
            for item in items {
                walk_atom(&item.atom, f, depth + 1);
            }
        }
        _ => {}
    }
}
