use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use pdfrecon_pdf::ByteRange;
use serde::{Deserialize, Serialize};

/// The indicator catalog. Each variant is one kind of technical evidence of
/// alteration, editing, or hidden content; adding a new indicator means a new
/// variant here plus one evaluator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum IndicatorKind {
    HasRevisions,
    TouchUpTextEdit,
    JavaScriptAutoExecute,
    MissingObjects,
    MultipleFontSubsets,
    MultipleCreatorsOrProducers,
    XmpHistory,
    MultipleDocumentIds,
    MultipleStartxref,
    ObjectsWithGenGreaterZero,
    MoreLayersThanPages,
    LinearizedAndUpdated,
    HasPieceInfo,
    HasRedactions,
    HasAnnotations,
    AcroFormNeedAppearances,
    HasDigitalSignature,
    DateInconsistency,
    MetadataVersionMismatch,
    SuspiciousTextPositioning,
    WhiteRectangleOverlay,
    ExcessiveDrawingOperations,
    OrphanedObjects,
    LargeObjectNumberGaps,
    ContainsJavaScript,
    DuplicateImagesDifferentXrefs,
    ImagesWithExif,
    CropBoxMediaBoxMismatch,
    ExcessiveFormFields,
    DuplicateBookmarks,
    InvalidBookmarkDestinations,
    HasXfaForm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Severity {
    Medium,
    High,
}

impl IndicatorKind {
    pub fn severity(self) -> Severity {
        match self {
            IndicatorKind::HasRevisions
            | IndicatorKind::TouchUpTextEdit
            | IndicatorKind::JavaScriptAutoExecute
            | IndicatorKind::MissingObjects => Severity::High,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::HasRevisions => "has_revisions",
            IndicatorKind::TouchUpTextEdit => "touchup_textedit",
            IndicatorKind::JavaScriptAutoExecute => "javascript_auto_execute",
            IndicatorKind::MissingObjects => "missing_objects",
            IndicatorKind::MultipleFontSubsets => "multiple_font_subsets",
            IndicatorKind::MultipleCreatorsOrProducers => "multiple_creators_or_producers",
            IndicatorKind::XmpHistory => "xmp_history",
            IndicatorKind::MultipleDocumentIds => "multiple_document_ids",
            IndicatorKind::MultipleStartxref => "multiple_startxref",
            IndicatorKind::ObjectsWithGenGreaterZero => "objects_with_gen_greater_zero",
            IndicatorKind::MoreLayersThanPages => "more_layers_than_pages",
            IndicatorKind::LinearizedAndUpdated => "linearized_and_updated",
            IndicatorKind::HasPieceInfo => "has_pieceinfo",
            IndicatorKind::HasRedactions => "has_redactions",
            IndicatorKind::HasAnnotations => "has_annotations",
            IndicatorKind::AcroFormNeedAppearances => "acroform_need_appearances",
            IndicatorKind::HasDigitalSignature => "has_digital_signature",
            IndicatorKind::DateInconsistency => "date_inconsistency",
            IndicatorKind::MetadataVersionMismatch => "metadata_version_mismatch",
            IndicatorKind::SuspiciousTextPositioning => "suspicious_text_positioning",
            IndicatorKind::WhiteRectangleOverlay => "white_rectangle_overlay",
            IndicatorKind::ExcessiveDrawingOperations => "excessive_drawing_operations",
            IndicatorKind::OrphanedObjects => "orphaned_objects",
            IndicatorKind::LargeObjectNumberGaps => "large_object_number_gaps",
            IndicatorKind::ContainsJavaScript => "contains_javascript",
            IndicatorKind::DuplicateImagesDifferentXrefs => "duplicate_images_different_xrefs",
            IndicatorKind::ImagesWithExif => "images_with_exif",
            IndicatorKind::CropBoxMediaBoxMismatch => "cropbox_mediabox_mismatch",
            IndicatorKind::ExcessiveFormFields => "excessive_form_fields",
            IndicatorKind::DuplicateBookmarks => "duplicate_bookmarks",
            IndicatorKind::InvalidBookmarkDestinations => "invalid_bookmark_destinations",
            IndicatorKind::HasXfaForm => "has_xfa_form",
        }
    }
}

/// A byte range in the scanned file backing a finding, with an optional note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub offset: u64,
    pub length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl EvidenceSpan {
    pub fn from_span(span: ByteRange, note: &str) -> Self {
        Self {
            offset: span.start,
            length: span.len().min(u64::from(u32::MAX)) as u32,
            note: Some(note.to_string()),
        }
    }

    pub fn at_offset(offset: u64, note: &str) -> Self {
        Self { offset, length: 0, note: Some(note.to_string()) }
    }
}

/// One piece of evidence emitted by an evaluator. Immutable once emitted;
/// owned by the enclosing report. Evidence carries copies, never borrows into
/// the parsed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: IndicatorKind,
    pub severity: Severity,
    /// One line suitable for the report.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceSpan>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Finding {
    pub fn new(kind: IndicatorKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            summary: summary.into(),
            objects: Vec::new(),
            evidence: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn object(mut self, obj: u32, gen: u16) -> Self {
        self.objects.push(format!("{obj} {gen} obj"));
        self
    }

    pub fn objects<I: IntoIterator<Item = (u32, u16)>>(mut self, ids: I) -> Self {
        self.objects.extend(ids.into_iter().map(|(o, g)| format!("{o} {g} obj")));
        self
    }

    pub fn evidence(mut self, span: EvidenceSpan) -> Self {
        self.evidence.push(span);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RevisionStatus {
    Valid,
    Corrupt(String),
    VisuallyIdentical,
}

/// A prior version of the document, extracted as the byte prefix ending at
/// one of the `%%EOF` markers. The newest revision is the file itself and is
/// never materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// 1-based; earliest revision is 1.
    pub index: usize,
    pub byte_range: ByteRange,
    pub status: RevisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Page count of the extracted slice, for the visual comparison.
    #[serde(default)]
    pub page_count: usize,
}

impl Revision {
    pub fn is_corrupt(&self) -> bool {
        matches!(self.status, RevisionStatus::Corrupt(_))
    }
}

/// A dated event recovered from Info, XMP, signatures, or the external
/// metadata extractor. `when` is `None` for dates that failed to parse; the
/// raw string is always preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<DateTime<FixedOffset>>,
    pub raw: String,
    pub source: String,
    pub event: String,
    #[serde(default)]
    pub unparseable: bool,
}

/// The per-file scan output. Exclusively owns its findings and revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub size: u64,
    pub md5: String,
    pub findings: Vec<Finding>,
    pub revisions: Vec<Revision>,
    pub classification: RiskLevel,
    pub timeline: Vec<TimelineEvent>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_kind() {
        assert_eq!(IndicatorKind::HasRevisions.severity(), Severity::High);
        assert_eq!(IndicatorKind::TouchUpTextEdit.severity(), Severity::High);
        assert_eq!(IndicatorKind::JavaScriptAutoExecute.severity(), Severity::High);
        assert_eq!(IndicatorKind::MissingObjects.severity(), Severity::High);
        assert_eq!(IndicatorKind::HasAnnotations.severity(), Severity::Medium);
        assert_eq!(IndicatorKind::WhiteRectangleOverlay.severity(), Severity::Medium);
    }

    #[test]
    fn finding_builder_sets_severity() {
        let f = Finding::new(IndicatorKind::MissingObjects, "missing").object(7, 0);
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.objects, vec!["7 0 obj"]);
    }

    #[test]
    fn report_serializes() {
        let report = FileReport {
            path: PathBuf::from("a.pdf"),
            size: 10,
            md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            findings: vec![Finding::new(IndicatorKind::HasRevisions, "2 revisions")],
            revisions: Vec::new(),
            classification: RiskLevel::Red,
            timeline: Vec::new(),
            errors: Vec::new(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("HasRevisions"));
        assert!(json.contains("Red"));
    }
}
