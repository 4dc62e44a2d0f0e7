use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::metadata::{parse_pdf_date, parse_xmp_date};
use pdfrecon_core::model::{EvidenceSpan, Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::PdfAtom;

use crate::{for_each_dict_in_entry, string_lossy};

/// `/TouchUp_TextEdit true` is written by Acrobat's text touch-up tool and
/// survives inside `/PieceInfo` private data. Direct proof of text editing.
pub struct TouchUpEvaluator;

impl Evaluator for TouchUpEvaluator {
    fn id(&self) -> &'static str {
        "touchup_textedit"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for entry in &ctx.graph.objects {
            let mut hit = None;
            for_each_dict_in_entry(entry, &mut |dict| {
                if hit.is_some() {
                    return;
                }
                if let Some((name, value)) = dict.get_first(b"/TouchUp_TextEdit") {
                    if matches!(value.atom, PdfAtom::Bool(true)) {
                        hit = Some(name.span);
                    }
                }
            });
            if let Some(span) = hit {
                findings.push(
                    Finding::new(
                        IndicatorKind::TouchUpTextEdit,
                        "Acrobat TouchUp text edit marker present; text was edited in place",
                    )
                    .object(entry.obj, entry.gen)
                    .evidence(EvidenceSpan::from_span(span, "/TouchUp_TextEdit true")),
                );
                break;
            }
        }
        Ok(findings)
    }
}

/// `/PieceInfo` is application-private data; its presence records which tool
/// last touched the file and often carries editing state.
pub struct PieceInfoEvaluator;

impl Evaluator for PieceInfoEvaluator {
    fn id(&self) -> &'static str {
        "pieceinfo"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        for entry in &ctx.graph.objects {
            let mut span = None;
            for_each_dict_in_entry(entry, &mut |dict| {
                if span.is_none() {
                    if let Some((name, _)) = dict.get_first(b"/PieceInfo") {
                        span = Some(name.span);
                    }
                }
            });
            if let Some(span) = span {
                return Ok(vec![Finding::new(
                    IndicatorKind::HasPieceInfo,
                    "Application-private /PieceInfo data present",
                )
                .object(entry.obj, entry.gen)
                .evidence(EvidenceSpan::from_span(span, "/PieceInfo"))]);
            }
        }
        Ok(Vec::new())
    }
}

/// Conflicting tool names: several distinct `/Creator` or `/Producer` values
/// in one file, or the Info dictionary disagreeing with the XMP packet.
pub struct CreatorProducerEvaluator;

impl Evaluator for CreatorProducerEvaluator {
    fn id(&self) -> &'static str {
        "creator_producer"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::METADATA
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut creators = BTreeSet::new();
        let mut producers = BTreeSet::new();
        for entry in &ctx.graph.objects {
            for_each_dict_in_entry(entry, &mut |dict| {
                if let Some(s) = dict.string_value(b"/Creator") {
                    creators.insert(string_lossy(s));
                }
                if let Some(s) = dict.string_value(b"/Producer") {
                    producers.insert(string_lossy(s));
                }
            });
        }
        let meta = ctx.metadata();
        let mut mismatches = Vec::new();
        if let (Some(info), Some(xmp)) =
            (meta.info_value("Creator"), meta.xmp_value("xmp:CreatorTool"))
        {
            if info.trim() != xmp.trim() {
                mismatches.push(format!("Info Creator {info:?} vs XMP CreatorTool {xmp:?}"));
            }
        }
        if let (Some(info), Some(xmp)) =
            (meta.info_value("Producer"), meta.xmp_value("pdf:Producer"))
        {
            if info.trim() != xmp.trim() {
                mismatches.push(format!("Info Producer {info:?} vs XMP Producer {xmp:?}"));
            }
        }
        if creators.len() <= 1 && producers.len() <= 1 && mismatches.is_empty() {
            return Ok(Vec::new());
        }
        let mut finding = Finding::new(
            IndicatorKind::MultipleCreatorsOrProducers,
            "Conflicting creation-tool metadata; the file passed through more than one application",
        );
        if creators.len() > 1 {
            finding = finding.meta(
                "creators",
                creators.iter().cloned().collect::<Vec<_>>().join("; "),
            );
        }
        if producers.len() > 1 {
            finding = finding.meta(
                "producers",
                producers.iter().cloned().collect::<Vec<_>>().join("; "),
            );
        }
        if !mismatches.is_empty() {
            finding = finding.meta("info_xmp_mismatch", mismatches.join("; "));
        }
        Ok(vec![finding])
    }
}

/// A populated `xmpMM:History` is the editing log the producing application
/// left behind.
pub struct XmpHistoryEvaluator;

impl Evaluator for XmpHistoryEvaluator {
    fn id(&self) -> &'static str {
        "xmp_history"
    }

    fn needs(&self) -> Needs {
        Needs::METADATA
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let meta = ctx.metadata();
        let entries: BTreeSet<&str> = meta
            .xmp_with_prefix("xmpMM:History/")
            .filter_map(|(key, _)| {
                let start = key.find("rdf:li[")?;
                let end = key[start..].find(']')? + start + 1;
                Some(&key[..end])
            })
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::new(
            IndicatorKind::XmpHistory,
            format!("XMP editing history with {} entr(y/ies)", entries.len()),
        )
        .meta("history_entries", entries.len().to_string())])
    }
}

/// Document identity drift: the trailer `/ID` changing between revisions, or
/// the XMP DocumentID diverging from OriginalDocumentID.
pub struct DocumentIdEvaluator;

impl Evaluator for DocumentIdEvaluator {
    fn id(&self) -> &'static str {
        "document_ids"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::METADATA
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut first_ids = BTreeSet::new();
        for trailer in &ctx.graph.trailers {
            let Some(id_array) = trailer.array(b"/ID") else { continue };
            let Some(first) = id_array.first() else { continue };
            if let PdfAtom::Str(s) = &first.atom {
                first_ids.insert(hex_upper(s.decoded()));
            }
        }
        if first_ids.len() > 1 {
            findings.push(
                Finding::new(
                    IndicatorKind::MultipleDocumentIds,
                    "Trailer /ID first element differs between revisions; the file identity changed",
                )
                .meta("ids", first_ids.iter().cloned().collect::<Vec<_>>().join("; ")),
            );
        }
        let meta = ctx.metadata();
        let original = meta.xmp_value("xmpMM:OriginalDocumentID").map(normalize_uuid);
        let current = meta.xmp_value("xmpMM:DocumentID").map(normalize_uuid);
        if let (Some(original), Some(current)) = (original, current) {
            if !original.is_empty() && !current.is_empty() && original != current {
                findings.push(
                    Finding::new(
                        IndicatorKind::MultipleDocumentIds,
                        "XMP DocumentID differs from OriginalDocumentID",
                    )
                    .meta("original_document_id", original)
                    .meta("document_id", current),
                );
            }
        }
        Ok(findings)
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn normalize_uuid(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let stripped = ["URN:UUID:", "UUID:", "XMP.IID:", "XMP.DID:"]
        .iter()
        .fold(upper, |acc, prefix| acc.strip_prefix(prefix).map(str::to_string).unwrap_or(acc));
    stripped.trim_matches(|c| c == '<' || c == '>').to_string()
}

/// Info dates and XMP dates describe the same events; a disagreement beyond
/// one second means one of them was rewritten.
pub struct DateConsistencyEvaluator;

const DATE_TOLERANCE_SECONDS: i64 = 1;

impl Evaluator for DateConsistencyEvaluator {
    fn id(&self) -> &'static str {
        "date_consistency"
    }

    fn needs(&self) -> Needs {
        Needs::METADATA
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let meta = ctx.metadata();
        let mut findings = Vec::new();
        let pairs = [
            ("CreationDate", "xmp:CreateDate", "creation"),
            ("ModDate", "xmp:ModifyDate", "modification"),
        ];
        for (info_key, xmp_key, label) in pairs {
            let (Some(info_raw), Some(xmp_raw)) =
                (meta.info_value(info_key), meta.xmp_value(xmp_key))
            else {
                continue;
            };
            let (Some(info_dt), Some(xmp_dt)) =
                (parse_pdf_date(info_raw), parse_xmp_date(xmp_raw))
            else {
                continue;
            };
            let delta = (info_dt.timestamp() - xmp_dt.timestamp()).abs();
            if delta > DATE_TOLERANCE_SECONDS {
                findings.push(
                    Finding::new(
                        IndicatorKind::DateInconsistency,
                        format!(
                            "Info and XMP disagree on the {label} date by {delta} second(s)"
                        ),
                    )
                    .meta("info", info_raw.to_string())
                    .meta("xmp", xmp_raw.to_string())
                    .meta("delta_seconds", delta.to_string()),
                );
            }
        }
        Ok(findings)
    }
}

/// The header version, the features in use, and the metadata's claims must
/// agree. Xref or object streams in a file declaring 1.4 or lower, or a
/// modern header with metadata naming an ancient producer, mean the file was
/// rewritten by something other than its claimed origin.
pub struct VersionMismatchEvaluator;

const OLD_TOOL_CLAIMS: &[&str] = &["Acrobat 4", "Acrobat 5", "PDF 1.3", "PDF 1.4"];

impl Evaluator for VersionMismatchEvaluator {
    fn id(&self) -> &'static str {
        "version_mismatch"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::METADATA
    }

    fn cost(&self) -> Cost {
        Cost::Cheap
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let Some(header) = ctx.graph.header else { return Ok(Vec::new()) };
        let version = header.version_decimal();
        let mut findings = Vec::new();

        let mut modern_features = Vec::new();
        if ctx.graph.uses_xref_streams() {
            modern_features.push("cross-reference streams");
        }
        if ctx.graph.uses_object_streams() {
            modern_features.push("object streams");
        }
        if version <= 14 && !modern_features.is_empty() {
            findings.push(
                Finding::new(
                    IndicatorKind::MetadataVersionMismatch,
                    format!(
                        "Header declares PDF {}.{} but the file uses {} (PDF 1.5+)",
                        header.major,
                        header.minor,
                        modern_features.join(" and ")
                    ),
                )
                .meta("declared_version", format!("{}.{}", header.major, header.minor)),
            );
        }

        let meta = ctx.metadata();
        let claims: BTreeMap<&str, &str> = [
            ("Creator", meta.info_value("Creator")),
            ("Producer", meta.info_value("Producer")),
            ("xmp:CreatorTool", meta.xmp_value("xmp:CreatorTool")),
            ("pdf:Producer", meta.xmp_value("pdf:Producer")),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();
        if version >= 16 {
            for (field, value) in claims {
                if OLD_TOOL_CLAIMS.iter().any(|old| value.contains(old)) {
                    findings.push(
                        Finding::new(
                            IndicatorKind::MetadataVersionMismatch,
                            format!(
                                "{field} claims {value:?} but the header declares PDF {}.{}",
                                header.major, header.minor
                            ),
                        )
                        .meta("field", field.to_string())
                        .meta("value", value.to_string()),
                    );
                    break;
                }
            }
        }
        Ok(findings)
    }
}
