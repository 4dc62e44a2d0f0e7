use anyhow::Result;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{EvidenceSpan, Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::{PdfAtom, PdfObj};

use crate::entry_dict;

/// Digital signature presence. The signature itself is not validated; what
/// matters forensically is that one exists and what its `/ByteRange` covers,
/// since bytes past the covered end arrived after signing.
pub struct SignatureEvaluator;

impl Evaluator for SignatureEvaluator {
    fn id(&self) -> &'static str {
        "signatures"
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
            let Some(dict) = entry_dict(entry) else { continue };
            if !dict.has_name(b"/Type", b"/Sig") {
                continue;
            }
            let mut finding = Finding::new(
                IndicatorKind::HasDigitalSignature,
                "Digital signature present (presence recorded; not cryptographically validated)",
            )
            .object(entry.obj, entry.gen)
            .evidence(EvidenceSpan::from_span(entry.full_span, "/Type /Sig"));
            if let Some(byte_range) = dict.get(b"/ByteRange") {
                match parse_byte_range(byte_range, ctx.bytes.len()) {
                    Ok(covered_end) => {
                        let uncovered = ctx.bytes.len() as u64 - covered_end;
                        finding = finding
                            .meta("byte_range_covered_end", covered_end.to_string())
                            .meta("uncovered_tail_bytes", uncovered.to_string());
                        if uncovered > 0 {
                            finding = finding.meta(
                                "post_signature_content",
                                format!("{uncovered} byte(s) follow the signed range"),
                            );
                        }
                    }
                    Err(reason) => {
                        finding = finding.meta("byte_range_error", reason);
                    }
                }
            }
            findings.push(finding);
        }
        Ok(findings)
    }
}

/// `/ByteRange [o1 l1 o2 l2]` → the end of the covered prefix, after bounds
/// and ordering checks.
fn parse_byte_range(obj: &PdfObj<'_>, file_len: usize) -> Result<u64, String> {
    let PdfAtom::Array(items) = &obj.atom else {
        return Err("/ByteRange is not an array".into());
    };
    if items.len() != 4 {
        return Err(format!("/ByteRange expected 4 integers, got {}", items.len()));
    }
    let mut values = [0u64; 4];
    for (idx, item) in items.iter().enumerate() {
        match item.as_int() {
            Some(v) if v >= 0 => values[idx] = v as u64,
            _ => return Err(format!("/ByteRange entry {idx} is not a non-negative integer")),
        }
    }
    let first_end = values[0]
        .checked_add(values[1])
        .ok_or_else(|| "first segment overflows".to_string())?;
    let second_end = values[2]
        .checked_add(values[3])
        .ok_or_else(|| "second segment overflows".to_string())?;
    if first_end > file_len as u64 || second_end > file_len as u64 {
        return Err(format!(
            "/ByteRange segment out of bounds (ends {first_end}, {second_end}; file {file_len})"
        ));
    }
    if values[0] > values[2] || first_end > values[2] {
        return Err("/ByteRange segments unordered or overlapping".into());
    }
    Ok(first_end.max(second_end))
}
