mod common;

use common::{build_pdf, build_pdf_with_objects, clean_objects, run_evaluators};
use pdfrecon_core::model::{IndicatorKind, Severity};

fn xmp_stream_object(num: u32, body: &str) -> String {
    format!(
        "{num} 0 obj\n<< /Type /Metadata /Subtype /XML /Length {} >>\nstream\n{body}\nendstream\nendobj",
        body.len()
    )
}

#[test]
fn touchup_marker_and_pieceinfo_detected() {
    let mut objects = clean_objects();
    objects[0] = "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /PieceInfo << /AdobePhotoshop << /Private << /TouchUp_TextEdit true >> >> >> >>\nendobj".to_string();
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let touchup = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::TouchUpTextEdit)
        .expect("TouchUp marker must fire");
    assert_eq!(touchup.severity, Severity::High);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::HasPieceInfo));
}

#[test]
fn conflicting_producers_detected() {
    let mut objects = clean_objects();
    objects.push("5 0 obj\n<< /Producer (Microsoft Word 2019) >>\nendobj".to_string());
    objects.push("6 0 obj\n<< /Producer (GhostScript 9.55) >>\nendobj".to_string());
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let conflict = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::MultipleCreatorsOrProducers)
        .expect("producer conflict must fire");
    assert!(conflict.meta.get("producers").unwrap().contains("GhostScript"));
}

#[test]
fn info_xmp_creator_mismatch_detected() {
    let xmp = r#"<rdf:RDF><rdf:Description><xmp:CreatorTool>Photoshop</xmp:CreatorTool></rdf:Description></rdf:RDF>"#;
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Metadata 6 0 R >>\nendobj".to_string();
    objects.push("5 0 obj\n<< /Creator (Word) >>\nendobj".to_string());
    objects.push(xmp_stream_object(6, xmp));
    let pdf = build_pdf(b"%PDF-1.4", &objects, " /Info 5 0 R");
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::MultipleCreatorsOrProducers));
}

#[test]
fn xmp_history_detected() {
    let xmp = r#"<rdf:RDF><rdf:Description><xmpMM:History><rdf:Seq>
        <rdf:li><stEvt:action>saved</stEvt:action><stEvt:when>2021-05-05T10:00:00Z</stEvt:when></rdf:li>
        <rdf:li><stEvt:action>saved</stEvt:action><stEvt:when>2021-06-06T10:00:00Z</stEvt:when></rdf:li>
    </rdf:Seq></xmpMM:History></rdf:Description></rdf:RDF>"#;
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Metadata 5 0 R >>\nendobj".to_string();
    objects.push(xmp_stream_object(5, xmp));
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let history = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::XmpHistory)
        .expect("XMP history must fire");
    assert_eq!(history.meta.get("history_entries").map(String::as_str), Some("2"));
}

#[test]
fn xmp_document_id_change_detected() {
    let xmp = r#"<rdf:RDF><rdf:Description
        xmpMM:OriginalDocumentID="uuid:11111111-aaaa-bbbb-cccc-000000000000"
        xmpMM:DocumentID="uuid:22222222-aaaa-bbbb-cccc-000000000000"/></rdf:RDF>"#;
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Metadata 5 0 R >>\nendobj".to_string();
    objects.push(xmp_stream_object(5, xmp));
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::MultipleDocumentIds));
}

#[test]
fn date_inconsistency_beyond_tolerance() {
    let xmp = r#"<rdf:RDF><rdf:Description><xmp:CreateDate>2023-01-31T12:30:50Z</xmp:CreateDate></rdf:Description></rdf:RDF>"#;
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Metadata 6 0 R >>\nendobj".to_string();
    objects.push("5 0 obj\n<< /CreationDate (D:20230131123045Z) >>\nendobj".to_string());
    objects.push(xmp_stream_object(6, xmp));
    let pdf = build_pdf(b"%PDF-1.4", &objects, " /Info 5 0 R");
    let findings = run_evaluators(&pdf);
    let mismatch = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::DateInconsistency)
        .expect("date inconsistency must fire");
    assert_eq!(mismatch.meta.get("delta_seconds").map(String::as_str), Some("5"));
}

#[test]
fn one_second_difference_tolerated() {
    let xmp = r#"<rdf:RDF><rdf:Description><xmp:CreateDate>2023-01-31T12:30:46Z</xmp:CreateDate></rdf:Description></rdf:RDF>"#;
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Metadata 6 0 R >>\nendobj".to_string();
    objects.push("5 0 obj\n<< /CreationDate (D:20230131123045Z) >>\nendobj".to_string());
    objects.push(xmp_stream_object(6, xmp));
    let pdf = build_pdf(b"%PDF-1.4", &objects, " /Info 5 0 R");
    let findings = run_evaluators(&pdf);
    assert!(!findings.iter().any(|f| f.kind == IndicatorKind::DateInconsistency));
}

#[test]
fn old_header_with_object_streams_flagged() {
    let body = "11 0 12 10 << /A 1 >> << /B 2 >>";
    let mut objects = clean_objects();
    objects.push(format!(
        "5 0 obj\n<< /Type /ObjStm /N 2 /First 11 /Length {} >>\nstream\n{body}\nendstream\nendobj",
        body.len()
    ));
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let mismatch = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::MetadataVersionMismatch)
        .expect("version mismatch must fire for 1.4 + object streams");
    assert!(mismatch.summary.contains("object streams"));
}

#[test]
fn modern_header_without_modern_features_ok() {
    let pdf = build_pdf(b"%PDF-1.7", &clean_objects(), "");
    let findings = run_evaluators(&pdf);
    assert!(!findings.iter().any(|f| f.kind == IndicatorKind::MetadataVersionMismatch));
}
