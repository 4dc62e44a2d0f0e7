mod common;

use common::{build_pdf_with_objects, clean_objects, run_evaluators};
use pdfrecon_core::model::IndicatorKind;

#[test]
fn multiple_subsets_of_same_base_font_flagged() {
    let mut objects = clean_objects();
    objects.push(
        "5 0 obj\n<< /Type /Font /Subtype /TrueType /BaseFont /ABCDEF+Calibri >>\nendobj"
            .to_string(),
    );
    objects.push(
        "6 0 obj\n<< /Type /Font /Subtype /TrueType /BaseFont /GHIJKL+Calibri-Bold >>\nendobj"
            .to_string(),
    );
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let fonts = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::MultipleFontSubsets)
        .expect("font subsets must fire");
    assert!(fonts.meta.get("fonts").unwrap().contains("Calibri"));
}

#[test]
fn single_subset_not_flagged() {
    let mut objects = clean_objects();
    objects.push(
        "5 0 obj\n<< /Type /Font /BaseFont /ABCDEF+Calibri >>\nendobj".to_string(),
    );
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(!findings.iter().any(|f| f.kind == IndicatorKind::MultipleFontSubsets));
}

#[test]
fn need_appearances_and_xfa_flagged() {
    let mut objects = clean_objects();
    objects[0] = "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [] /NeedAppearances true /XFA 5 0 R >> >>\nendobj"
        .to_string();
    objects.push("5 0 obj\n<< /Length 0 >>\nstream\n\nendstream\nendobj".to_string());
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::AcroFormNeedAppearances));
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::HasXfaForm));
}

#[test]
fn annotations_and_redactions_flagged() {
    let mut objects = clean_objects();
    objects[2] = "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [5 0 R] >>\nendobj"
        .to_string();
    objects.push(
        "5 0 obj\n<< /Type /Annot /Subtype /Redact /Rect [10 10 100 30] >>\nendobj".to_string(),
    );
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let annots = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::HasAnnotations)
        .expect("annotations must fire");
    assert_eq!(annots.meta.get("annotation_count").map(String::as_str), Some("1"));
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::HasRedactions));
}

#[test]
fn signature_byte_range_coverage_recorded() {
    let mut objects = clean_objects();
    objects.push(
        "5 0 obj\n<< /Type /Sig /Filter /Adobe.PPKLite /ByteRange [0 100 150 50] /Contents <0011> /M (D:20230301120000Z) >>\nendobj"
            .to_string(),
    );
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let sig = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::HasDigitalSignature)
        .expect("signature must fire");
    assert_eq!(sig.meta.get("byte_range_covered_end").map(String::as_str), Some("200"));
    let uncovered: u64 = sig.meta.get("uncovered_tail_bytes").unwrap().parse().unwrap();
    assert_eq!(uncovered, pdf.len() as u64 - 200);
    assert!(sig.meta.contains_key("post_signature_content"));
}

#[test]
fn duplicate_image_streams_flagged() {
    let image = "<< /Type /XObject /Subtype /Image /Width 2 /Height 2 /ColorSpace /DeviceGray /BitsPerComponent 8 /Length 4 >>\nstream\n\x01\x02\x03\x04\nendstream\nendobj";
    let mut objects = clean_objects();
    objects.push(format!("5 0 obj\n{image}"));
    objects.push(format!("6 0 obj\n{image}"));
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let dupes = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::DuplicateImagesDifferentXrefs)
        .expect("duplicate images must fire");
    assert!(dupes.objects.contains(&"5 0 obj".to_string()));
    assert!(dupes.objects.contains(&"6 0 obj".to_string()));
}

#[test]
fn exif_marker_in_image_flagged() {
    let data = "JFIF..Exif\0\0II*\0";
    let mut objects = clean_objects();
    objects.push(format!(
        "5 0 obj\n<< /Type /XObject /Subtype /Image /Width 1 /Height 1 /Length {} >>\nstream\n{data}\nendstream\nendobj",
        data.len()
    ));
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::ImagesWithExif));
}

#[test]
fn more_layers_than_pages_flagged() {
    let mut objects = clean_objects();
    objects[0] = "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /OCProperties << /OCGs [5 0 R 6 0 R 7 0 R] >> >>\nendobj"
        .to_string();
    for num in 5..=7 {
        objects.push(format!("{num} 0 obj\n<< /Type /OCG /Name (Layer {num}) >>\nendobj"));
    }
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let layers = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::MoreLayersThanPages)
        .expect("layer count must fire");
    assert_eq!(layers.meta.get("layer_count").map(String::as_str), Some("3"));
    assert_eq!(layers.meta.get("page_count").map(String::as_str), Some("1"));
}

#[test]
fn shrunken_cropbox_flagged() {
    let mut objects = clean_objects();
    objects[2] = "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] /CropBox [0 0 50 50] >>\nendobj"
        .to_string();
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let boxes = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::CropBoxMediaBoxMismatch)
        .expect("cropbox mismatch must fire");
    assert_eq!(boxes.meta.get("visible_ratio").map(String::as_str), Some("0.250"));
}

#[test]
fn matching_boxes_not_flagged() {
    let mut objects = clean_objects();
    objects[2] = "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] /CropBox [0 0 95 100] >>\nendobj"
        .to_string();
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(!findings.iter().any(|f| f.kind == IndicatorKind::CropBoxMediaBoxMismatch));
}

#[test]
fn duplicate_bookmark_titles_flagged() {
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Outlines 5 0 R >>\nendobj".to_string();
    objects.push("5 0 obj\n<< /Type /Outlines /First 6 0 R /Count 2 >>\nendobj".to_string());
    objects.push(
        "6 0 obj\n<< /Title (Chapter) /Parent 5 0 R /Next 7 0 R /Dest [3 0 R /Fit] >>\nendobj"
            .to_string(),
    );
    objects.push(
        "7 0 obj\n<< /Title (Chapter) /Parent 5 0 R /Dest [3 0 R /Fit] >>\nendobj".to_string(),
    );
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::DuplicateBookmarks));
    assert!(!findings.iter().any(|f| f.kind == IndicatorKind::InvalidBookmarkDestinations));
}

#[test]
fn bookmark_to_unknown_page_flagged() {
    let mut objects = clean_objects();
    objects[0] =
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Outlines 5 0 R >>\nendobj".to_string();
    objects.push("5 0 obj\n<< /Type /Outlines /First 6 0 R /Count 1 >>\nendobj".to_string());
    objects.push(
        "6 0 obj\n<< /Title (Ghost chapter) /Parent 5 0 R /Dest [5 0 R /Fit] >>\nendobj"
            .to_string(),
    );
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::InvalidBookmarkDestinations));
}
