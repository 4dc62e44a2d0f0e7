mod common;

use common::{append_incremental, build_pdf, build_pdf_with_objects, clean_objects, run_evaluators};
use pdfrecon_core::model::{IndicatorKind, Severity};

#[test]
fn clean_file_produces_no_findings() {
    let pdf = build_pdf_with_objects(&clean_objects());
    let findings = run_evaluators(&pdf);
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}

#[test]
fn incremental_update_flags_revisions_and_startxref() {
    let mut pdf = build_pdf_with_objects(&clean_objects());
    append_incremental(
        &mut pdf,
        &["5 0 obj\n<< /Type /Annot /Subtype /Text >>\nendobj".to_string()],
        "",
    );
    let findings = run_evaluators(&pdf);
    let kinds: Vec<IndicatorKind> = findings.iter().map(|f| f.kind).collect();
    assert!(kinds.contains(&IndicatorKind::HasRevisions));
    assert!(kinds.contains(&IndicatorKind::MultipleStartxref));
    let revisions = findings.iter().find(|f| f.kind == IndicatorKind::HasRevisions).unwrap();
    assert_eq!(revisions.severity, Severity::High);
    assert_eq!(revisions.meta.get("revision_count").map(String::as_str), Some("2"));
}

#[test]
fn missing_reference_reported_with_every_id() {
    let mut objects = clean_objects();
    objects.push("5 0 obj\n<< /Linked 7 0 R /Other 9 0 R >>\nendobj".to_string());
    // Object 5 itself is unreferenced, but below the orphan threshold.
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let missing = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::MissingObjects)
        .expect("MissingObjects must fire");
    assert_eq!(missing.severity, Severity::High);
    assert!(missing.objects.contains(&"7 0 obj".to_string()));
    assert!(missing.objects.contains(&"9 0 obj".to_string()));
    assert_eq!(missing.objects.len(), 2);
}

#[test]
fn generation_reuse_flagged() {
    let mut objects = clean_objects();
    objects.push("5 1 obj\n<< /Reused true >>\nendobj".to_string());
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let reuse = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::ObjectsWithGenGreaterZero)
        .expect("generation reuse must fire");
    assert!(reuse.objects.contains(&"5 1 obj".to_string()));
}

#[test]
fn many_unreferenced_objects_flagged_as_orphans() {
    let mut objects = clean_objects();
    for num in 5..=16 {
        objects.push(format!("{num} 0 obj\n<< /Orphan {num} >>\nendobj"));
    }
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    let orphans = findings
        .iter()
        .find(|f| f.kind == IndicatorKind::OrphanedObjects)
        .expect("orphans must fire above threshold");
    assert_eq!(orphans.meta.get("orphan_count").map(String::as_str), Some("12"));
}

#[test]
fn sparse_object_numbering_flagged() {
    let mut objects = clean_objects();
    objects.push("50 0 obj\n<< /Far true >>\nendobj".to_string());
    let pdf = build_pdf_with_objects(&objects);
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::LargeObjectNumberGaps));
}

#[test]
fn linearized_with_update_flagged() {
    let mut objects = vec![
        "6 0 obj\n<< /Linearized 1 /L 1000 /O 3 /E 500 /N 1 /T 400 >>\nendobj".to_string(),
    ];
    objects.extend(clean_objects());
    let mut pdf = build_pdf(b"%PDF-1.4", &objects, "");
    append_incremental(&mut pdf, &["7 0 obj\n<< /Added true >>\nendobj".to_string()], "");
    let findings = run_evaluators(&pdf);
    assert!(findings.iter().any(|f| f.kind == IndicatorKind::LinearizedAndUpdated));
}
