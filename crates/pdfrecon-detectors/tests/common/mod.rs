#![allow(dead_code)]

use std::collections::BTreeMap;

use pdfrecon_core::model::Finding;
use pdfrecon_core::scan::ScanContext;
use pdfrecon_core::ScanConfig;
use pdfrecon_detectors::default_evaluators;
use pdfrecon_pdf::{parse_pdf, ParseOptions};

/// Builds a one-revision PDF from indirect-object strings. Each object must
/// start with its number (`"1 0 obj..."`); the xref table and trailer are
/// generated, with object 1 assumed to be the catalog.
pub fn build_pdf_with_objects(objects: &[String]) -> Vec<u8> {
    build_pdf(b"%PDF-1.4", objects, "")
}

pub fn build_pdf(header: &[u8], objects: &[String], trailer_extra: &str) -> Vec<u8> {
    let mut pdf = Vec::new();
    pdf.extend_from_slice(header);
    pdf.push(b'\n');
    let mut offsets: BTreeMap<u32, usize> = BTreeMap::new();
    for object in objects {
        let num: u32 = object
            .split_whitespace()
            .next()
            .and_then(|tok| tok.parse().ok())
            .expect("object string must start with its number");
        offsets.insert(num, pdf.len());
        pdf.extend_from_slice(object.as_bytes());
        if !object.ends_with('\n') {
            pdf.push(b'\n');
        }
    }
    let size = offsets.keys().max().copied().unwrap_or(0) + 1;
    let xref_off = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for num in 1..size {
        match offsets.get(&num) {
            Some(off) => pdf.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes()),
            None => pdf.extend_from_slice(b"0000000000 00000 f \n"),
        }
    }
    pdf.extend_from_slice(
        format!("trailer\n<< /Size {size} /Root 1 0 R{trailer_extra} >>\nstartxref\n").as_bytes(),
    );
    pdf.extend_from_slice(xref_off.to_string().as_bytes());
    pdf.extend_from_slice(b"\n%%EOF\n");
    pdf
}

/// Appends an incremental update: new objects, a new xref section chained to
/// the previous one via /Prev, a new trailer and %%EOF.
pub fn append_incremental(pdf: &mut Vec<u8>, objects: &[String], trailer_extra: &str) {
    let prev_xref = last_startxref_target(pdf).expect("base PDF must carry startxref");
    let mut offsets: BTreeMap<u32, usize> = BTreeMap::new();
    for object in objects {
        let num: u32 = object
            .split_whitespace()
            .next()
            .and_then(|tok| tok.parse().ok())
            .expect("object string must start with its number");
        offsets.insert(num, pdf.len());
        pdf.extend_from_slice(object.as_bytes());
        if !object.ends_with('\n') {
            pdf.push(b'\n');
        }
    }
    let xref_off = pdf.len();
    pdf.extend_from_slice(b"xref\n");
    for (num, off) in &offsets {
        pdf.extend_from_slice(format!("{num} 1\n{off:010} 00000 n \n").as_bytes());
    }
    let size = offsets.keys().max().copied().unwrap_or(0) + 1;
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {size} /Root 1 0 R /Prev {prev_xref}{trailer_extra} >>\nstartxref\n"
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(xref_off.to_string().as_bytes());
    pdf.extend_from_slice(b"\n%%EOF\n");
}

fn last_startxref_target(pdf: &[u8]) -> Option<u64> {
    let pos = memchr_rfind(pdf, b"startxref")?;
    let tail = &pdf[pos + b"startxref".len()..];
    let digits: Vec<u8> = tail
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .collect();
    std::str::from_utf8(&digits).ok()?.parse().ok()
}

fn memchr_rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    (0..=haystack.len().saturating_sub(needle.len()))
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Runs the full default catalog against in-memory bytes and returns every
/// finding, skipping the file-level pipeline (no revision files, no hashing).
pub fn run_evaluators(bytes: &[u8]) -> Vec<Finding> {
    run_evaluators_with_config(bytes, ScanConfig::default())
}

pub fn run_evaluators_with_config(bytes: &[u8], config: ScanConfig) -> Vec<Finding> {
    let graph = parse_pdf(bytes, ParseOptions::default()).expect("parse test pdf");
    let ctx = ScanContext::new(bytes, graph, config);
    let mut findings = Vec::new();
    for evaluator in default_evaluators() {
        findings.extend(evaluator.run(&ctx).expect("evaluator must not fail"));
    }
    findings
}

/// Minimal clean document: catalog, page tree, one page with empty content.
pub fn clean_objects() -> Vec<String> {
    vec![
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj".to_string(),
        "2 0 obj\n<< /Type /Pages /Count 1 /Kids [3 0 R] >>\nendobj".to_string(),
        "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>\nendobj"
            .to_string(),
        "4 0 obj\n<< /Length 0 >>\nstream\n\nendstream\nendobj".to_string(),
    ]
}

pub fn content_stream_object(num: u32, body: &str) -> String {
    format!("{num} 0 obj\n<< /Length {} >>\nstream\n{body}\nendstream\nendobj", body.len())
}
