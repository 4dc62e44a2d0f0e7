use std::collections::HashMap;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

use pdfrecon_core::detect::{Cost, Evaluator, Needs};
use pdfrecon_core::model::{Finding, IndicatorKind};
use pdfrecon_core::scan::ScanContext;
use pdfrecon_pdf::object::PdfAtom;

/// Image stream forensics: the same image bytes stored under two different
/// object ids (a tell-tale of splice-and-reassemble editing), and camera EXIF
/// data surviving inside embedded images.
pub struct ImageEvaluator;

impl Evaluator for ImageEvaluator {
    fn id(&self) -> &'static str {
        "images"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::STREAM_DECODE
    }

    fn cost(&self) -> Cost {
        Cost::Moderate
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut by_hash: HashMap<[u8; 32], Vec<(u32, u16)>> = HashMap::new();
        let mut exif_objects: Vec<(u32, u16)> = Vec::new();

        for entry in &ctx.graph.objects {
            let PdfAtom::Stream(st) = &entry.atom else { continue };
            if !st.dict.has_name(b"/Subtype", b"/Image") {
                continue;
            }
            let start = st.data_span.start as usize;
            let end = (st.data_span.end as usize).min(ctx.bytes.len());
            if start >= end {
                continue;
            }
            let raw = &ctx.bytes[start..end];
            let digest: [u8; 32] = Sha256::digest(raw).into();
            by_hash.entry(digest).or_default().push((entry.obj, entry.gen));

            match ctx.decode_stream(st) {
                Ok(decoded) => {
                    if has_exif_marker(&decoded.data) {
                        exif_objects.push((entry.obj, entry.gen));
                    }
                }
                Err(e) => {
                    debug!(
                        domain = "images",
                        obj = entry.obj,
                        gen = entry.gen,
                        error = %e,
                        "image stream not decodable"
                    );
                    if has_exif_marker(raw) {
                        exif_objects.push((entry.obj, entry.gen));
                    }
                }
            }
        }

        let mut duplicates: Vec<(String, Vec<(u32, u16)>)> = by_hash
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(hash, ids)| (hex(&hash), ids))
            .collect();
        duplicates.sort_by(|a, b| a.0.cmp(&b.0));
        for (hash, ids) in duplicates {
            findings.push(
                Finding::new(
                    IndicatorKind::DuplicateImagesDifferentXrefs,
                    format!("{} image objects share identical stream bytes", ids.len()),
                )
                .objects(ids)
                .meta("sha256", hash),
            );
        }

        if !exif_objects.is_empty() {
            findings.push(
                Finding::new(
                    IndicatorKind::ImagesWithExif,
                    format!("{} embedded image(s) retain EXIF camera metadata", exif_objects.len()),
                )
                .meta("count", exif_objects.len().to_string())
                .objects(exif_objects.into_iter().take(10)),
            );
        }
        Ok(findings)
    }
}

/// APP1 EXIF header within the leading bytes of the image data.
fn has_exif_marker(data: &[u8]) -> bool {
    let window = &data[..data.len().min(4096)];
    memchr::memmem::find(window, b"Exif").is_some()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
