use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use anyhow::Result;
use tracing::{debug, trace};

use pdfrecon_pdf::content::{analyze_page_ops, parse_content_ops, PageContentStats};
use pdfrecon_pdf::decode::{decode_stream, DecodedStream};
use pdfrecon_pdf::object::{ObjId, PdfAtom, PdfStream};
use pdfrecon_pdf::ObjectGraph;

use crate::config::ScanConfig;
use crate::metadata::{extract_metadata, DocumentMetadata};

/// Everything an evaluator may read for one file: the raw bytes, the parsed
/// graph, the configuration, and lazily built shared views (metadata, page
/// content statistics, decoded streams). One context per file; never shared
/// across files.
pub struct ScanContext<'a> {
    pub bytes: &'a [u8],
    pub graph: ObjectGraph<'a>,
    pub config: ScanConfig,
    decoded: DecodedCache,
    metadata: OnceLock<DocumentMetadata>,
    page_stats: OnceLock<Vec<PageStats>>,
    notes: Mutex<Vec<String>>,
}

/// Content statistics for one page, paired with its object id.
#[derive(Debug, Clone)]
pub struct PageStats {
    pub page: ObjId,
    pub stats: PageContentStats,
}

impl<'a> ScanContext<'a> {
    pub fn new(bytes: &'a [u8], graph: ObjectGraph<'a>, config: ScanConfig) -> Self {
        let max = config.max_stream_size;
        Self {
            bytes,
            graph,
            config,
            decoded: DecodedCache::new(max),
            metadata: OnceLock::new(),
            page_stats: OnceLock::new(),
            notes: Mutex::new(Vec::new()),
        }
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        self.metadata
            .get_or_init(|| extract_metadata(&self.graph, self.config.max_stream_size))
    }

    /// Records a non-fatal problem for the report's `errors` list. The scan
    /// keeps going; nothing here aborts anything.
    pub fn note_error(&self, message: impl Into<String>) {
        if let Ok(mut notes) = self.notes.lock() {
            notes.push(message.into());
        }
    }

    pub fn take_errors(&self) -> Vec<String> {
        self.notes.lock().map(|mut n| std::mem::take(&mut *n)).unwrap_or_default()
    }

    /// Decodes a stream through the shared bounded cache.
    pub fn decode_stream(&self, stream: &PdfStream<'a>) -> Result<DecodedStream> {
        self.decoded.get_or_decode(self.bytes, stream)
    }

    /// Per-page content observations, built on first use by concatenating and
    /// decoding each page's `/Contents` and replaying the operator stream.
    pub fn page_stats(&self) -> &[PageStats] {
        self.page_stats.get_or_init(|| {
            let mut out = Vec::new();
            for &page in &self.graph.pages {
                let ops_bytes = self.page_content_bytes(page);
                let ops = parse_content_ops(&ops_bytes);
                trace!(
                    domain = "pdf.content",
                    page = page.0,
                    ops = ops.len(),
                    bytes = ops_bytes.len(),
                    "analyzed page content"
                );
                out.push(PageStats { page, stats: analyze_page_ops(&ops) });
            }
            out
        })
    }

    /// Concatenated decoded `/Contents` for a page. Streams that fail to
    /// decode contribute nothing; the failure belongs to `errors`, not here.
    fn page_content_bytes(&self, page: ObjId) -> Vec<u8> {
        let mut out = Vec::new();
        let Some(entry) = self.graph.get_object(page.0, page.1) else { return out };
        let dict = match &entry.atom {
            PdfAtom::Dict(d) => d,
            PdfAtom::Stream(st) => &st.dict,
            _ => return out,
        };
        let Some(contents) = dict.get(b"/Contents") else { return out };
        let mut stream_ids = Vec::new();
        match &contents.atom {
            PdfAtom::Ref { obj, gen } => stream_ids.push((*obj, *gen)),
            PdfAtom::Array(items) => {
                for item in items {
                    if let PdfAtom::Ref { obj, gen } = item.atom {
                        stream_ids.push((obj, gen));
                    }
                }
            }
            _ => {}
        }
        for (obj, gen) in stream_ids {
            let Some(entry) = self.graph.get_object(obj, gen) else { continue };
            let PdfAtom::Stream(st) = &entry.atom else { continue };
            match self.decode_stream(st) {
                Ok(decoded) => {
                    out.extend_from_slice(&decoded.data);
                    out.push(b'\n');
                }
                Err(e) => {
                    debug!(
                        domain = "pdf.content",
                        kind = "content_stream_decode_failed",
                        obj,
                        gen,
                        error = %e,
                        "skipping content stream"
                    );
                    self.note_error(format!("content stream {obj} {gen}: {e}"));
                }
            }
        }
        out
    }
}

/// Decoded-stream cache, keyed by data span. Bounded per stream by the
/// configured limit; entries are clones, so the cache stays internal.
#[derive(Debug)]
struct DecodedCache {
    max_stream_size: usize,
    cache: Mutex<HashMap<(u64, u64), DecodedStream>>,
}

impl DecodedCache {
    fn new(max_stream_size: usize) -> Self {
        Self { max_stream_size, cache: Mutex::new(HashMap::new()) }
    }

    fn get_or_decode(&self, bytes: &[u8], stream: &PdfStream<'_>) -> Result<DecodedStream> {
        let key = (stream.data_span.start, stream.data_span.end);
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }
        let decoded = decode_stream(bytes, stream, self.max_stream_size)?;
        if decoded.truncated {
            return Err(anyhow::anyhow!(
                "stream at {} exceeds max_stream_size {}",
                key.0,
                self.max_stream_size
            ));
        }
        if let Ok(mut c) = self.cache.lock() {
            c.insert(key, decoded.clone());
        }
        Ok(decoded)
    }
}
