use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use pdfrecon_pdf::decode::decode_stream;
use pdfrecon_pdf::object::{PdfAtom, PdfDict};
use pdfrecon_pdf::ObjectGraph;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

/// Optional external metadata provider (the bundled extractor in the desktop
/// product). When absent, the analyzer relies solely on its own Info/XMP
/// parsing.
pub trait MetadataSource: Send + Sync {
    fn extract(&self, path: &Path) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Flattened metadata for one document: the Info dictionary as strings, and
/// the XMP packet as qualified paths
/// (e.g. `xmpMM:History/rdf:Seq/rdf:li[1]/stEvt:when`).
#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub info: BTreeMap<String, String>,
    pub xmp: Option<XmpPacket>,
    /// Non-fatal problems hit while reading metadata (an XMP stream that
    /// would not decode, for instance).
    pub read_errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct XmpPacket {
    pub raw_len: usize,
    pub values: BTreeMap<String, String>,
}

impl DocumentMetadata {
    pub fn info_value(&self, key: &str) -> Option<&str> {
        self.info.get(key).map(String::as_str)
    }

    pub fn xmp_value(&self, key: &str) -> Option<&str> {
        self.xmp.as_ref().and_then(|x| x.values.get(key)).map(String::as_str)
    }

    /// XMP values whose path starts with the given prefix.
    pub fn xmp_with_prefix<'s>(&'s self, prefix: &'s str) -> impl Iterator<Item = (&'s str, &'s str)> {
        self.xmp
            .iter()
            .flat_map(|x| x.values.iter())
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn extract_metadata(graph: &ObjectGraph<'_>, max_stream_size: usize) -> DocumentMetadata {
    let mut meta = DocumentMetadata::default();
    for trailer in &graph.trailers {
        if let Some(info_obj) = trailer.get(b"/Info") {
            if let Some(dict) = graph.resolve_dict(info_obj) {
                meta.info = info_dict_strings(dict);
                break;
            }
        }
    }
    if let Some(catalog) = graph.catalog() {
        if let Some(md_obj) = catalog.get(b"/Metadata") {
            if let Some(entry) = graph.resolve_ref(md_obj) {
                if let PdfAtom::Stream(st) = &entry.atom {
                    match decode_stream(graph.bytes, st, max_stream_size) {
                        Ok(decoded) => {
                            let values = parse_xmp(&decoded.data);
                            debug!(
                                domain = "pdf.metadata",
                                keys = values.len(),
                                bytes = decoded.data.len(),
                                "parsed XMP packet"
                            );
                            meta.xmp =
                                Some(XmpPacket { raw_len: decoded.data.len(), values });
                        }
                        Err(e) => {
                            warn!(
                                domain = "pdf.metadata",
                                kind = "xmp_decode_failed",
                                error = %e,
                                "could not decode XMP stream"
                            );
                            meta.read_errors.push(format!("xmp stream: {e}"));
                        }
                    }
                }
            }
        }
    }
    meta
}

/// The Info dictionary as a flat name → string map. String escapes were
/// already resolved by the object parser; other value types are rendered.
pub fn info_dict_strings(dict: &PdfDict<'_>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in &dict.entries {
        let key = String::from_utf8_lossy(&key.decoded).trim_start_matches('/').to_string();
        let rendered = match &value.atom {
            PdfAtom::Str(s) => String::from_utf8_lossy(s.decoded()).to_string(),
            PdfAtom::Name(n) => String::from_utf8_lossy(&n.decoded).to_string(),
            PdfAtom::Int(i) => i.to_string(),
            PdfAtom::Real(r) => r.to_string(),
            PdfAtom::Bool(b) => b.to_string(),
            _ => continue,
        };
        out.insert(key, rendered);
    }
    out
}

// Wrapper elements that structure the packet but add nothing to a value path.
fn is_wrapper(name: &str) -> bool {
    matches!(
        name,
        "x:xmpmeta" | "rdf:RDF" | "rdf:Description" | "xpacket" | "rdf:Alt" | "rdf:Bag"
    )
}

/// Event-walks the XMP packet into qualified path → text. Both serialization
/// styles are handled: element content and `rdf:Description` attributes.
/// `rdf:li` elements get 1-based indices so history entries stay distinct.
pub fn parse_xmp(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut reader = Reader::from_reader(bytes);
    let mut stack: Vec<String> = Vec::new();
    let mut li_counters: BTreeMap<String, usize> = BTreeMap::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                push_element(&mut stack, &mut li_counters, &name);
                record_attributes(&e, &stack, &mut out);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                push_element(&mut stack, &mut li_counters, &name);
                record_attributes(&e, &stack, &mut out);
                if !is_wrapper(&name) {
                    stack.pop();
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if !is_wrapper(&name) {
                    stack.pop();
                }
            }
            Ok(Event::Text(t)) => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim();
                    if !text.is_empty() && !stack.is_empty() {
                        out.entry(stack.join("/")).or_insert_with(|| text.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(domain = "pdf.metadata", kind = "xmp_parse_error", error = %e, "XMP packet malformed");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    out
}

fn push_element(stack: &mut Vec<String>, li_counters: &mut BTreeMap<String, usize>, name: &str) {
    if is_wrapper(name) {
        return;
    }
    if name == "rdf:li" {
        let parent = stack.join("/");
        let counter = li_counters.entry(parent).or_insert(0);
        *counter += 1;
        stack.push(format!("rdf:li[{counter}]"));
    } else {
        stack.push(name.to_string());
    }
}

fn record_attributes(
    e: &quick_xml::events::BytesStart<'_>,
    stack: &[String],
    out: &mut BTreeMap<String, String>,
) {
    let path = stack.join("/");
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if key.starts_with("xmlns") || key == "rdf:about" || key == "about" {
            continue;
        }
        let value = String::from_utf8_lossy(&attr.value).to_string();
        let full = if path.is_empty() { key } else { format!("{path}/{key}") };
        out.entry(full).or_insert(value);
    }
}

/// PDF date strings: `D:YYYYMMDDHHmmSS±HH'mm'`, with every trailing component
/// optional. Returns `None` for anything unparseable; callers preserve the
/// raw string.
pub fn parse_pdf_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits: Vec<u8> = s.bytes().take_while(|b| b.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let num = |range: std::ops::Range<usize>, default: u32| -> u32 {
        if digits.len() >= range.end {
            std::str::from_utf8(&digits[range])
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        } else {
            default
        }
    };
    let year: i32 = std::str::from_utf8(&digits[0..4]).ok()?.parse().ok()?;
    let month = num(4..6, 1).clamp(1, 12);
    let day = num(6..8, 1).clamp(1, 31);
    let hour = num(8..10, 0).min(23);
    let minute = num(10..12, 0).min(59);
    let second = num(12..14, 0).min(59);

    let tz_part = &s[digits.len()..];
    let offset = parse_pdf_tz(tz_part).unwrap_or_else(|| Utc.fix());

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, minute, second)?;
    offset.from_local_datetime(&naive).single()
}

fn parse_pdf_tz(s: &str) -> Option<FixedOffset> {
    let mut chars = s.chars();
    match chars.next()? {
        'Z' => Some(Utc.fix()),
        sign @ ('+' | '-') => {
            let rest: String = chars.collect();
            let mut parts = rest.split('\'').filter(|p| !p.is_empty());
            let hours: i32 = parts.next()?.parse().ok()?;
            let minutes: i32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
            let total = (hours * 3600 + minutes * 60) * if sign == '-' { -1 } else { 1 };
            FixedOffset::east_opt(total)
        }
        _ => None,
    }
}

/// XMP dates are ISO-8601, sometimes without zone or time.
pub fn parse_xmp_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Utc.fix().from_local_datetime(&naive).single();
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Utc.fix().from_local_datetime(&naive).single();
    }
    None
}

/// Parses either convention; used where the source of the string is unknown
/// (external metadata map, signature `/M` values).
pub fn parse_any_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    if raw.trim_start().starts_with("D:") {
        parse_pdf_date(raw)
    } else {
        parse_xmp_date(raw).or_else(|| parse_pdf_date(raw))
    }
}
