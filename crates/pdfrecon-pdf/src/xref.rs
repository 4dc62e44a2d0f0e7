use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::decode::decode_stream;
use crate::object::{ByteRange, PdfAtom, PdfDict};
use crate::parser::{parse_indirect_object_at, ParseIssue, Parser};

const MAX_XREF_SECTIONS: usize = 1024;
const MAX_XREF_ENTRIES: usize = 5_000_000;
const MAX_XREF_STREAM_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    Table,
    Stream,
    Unknown,
}

/// One row of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free { next: u32 },
    InFile { offset: u64 },
    InStream { stream_obj: u32, index: u32 },
}

/// One xref section: one `/Prev` hop, one revision boundary.
#[derive(Debug)]
pub struct XrefSection<'a> {
    pub offset: u64,
    pub kind: XrefKind,
    pub entries: BTreeMap<(u32, u16), XrefEntry>,
    pub trailer: Option<PdfDict<'a>>,
    pub prev: Option<u64>,
}

#[derive(Debug)]
pub struct XrefChain<'a> {
    pub sections: Vec<XrefSection<'a>>,
    pub issues: Vec<ParseIssue>,
}

/// Walks the chain from the newest section backwards through `/Prev`.
/// Cycles and out-of-range offsets terminate the walk with an issue recorded.
pub fn parse_xref_chain(bytes: &[u8], startxref: u64) -> XrefChain<'_> {
    let mut sections = Vec::new();
    let mut issues = Vec::new();
    let mut next = Some(startxref);
    let mut seen = HashSet::new();
    while let Some(off) = next {
        if sections.len() >= MAX_XREF_SECTIONS {
            issues.push(issue("xref_chain_too_long", off));
            break;
        }
        if !seen.insert(off) {
            warn!(domain = "pdf.xref", kind = "xref_loop_detected", offset = off, "xref /Prev loop");
            issues.push(issue("xref_prev_loop", off));
            break;
        }
        let offset = off as usize;
        if offset >= bytes.len() {
            warn!(
                domain = "pdf.xref",
                kind = "xref_offset_oob",
                offset = off,
                len = bytes.len(),
                "xref offset out of range"
            );
            issues.push(issue("xref_offset_out_of_range", off));
            break;
        }
        if token_near(bytes, offset, b"xref") {
            match parse_xref_table(bytes, offset, &mut issues) {
                Ok(section) => {
                    debug!(domain = "pdf.xref", offset = off, "parsed xref table");
                    next = section.prev;
                    sections.push(section);
                    continue;
                }
                Err(e) => {
                    issues.push(ParseIssue {
                        kind: "xref_table_parse_error",
                        span: ByteRange::at(offset as u64),
                        note: Some(e.to_string()),
                    });
                }
            }
        }
        match parse_xref_stream(bytes, offset) {
            Ok(section) => {
                debug!(domain = "pdf.xref", offset = off, "parsed xref stream");
                next = section.prev;
                sections.push(section);
                continue;
            }
            Err(e) => {
                issues.push(ParseIssue {
                    kind: "xref_stream_parse_error",
                    span: ByteRange::at(offset as u64),
                    note: Some(e.to_string()),
                });
            }
        }
        sections.push(XrefSection {
            offset: off,
            kind: XrefKind::Unknown,
            entries: BTreeMap::new(),
            trailer: None,
            prev: None,
        });
        break;
    }
    XrefChain { sections, issues }
}

fn issue(kind: &'static str, offset: u64) -> ParseIssue {
    ParseIssue { kind, span: ByteRange::at(offset), note: None }
}

/// Accepts the declared offset pointing at or slightly before the token;
/// off-by-a-few `startxref` values are routine in edited files.
fn token_near(bytes: &[u8], offset: usize, token: &[u8]) -> bool {
    let window = &bytes[offset..(offset + token.len() + 4).min(bytes.len())];
    memchr::memmem::find(window, token).is_some()
}

fn parse_xref_table<'a>(
    bytes: &'a [u8],
    offset: usize,
    issues: &mut Vec<ParseIssue>,
) -> Result<XrefSection<'a>> {
    let mut p = Parser::new(bytes, offset);
    p.skip_ws_and_comments();
    if !p.consume_keyword(b"xref") {
        // Tolerate a short prefix before the keyword.
        let window_end = (offset + 8).min(bytes.len());
        match memchr::memmem::find(&bytes[offset..window_end], b"xref") {
            Some(delta) => {
                p.set_position(offset + delta + 4);
            }
            None => return Err(anyhow!("xref keyword not found")),
        }
    }
    let mut entries = BTreeMap::new();
    loop {
        p.skip_ws_and_comments();
        if p.consume_keyword(b"trailer") {
            break;
        }
        // Subsection header: first object number, entry count.
        let Ok((_, start_str)) = p.read_number_token() else { break };
        p.skip_ws_and_comments();
        let Ok((_, count_str)) = p.read_number_token() else { break };
        let (Ok(start), Ok(count)) = (start_str.parse::<u64>(), count_str.parse::<u64>()) else {
            break;
        };
        if entries.len() as u64 + count > MAX_XREF_ENTRIES as u64 {
            issues.push(issue("xref_entry_budget_exceeded", offset as u64));
            return Err(anyhow!("xref entry budget exceeded"));
        }
        for i in 0..count {
            p.skip_ws_and_comments();
            let Ok((_, f1)) = p.read_number_token() else { break };
            p.skip_ws_and_comments();
            let Ok((_, f2)) = p.read_number_token() else { break };
            p.skip_ws_and_comments();
            let flag = match bytes.get(p.position()) {
                Some(&b) if b == b'n' || b == b'f' => {
                    p.set_position(p.position() + 1);
                    Some(b)
                }
                _ => None,
            };
            let obj_num = match u32::try_from(start + i) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let (Ok(value), Ok(gen)) = (f1.parse::<u64>(), f2.parse::<u32>()) else { continue };
            match flag {
                Some(b'n') => {
                    entries.insert(
                        (obj_num, gen.min(u16::MAX as u32) as u16),
                        XrefEntry::InFile { offset: value },
                    );
                }
                Some(b'f') => {
                    entries.insert(
                        (obj_num, gen.min(u16::MAX as u32) as u16),
                        XrefEntry::Free { next: value.min(u32::MAX as u64) as u32 },
                    );
                }
                _ => {
                    issues.push(ParseIssue {
                        kind: "xref_entry_malformed",
                        span: ByteRange::at(p.position() as u64),
                        note: None,
                    });
                }
            }
        }
    }
    p.skip_ws_and_comments();
    let dict = p.parse_object()?;
    let PdfAtom::Dict(trailer) = dict.atom else {
        return Err(anyhow!("trailer is not a dictionary"));
    };
    let prev = extract_prev(&trailer);
    Ok(XrefSection { offset: offset as u64, kind: XrefKind::Table, entries, trailer: Some(trailer), prev })
}

fn parse_xref_stream(bytes: &[u8], offset: usize) -> Result<XrefSection<'_>> {
    let (res, _) = parse_indirect_object_at(bytes, offset);
    let (entry, _) = res?;
    let PdfAtom::Stream(stream) = entry.atom else {
        return Err(anyhow!("object at offset is not a stream"));
    };
    if !stream.dict.has_name(b"/Type", b"/XRef") {
        return Err(anyhow!("stream is not /Type /XRef"));
    }
    let widths = stream
        .dict
        .array(b"/W")
        .ok_or_else(|| anyhow!("xref stream missing /W"))?
        .iter()
        .filter_map(|o| o.as_int())
        .filter_map(|v| usize::try_from(v).ok())
        .collect::<Vec<_>>();
    if widths.len() < 3 || widths.iter().any(|w| *w > 8) {
        return Err(anyhow!("invalid /W columns"));
    }
    let size = stream.dict.int(b"/Size").unwrap_or(0).max(0) as u64;
    let index = match stream.dict.array(b"/Index") {
        Some(items) => items
            .iter()
            .filter_map(|o| o.as_int())
            .filter_map(|v| u64::try_from(v).ok())
            .collect::<Vec<_>>(),
        None => vec![0, size],
    };
    let decoded = decode_stream(bytes, &stream, MAX_XREF_STREAM_BYTES)?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(anyhow!("zero-width xref rows"));
    }
    let mut entries = BTreeMap::new();
    let mut rows = decoded.data.chunks_exact(row_len);
    'outer: for pair in index.chunks(2) {
        let [start, count] = pair else { break };
        for i in 0..*count {
            let Some(row) = rows.next() else { break 'outer };
            if entries.len() >= MAX_XREF_ENTRIES {
                break 'outer;
            }
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type column defaults the row type to 1.
            let kind = if widths[0] == 0 { 1 } else { be_value(f1) };
            let v2 = be_value(f2);
            let v3 = be_value(f3);
            let Ok(obj_num) = u32::try_from(start + i) else { continue };
            match kind {
                0 => {
                    entries.insert(
                        (obj_num, v3.min(u16::MAX as u64) as u16),
                        XrefEntry::Free { next: v2.min(u32::MAX as u64) as u32 },
                    );
                }
                1 => {
                    entries.insert(
                        (obj_num, v3.min(u16::MAX as u64) as u16),
                        XrefEntry::InFile { offset: v2 },
                    );
                }
                2 => {
                    entries.insert(
                        (obj_num, 0),
                        XrefEntry::InStream {
                            stream_obj: v2.min(u32::MAX as u64) as u32,
                            index: v3.min(u32::MAX as u64) as u32,
                        },
                    );
                }
                _ => {}
            }
        }
    }
    let prev = extract_prev(&stream.dict);
    Ok(XrefSection {
        offset: offset as u64,
        kind: XrefKind::Stream,
        entries,
        trailer: Some(stream.dict),
        prev,
    })
}

fn be_value(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn extract_prev(dict: &PdfDict<'_>) -> Option<u64> {
    match dict.int(b"/Prev") {
        Some(v) if v >= 0 => Some(v as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let obj_off = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref_off = pdf.len();
        pdf.extend_from_slice(b"xref\n0 2\n0000000000 65535 f \n");
        pdf.extend_from_slice(format!("{obj_off:010} 00000 n \n").as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n");
        pdf.extend_from_slice(xref_off.to_string().as_bytes());
        pdf.extend_from_slice(b"\n%%EOF\n");
        pdf
    }

    #[test]
    fn classic_table_entries_parsed() {
        let pdf = table_pdf();
        let xref_off = memchr::memmem::find(&pdf, b"xref").unwrap();
        let chain = parse_xref_chain(&pdf, xref_off as u64);
        assert_eq!(chain.sections.len(), 1);
        let section = &chain.sections[0];
        assert_eq!(section.kind, XrefKind::Table);
        assert!(matches!(section.entries.get(&(0, 65535)), Some(XrefEntry::Free { .. })));
        assert!(matches!(section.entries.get(&(1, 0)), Some(XrefEntry::InFile { .. })));
        assert!(section.trailer.is_some());
        assert_eq!(section.prev, None);
    }

    #[test]
    fn prev_loop_terminates() {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let xref_off = pdf.len();
        pdf.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev ");
        pdf.extend_from_slice(xref_off.to_string().as_bytes());
        pdf.extend_from_slice(b" >>\n");
        let chain = parse_xref_chain(&pdf, xref_off as u64);
        assert_eq!(chain.sections.len(), 1);
        assert!(chain.issues.iter().any(|d| d.kind == "xref_prev_loop"));
    }

    #[test]
    fn out_of_range_offset_recorded() {
        let chain = parse_xref_chain(b"%PDF-1.4\n", 9999);
        assert!(chain.sections.is_empty());
        assert!(chain.issues.iter().any(|d| d.kind == "xref_offset_out_of_range"));
    }

    #[test]
    fn xref_stream_rows_decoded() {
        // Uncompressed xref stream: W [1 2 1], 3 rows.
        let rows: &[u8] = &[
            0, 0, 0, 255, // free object 0
            1, 0, 50, 0, // object 1 at offset 50
            2, 0, 9, 3, // object 2 in stream 9 index 3
        ];
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.5\n");
        let off = pdf.len();
        pdf.extend_from_slice(
            format!(
                "7 0 obj\n<< /Type /XRef /Size 3 /W [1 2 1] /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(rows);
        pdf.extend_from_slice(b"\nendstream\nendobj\n");
        let chain = parse_xref_chain(&pdf, off as u64);
        assert_eq!(chain.sections.len(), 1);
        let section = &chain.sections[0];
        assert_eq!(section.kind, XrefKind::Stream);
        assert_eq!(section.entries.get(&(1, 0)), Some(&XrefEntry::InFile { offset: 50 }));
        assert_eq!(
            section.entries.get(&(2, 0)),
            Some(&XrefEntry::InStream { stream_obj: 9, index: 3 })
        );
    }
}
