use anyhow::{anyhow, Result};
use tracing::{trace, warn};

use crate::markers::{is_pdf_delimiter, is_pdf_whitespace};
use crate::object::{ByteRange, PdfAtom, PdfDict, PdfName, PdfObj, PdfStr, PdfStream};

/// A non-fatal problem observed while parsing. The parser keeps going; the
/// caller decides whether the issue matters for its analysis.
#[derive(Debug, Clone)]
pub struct ParseIssue {
    pub kind: &'static str,
    pub span: ByteRange,
    pub note: Option<String>,
}

/// An indirect object as found in the file, with the spans needed to tie
/// findings back to raw bytes.
#[derive(Debug, Clone)]
pub struct ObjEntry<'a> {
    pub obj: u32,
    pub gen: u16,
    pub atom: PdfAtom<'a>,
    pub header_span: ByteRange,
    pub body_span: ByteRange,
    pub full_span: ByteRange,
    pub from_object_stream: bool,
}

/// Tolerant object parser over a raw byte buffer. The read position lives
/// directly on the parser; there is no separate lexing pass, because PDF
/// syntax is simple enough that each `parse_*` method reads bytes as it goes.
pub struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    issues: Vec<ParseIssue>,
}

const MAX_ARRAY_ELEMENTS: usize = 100_000;
const MAX_DICT_ENTRIES: usize = 10_000;
const MAX_PARSE_DEPTH: usize = 64;

impl<'a> Parser<'a> {
    pub fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos, issues: Vec::new() }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn take_issues(&mut self) -> Vec<ParseIssue> {
        std::mem::take(&mut self.issues)
    }

    fn record_issue(&mut self, kind: &'static str, span: ByteRange, note: Option<String>) {
        self.issues.push(ParseIssue { kind, span, note });
    }

    // Byte-level reads. `rest()` is the window from the current position;
    // everything else is sugar over it.

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }

    fn peek(&self) -> Option<u8> {
        self.rest().first().copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.rest().get(ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn consume_keyword(&mut self, kw: &[u8]) -> bool {
        if self.rest().starts_with(kw) {
            self.pos += kw.len();
            true
        } else {
            false
        }
    }

    /// Skips whitespace and `%` comments in one pass. Comments end at any of
    /// the three line-ending conventions.
    pub fn skip_ws_and_comments(&mut self) {
        while let Some(b) = self.peek() {
            if is_pdf_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.bump() {
                    if c == b'\r' || c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    pub fn parse_object(&mut self) -> Result<PdfObj<'a>> {
        self.parse_object_with_depth(0)
    }

    fn parse_object_with_depth(&mut self, depth: usize) -> Result<PdfObj<'a>> {
        if depth >= MAX_PARSE_DEPTH {
            let span = ByteRange::at(self.pos as u64);
            self.record_issue("parse_depth_exceeded", span, Some(format!("depth={depth}")));
            return Err(anyhow!("parse depth exceeded"));
        }
        self.skip_ws_and_comments();
        let start = self.pos;
        let b = self.peek().ok_or_else(|| anyhow!("eof"))?;
        let atom = match b {
            b'/' => self.parse_name().map(PdfAtom::Name)?,
            b'<' => {
                if self.peek_at(1) == Some(b'<') {
                    let dict = self.parse_dict_with_depth(depth + 1)?;
                    if self.stream_follows() {
                        PdfAtom::Stream(self.parse_stream(dict)?)
                    } else {
                        PdfAtom::Dict(dict)
                    }
                } else {
                    PdfAtom::Str(self.parse_hex_string()?)
                }
            }
            b'(' => PdfAtom::Str(self.parse_literal_string()?),
            b'[' => PdfAtom::Array(self.parse_array_with_depth(depth + 1)?),
            b't' => {
                if self.consume_keyword(b"true") {
                    PdfAtom::Bool(true)
                } else {
                    return Err(anyhow!("unexpected token"));
                }
            }
            b'f' => {
                if self.consume_keyword(b"false") {
                    PdfAtom::Bool(false)
                } else {
                    return Err(anyhow!("unexpected token"));
                }
            }
            b'n' => {
                if self.consume_keyword(b"null") {
                    PdfAtom::Null
                } else {
                    return Err(anyhow!("unexpected token"));
                }
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.parse_number_or_ref()?,
            _ => {
                self.record_issue(
                    "unexpected_token",
                    ByteRange::new(self.pos, self.pos + 1),
                    Some(format!("byte=0x{b:02x}")),
                );
                return Err(anyhow!("unexpected byte {:x}", b));
            }
        };
        Ok(PdfObj { span: ByteRange::new(start, self.pos), atom })
    }

    fn parse_number_or_ref(&mut self) -> Result<PdfAtom<'a>> {
        let (num1_span, num1_str) = self.read_number_token()?;
        let num1 = match parse_number(&num1_str) {
            Ok(v) => v,
            Err(e) => {
                self.record_issue("invalid_number", num1_span, Some(num1_str.clone()));
                return Err(e);
            }
        };
        let after_first = self.pos;

        self.skip_ws_and_comments();
        if let Ok((_, num2_str)) = self.read_number_token() {
            self.skip_ws_and_comments();
            if self.consume_keyword(b"R") {
                if let (Some(obj), Ok(PdfNumber::Int(gen))) = (num1.as_i64(), parse_number(&num2_str))
                {
                    if obj >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok(PdfAtom::Ref { obj: obj as u32, gen: gen as u16 });
                    }
                }
            }
        }
        self.pos = after_first;
        Ok(match num1 {
            PdfNumber::Int(i) => PdfAtom::Int(i),
            PdfNumber::Real(f) => PdfAtom::Real(f),
        })
    }

    fn parse_array_with_depth(&mut self, depth: usize) -> Result<Vec<PdfObj<'a>>> {
        let mut out = Vec::new();
        self.bump();
        loop {
            self.skip_ws_and_comments();
            if self.peek() == Some(b']') {
                self.bump();
                break;
            }
            if self.at_end() {
                self.record_issue("unterminated_array", ByteRange::at(self.pos as u64), None);
                break;
            }
            if out.len() >= MAX_ARRAY_ELEMENTS {
                self.record_issue(
                    "array_size_limit_exceeded",
                    ByteRange::at(self.pos as u64),
                    Some(format!("max_elements={MAX_ARRAY_ELEMENTS}")),
                );
                return Err(anyhow!("array size limit exceeded"));
            }
            out.push(self.parse_object_with_depth(depth + 1)?);
        }
        Ok(out)
    }

    fn parse_dict_with_depth(&mut self, depth: usize) -> Result<PdfDict<'a>> {
        let start = self.pos;
        self.consume_keyword(b"<<");
        let mut entries = Vec::new();
        loop {
            self.skip_ws_and_comments();
            if self.consume_keyword(b">>") {
                break;
            }
            if self.at_end() {
                self.record_issue("unterminated_dict", ByteRange::new(start, self.pos), None);
                break;
            }
            if self.peek() != Some(b'/') {
                // Garbage between entries: resync at the next name or close.
                self.record_issue(
                    "dict_entry_resync",
                    ByteRange::new(self.pos, self.pos + 1),
                    None,
                );
                self.bump();
                while let Some(b) = self.peek() {
                    if b == b'/' || b == b'>' {
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            let name = self.parse_name()?;
            self.skip_ws_and_comments();
            if self.peek() == Some(b'>') {
                break;
            }
            if let Ok(val) = self.parse_object_with_depth(depth + 1) {
                entries.push((name, val));
            } else {
                entries.push((
                    name,
                    PdfObj { span: ByteRange::at(self.pos as u64), atom: PdfAtom::Null },
                ));
            }
            if entries.len() >= MAX_DICT_ENTRIES {
                self.record_issue(
                    "dict_size_limit_exceeded",
                    ByteRange::new(start, self.pos),
                    Some(format!("max_entries={MAX_DICT_ENTRIES}")),
                );
                return Err(anyhow!("dict size limit exceeded"));
            }
        }
        Ok(PdfDict { span: ByteRange::new(start, self.pos), entries })
    }

    fn parse_name(&mut self) -> Result<PdfName<'a>> {
        let start = self.pos;
        self.bump();
        let raw_start = self.pos;
        while let Some(b) = self.peek() {
            if is_pdf_whitespace(b) || is_pdf_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        let raw_end = self.pos;
        let raw = std::borrow::Cow::Borrowed(&self.bytes[start..raw_end]);
        let decoded = decode_name(&self.bytes[raw_start..raw_end]);
        Ok(PdfName { span: ByteRange::new(start, raw_end), raw, decoded })
    }

    fn parse_literal_string(&mut self) -> Result<PdfStr<'a>> {
        let start = self.pos;
        self.bump();
        let mut depth = 1;
        let mut out = Vec::new();
        while let Some(b) = self.bump() {
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b);
                }
                b'\\' => {
                    if let Some(next) = self.bump() {
                        match next {
                            b'n' => out.push(b'\n'),
                            b'r' => out.push(b'\r'),
                            b't' => out.push(b'\t'),
                            b'b' => out.push(0x08),
                            b'f' => out.push(0x0c),
                            b'(' | b')' | b'\\' => out.push(next),
                            b'\n' | b'\r' => {
                                if next == b'\r' && self.peek() == Some(b'\n') {
                                    self.bump();
                                }
                            }
                            b'0'..=b'7' => {
                                let mut val = next - b'0';
                                for _ in 0..2 {
                                    match self.peek() {
                                        Some(d) if (b'0'..=b'7').contains(&d) => {
                                            val = val.wrapping_mul(8).wrapping_add(d - b'0');
                                            self.bump();
                                        }
                                        _ => break,
                                    }
                                }
                                out.push(val);
                            }
                            other => out.push(other),
                        }
                    }
                }
                _ => out.push(b),
            }
        }
        let end = self.pos;
        if depth != 0 {
            self.record_issue("unterminated_literal_string", ByteRange::new(start, end), None);
        }
        Ok(PdfStr::Literal {
            span: ByteRange::new(start, end),
            raw: std::borrow::Cow::Borrowed(&self.bytes[start..end]),
            decoded: out,
        })
    }

    fn parse_hex_string(&mut self) -> Result<PdfStr<'a>> {
        let start = self.pos;
        self.bump();
        let mut digits = Vec::new();
        let mut saw_end = false;
        while let Some(b) = self.bump() {
            if b == b'>' {
                saw_end = true;
                break;
            }
            if is_pdf_whitespace(b) {
                continue;
            }
            digits.push(b);
        }
        let mut out = Vec::with_capacity(digits.len() / 2 + 1);
        let mut i = 0;
        while i < digits.len() {
            let hi = digits[i];
            let lo = if i + 1 < digits.len() { digits[i + 1] } else { b'0' };
            if let (Some(h), Some(l)) = (hex_val(hi), hex_val(lo)) {
                out.push((h << 4) | l);
            }
            i += 2;
        }
        let end = self.pos;
        if !saw_end {
            self.record_issue("unterminated_hex_string", ByteRange::new(start, end), None);
        }
        if digits.len() % 2 == 1 {
            self.record_issue("odd_length_hex_string", ByteRange::new(start, end), None);
        }
        Ok(PdfStr::Hex {
            span: ByteRange::new(start, end),
            raw: std::borrow::Cow::Borrowed(&self.bytes[start..end]),
            decoded: out,
        })
    }

    pub fn read_number_token(&mut self) -> Result<(ByteRange, String)> {
        let start = self.pos;
        let mut out = Vec::new();
        match self.peek() {
            Some(b) if b == b'+' || b == b'-' || b == b'.' || b.is_ascii_digit() => {
                out.push(b);
                self.bump();
            }
            _ => return Err(anyhow!("not a number")),
        }
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || b == b'.' {
                out.push(b);
                self.bump();
            } else {
                break;
            }
        }
        Ok((ByteRange::new(start, self.pos), String::from_utf8_lossy(&out).to_string()))
    }

    fn stream_follows(&mut self) -> bool {
        let saved = self.pos;
        self.skip_ws_and_comments();
        let found = self.rest().starts_with(b"stream");
        self.pos = saved;
        found
    }

    fn parse_stream(&mut self, dict: PdfDict<'a>) -> Result<PdfStream<'a>> {
        self.skip_ws_and_comments();
        self.consume_keyword(b"stream");
        if self.peek() == Some(b'\r') {
            self.bump();
            if self.peek() == Some(b'\n') {
                self.bump();
            }
        } else if self.peek() == Some(b'\n') {
            self.bump();
        }
        let data_start = self.pos;
        let declared = dict.int(b"/Length").filter(|l| *l >= 0).map(|l| l as usize);
        let mut data_end = None;
        if let Some(len) = declared {
            let end = data_start.saturating_add(len);
            if end > self.bytes.len() {
                self.record_issue(
                    "truncated_stream_data",
                    ByteRange::new(data_start, self.bytes.len()),
                    None,
                );
            } else if endstream_at(self.bytes, end) {
                // Trust /Length only when `endstream` actually follows; a wrong
                // length is common in doctored files.
                data_end = Some(end);
            } else {
                self.record_issue(
                    "stream_length_mismatch",
                    ByteRange::new(data_start, end),
                    Some(format!("declared={len}")),
                );
            }
        }
        let data_end = match data_end {
            Some(end) => end,
            None => {
                let mut end =
                    find_endstream(self.bytes, data_start).unwrap_or(self.bytes.len());
                // The EOL before `endstream` belongs to the keyword, not the data.
                if end > data_start && self.bytes[end - 1] == b'\n' {
                    end -= 1;
                }
                if end > data_start && self.bytes[end - 1] == b'\r' {
                    end -= 1;
                }
                end
            }
        };
        self.pos = data_end;
        self.skip_ws_and_comments();
        if !self.consume_keyword(b"endstream") {
            self.record_issue("missing_endstream", ByteRange::at(data_end as u64), None);
        }
        Ok(PdfStream { dict, data_span: ByteRange::new(data_start, data_end) })
    }
}

#[derive(Debug)]
enum PdfNumber {
    Int(i64),
    Real(f64),
}

impl PdfNumber {
    fn as_i64(&self) -> Option<i64> {
        match self {
            PdfNumber::Int(i) => Some(*i),
            PdfNumber::Real(_) => None,
        }
    }
}

fn parse_number(s: &str) -> Result<PdfNumber> {
    if s.contains('.') {
        Ok(PdfNumber::Real(s.parse::<f64>()?))
    } else {
        Ok(PdfNumber::Int(s.parse::<i64>()?))
    }
}

pub(crate) fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + b - b'a'),
        b'A'..=b'F' => Some(10 + b - b'A'),
        _ => None,
    }
}

fn decode_name(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 1);
    out.push(b'/');
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            if let (Some(h), Some(l)) = (hex_val(raw[i + 1]), hex_val(raw[i + 2])) {
                out.push((h << 4) | l);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

fn find_endstream(bytes: &[u8], start: usize) -> Option<usize> {
    memchr::memmem::find(&bytes[start.min(bytes.len())..], b"endstream").map(|p| start + p)
}

fn endstream_at(bytes: &[u8], mut pos: usize) -> bool {
    // Tolerate the EOL that precedes `endstream`.
    for _ in 0..2 {
        if matches!(bytes.get(pos), Some(b'\r') | Some(b'\n')) {
            pos += 1;
        }
    }
    bytes[pos.min(bytes.len())..].starts_with(b"endstream")
}

pub fn parse_indirect_object_at(
    bytes: &[u8],
    offset: usize,
) -> (Result<(ObjEntry<'_>, usize)>, Vec<ParseIssue>) {
    let mut p = Parser::new(bytes, offset);
    let res = (|| -> Result<(ObjEntry<'_>, usize)> {
        p.skip_ws_and_comments();
        let header_start = p.pos;
        let (_, obj_str) = p.read_number_token()?;
        p.skip_ws_and_comments();
        let (_, gen_str) = p.read_number_token()?;
        p.skip_ws_and_comments();
        if !p.consume_keyword(b"obj") {
            return Err(anyhow!("missing obj keyword"));
        }
        let header_end = p.pos;
        let obj_num = obj_str.parse::<u32>()?;
        let gen_num = gen_str.parse::<u16>()?;
        p.skip_ws_and_comments();
        let body_start = p.pos;
        let obj = p.parse_object()?;
        let body_end = p.pos;
        p.skip_ws_and_comments();
        if !p.consume_keyword(b"endobj") {
            // Leave the position where the body ended so the caller can
            // resync on whatever follows, often the next object header.
            p.record_issue("missing_endobj", ByteRange::at(p.pos as u64), None);
            p.pos = body_end;
        }
        let full_end = p.pos;
        trace!(domain = "pdf.parser", obj = obj_num, gen = gen_num, end = full_end, "parsed indirect object");
        let entry = ObjEntry {
            obj: obj_num,
            gen: gen_num,
            atom: obj.atom,
            header_span: ByteRange::new(header_start, header_end),
            body_span: ByteRange::new(body_start, body_end),
            full_span: ByteRange::new(header_start, full_end),
            from_object_stream: false,
        };
        Ok((entry, full_end))
    })();
    let issues = p.take_issues();
    (res, issues)
}

/// Scans the whole buffer for `N G obj ... endobj` records, resyncing after
/// anything unparseable. This is deliberately independent of the xref tables:
/// doctored files routinely carry objects the tables no longer point at.
pub fn scan_indirect_objects(
    bytes: &[u8],
    max_objects: usize,
) -> (Vec<ObjEntry<'_>>, Vec<ParseIssue>) {
    let mut out = Vec::new();
    let mut issues = Vec::new();
    let mut i = 0usize;
    while i + 7 < bytes.len() {
        if max_objects > 0 && out.len() >= max_objects {
            warn!(
                domain = "pdf.parser",
                kind = "max_objects_reached",
                max_objects,
                "object scan budget exhausted"
            );
            issues.push(ParseIssue {
                kind: "max_objects_reached",
                span: ByteRange::new(i, i + 1),
                note: Some(format!("max_objects={max_objects}")),
            });
            break;
        }
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        // Object headers sit at line starts or after whitespace.
        if i > 0 && !is_pdf_whitespace(bytes[i - 1]) {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            continue;
        }
        let mark = i;
        let (res, mut obj_issues) = parse_indirect_object_at(bytes, i);
        match res {
            Ok((entry, end_pos)) => {
                issues.append(&mut obj_issues);
                out.push(entry);
                i = end_pos;
            }
            Err(_) => {
                i = mark + 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
        }
    }
    (out, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PdfAtom;

    #[test]
    fn scan_respects_max_objects() {
        let data = b"1 0 obj<<>>endobj\n2 0 obj<<>>endobj\n3 0 obj<<>>endobj";
        let (objects, _) = scan_indirect_objects(data, 2);
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn literal_string_octal_escape() {
        let mut p = Parser::new(b"(a\\101b)", 0);
        let obj = p.parse_object().unwrap();
        match obj.atom {
            PdfAtom::Str(s) => assert_eq!(s.decoded(), b"aAb"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn nested_parens_balance() {
        let mut p = Parser::new(b"(a(b)c)", 0);
        let obj = p.parse_object().unwrap();
        match obj.atom {
            PdfAtom::Str(s) => assert_eq!(s.decoded(), b"a(b)c"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn indirect_reference_recognized() {
        let mut p = Parser::new(b"<< /Parent 2 0 R /Count 3 >>", 0);
        let obj = p.parse_object().unwrap();
        let PdfAtom::Dict(d) = obj.atom else { panic!("expected dict") };
        assert_eq!(d.get(b"/Parent").and_then(|o| o.as_ref_id()), Some((2, 0)));
        assert_eq!(d.int(b"/Count"), Some(3));
    }

    #[test]
    fn missing_endobj_resyncs() {
        let data = b"1 0 obj << /A 1 >>\n2 0 obj << /B 2 >> endobj";
        let (objects, _) = scan_indirect_objects(data, 0);
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn comments_skipped_between_tokens() {
        let mut p = Parser::new(b"% header comment\r<< /A % inline\n1 >>", 0);
        let obj = p.parse_object().unwrap();
        let PdfAtom::Dict(d) = obj.atom else { panic!("expected dict") };
        assert_eq!(d.int(b"/A"), Some(1));
    }

    #[test]
    fn stream_with_wrong_length_recovers() {
        let data = b"1 0 obj << /Length 999 >> stream\nDATA\nendstream endobj";
        let (res, issues) = parse_indirect_object_at(data, 0);
        let (entry, _) = res.unwrap();
        let PdfAtom::Stream(st) = entry.atom else { panic!("expected stream") };
        assert_eq!(st.data_span.slice(data), Some(&b"DATA"[..]));
        assert!(issues.iter().any(|d| d.kind == "truncated_stream_data"
            || d.kind == "stream_length_mismatch"));
    }

    #[test]
    fn hex_string_with_odd_digits() {
        let mut p = Parser::new(b"<48656C6C6F2>", 0);
        let obj = p.parse_object().unwrap();
        match obj.atom {
            PdfAtom::Str(s) => assert_eq!(s.decoded(), b"Hello "),
            other => panic!("expected string, got {other:?}"),
        }
        assert_eq!(p.take_issues().len(), 1);
    }
}
