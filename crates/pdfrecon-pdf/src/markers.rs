use std::collections::BTreeMap;

/// PDF whitespace per the character classes the format defines: NUL, tab,
/// LF, FF, CR, space.
pub fn is_pdf_whitespace(b: u8) -> bool {
    matches!(b, b'\x00' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

/// PDF delimiter characters. A keyword token ends at any of these or at
/// whitespace.
pub fn is_pdf_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// The fixed set of structural markers located by the raw byte scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Marker {
    Header,
    Eof,
    StartXref,
    Xref,
    Trailer,
    Obj,
    EndObj,
    Stream,
    EndStream,
    Prev,
    Encrypt,
    Linearized,
}

impl Marker {
    pub fn token(self) -> &'static [u8] {
        match self {
            Marker::Header => b"%PDF-",
            Marker::Eof => b"%%EOF",
            Marker::StartXref => b"startxref",
            Marker::Xref => b"xref",
            Marker::Trailer => b"trailer",
            Marker::Obj => b"obj",
            Marker::EndObj => b"endobj",
            Marker::Stream => b"stream",
            Marker::EndStream => b"endstream",
            Marker::Prev => b"/Prev",
            Marker::Encrypt => b"/Encrypt",
            Marker::Linearized => b"/Linearized",
        }
    }
}

/// Offsets of every literal marker occurrence, in file order.
///
/// These are raw offsets: a token inside a string or a stream body is still
/// reported here, and it is the object parser's job to tell structure from
/// embedded data.
#[derive(Debug, Default)]
pub struct MarkerMap {
    offsets: BTreeMap<Marker, Vec<u64>>,
}

impl MarkerMap {
    pub fn offsets(&self, marker: Marker) -> &[u64] {
        self.offsets.get(&marker).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, marker: Marker) -> usize {
        self.offsets(marker).len()
    }

    fn push(&mut self, marker: Marker, offset: usize) {
        self.offsets.entry(marker).or_default().push(offset as u64);
    }
}

// Candidates bucketed by first byte. Longer tokens first so `endstream` wins
// over `endobj`-style prefix ambiguity at the same position.
const PERCENT: [Marker; 2] = [Marker::Header, Marker::Eof];
const S_TOKENS: [Marker; 2] = [Marker::StartXref, Marker::Stream];
const E_TOKENS: [Marker; 2] = [Marker::EndStream, Marker::EndObj];
const SLASH: [Marker; 3] = [Marker::Linearized, Marker::Encrypt, Marker::Prev];

/// Single linear pass over the buffer. Truncated or empty input simply yields
/// an empty map; nothing here is fatal.
pub fn scan_markers(bytes: &[u8]) -> MarkerMap {
    let mut map = MarkerMap::default();
    let mut i = 0usize;
    while i < bytes.len() {
        let candidates: &[Marker] = match bytes[i] {
            b'%' => &PERCENT,
            b's' => &S_TOKENS,
            b'e' => &E_TOKENS,
            b'x' => &[Marker::Xref],
            b't' => &[Marker::Trailer],
            b'o' => &[Marker::Obj],
            b'/' => &SLASH,
            _ => {
                i += 1;
                continue;
            }
        };
        let mut matched = None;
        for &m in candidates {
            let token = m.token();
            if bytes[i..].starts_with(token) && boundary_ok(bytes, i, m) {
                matched = Some((m, token.len()));
                break;
            }
        }
        match matched {
            Some((m, len)) => {
                map.push(m, i);
                i += len;
            }
            None => i += 1,
        }
    }
    map
}

fn boundary_ok(bytes: &[u8], pos: usize, marker: Marker) -> bool {
    match marker {
        // `%`-markers and name tokens carry their own leading delimiter.
        Marker::Header | Marker::Eof | Marker::Prev | Marker::Encrypt | Marker::Linearized => true,
        // Keywords must start a line or follow whitespace/delimiters so that
        // `xref` inside `startxref` or `obj` inside `endobj` do not match.
        _ => match pos.checked_sub(1).and_then(|p| bytes.get(p)) {
            None => true,
            Some(&b) => is_pdf_whitespace(b) || is_pdf_delimiter(b),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_map() {
        let map = scan_markers(b"");
        assert_eq!(map.count(Marker::Eof), 0);
    }

    #[test]
    fn startxref_does_not_double_count_xref() {
        let map = scan_markers(b"startxref\n116\n%%EOF\n");
        assert_eq!(map.count(Marker::StartXref), 1);
        assert_eq!(map.count(Marker::Xref), 0);
        assert_eq!(map.count(Marker::Eof), 1);
    }

    #[test]
    fn endobj_does_not_count_as_obj() {
        let map = scan_markers(b"1 0 obj\n<< >>\nendobj\n");
        assert_eq!(map.count(Marker::Obj), 1);
        assert_eq!(map.count(Marker::EndObj), 1);
    }

    #[test]
    fn endstream_wins_over_endobj_prefix() {
        let map = scan_markers(b"stream\nAB\nendstream\nendobj\n");
        assert_eq!(map.count(Marker::Stream), 1);
        assert_eq!(map.count(Marker::EndStream), 1);
        assert_eq!(map.count(Marker::EndObj), 1);
    }

    #[test]
    fn mixed_line_endings_tolerated() {
        let map = scan_markers(b"%PDF-1.4\r1 0 obj\r\n<< /Prev 10 >>\rendobj\rxref\r");
        assert_eq!(map.count(Marker::Header), 1);
        assert_eq!(map.count(Marker::Obj), 1);
        assert_eq!(map.count(Marker::Prev), 1);
        assert_eq!(map.count(Marker::Xref), 1);
    }

    #[test]
    fn offsets_are_sorted() {
        let map = scan_markers(b"%%EOF junk %%EOF tail %%EOF");
        let offsets = map.offsets(Marker::Eof);
        assert_eq!(offsets.len(), 3);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }
}
