use crate::object::ByteRange;

/// A content-stream operator with its operands.
#[derive(Debug, Clone)]
pub struct ContentOp {
    pub op: String,
    pub operands: Vec<Operand>,
    pub span: ByteRange,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Number(f64),
    Name(String),
    Str(Vec<u8>),
    Array(Vec<Operand>),
    Bool(bool),
    Null,
    /// Dictionary operands (`BDC`, `DP`) are skipped structurally; their
    /// contents never matter to the page statistics.
    Dict,
}

impl Operand {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Tokenizes decoded content-stream bytes into operators. Strings, arrays and
/// dictionaries are real tokens here: a `(text) Tj` must not be split on the
/// space inside the string. Inline image data between `ID` and `EI` is
/// skipped wholesale.
pub fn parse_content_ops(bytes: &[u8]) -> Vec<ContentOp> {
    let mut ops = Vec::new();
    let mut operands: Vec<Operand> = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        while i < bytes.len() && is_ws(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let start = i;
        match bytes[i] {
            b'%' => {
                while i < bytes.len() && bytes[i] != b'\n' && bytes[i] != b'\r' {
                    i += 1;
                }
            }
            b'(' => {
                let (s, next) = read_literal_string(bytes, i);
                operands.push(Operand::Str(s));
                i = next;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'<') {
                    i = skip_dict(bytes, i);
                    operands.push(Operand::Dict);
                } else {
                    let (s, next) = read_hex_string(bytes, i);
                    operands.push(Operand::Str(s));
                    i = next;
                }
            }
            b'[' => {
                let (arr, next) = read_array(bytes, i + 1, 0);
                operands.push(Operand::Array(arr));
                i = next;
            }
            b'/' => {
                i += 1;
                let name_start = i;
                while i < bytes.len() && !is_ws(bytes[i]) && !is_delim(bytes[i]) {
                    i += 1;
                }
                operands.push(Operand::Name(format!(
                    "/{}",
                    String::from_utf8_lossy(&bytes[name_start..i])
                )));
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => {
                while i < bytes.len() && !is_ws(bytes[i]) && !is_delim(bytes[i]) {
                    i += 1;
                }
                match std::str::from_utf8(&bytes[start..i]).ok().and_then(|s| s.parse().ok()) {
                    Some(v) => operands.push(Operand::Number(v)),
                    None => operands.clear(),
                }
            }
            b')' | b']' | b'>' | b'{' | b'}' => {
                i += 1;
            }
            _ => {
                while i < bytes.len() && !is_ws(bytes[i]) && !is_delim(bytes[i]) {
                    i += 1;
                }
                let tok = &bytes[start..i];
                match tok {
                    b"true" => operands.push(Operand::Bool(true)),
                    b"false" => operands.push(Operand::Bool(false)),
                    b"null" => operands.push(Operand::Null),
                    b"BI" => {
                        ops.push(ContentOp {
                            op: "BI".into(),
                            operands: std::mem::take(&mut operands),
                            span: ByteRange::new(start, i),
                        });
                        i = skip_inline_image(bytes, i);
                    }
                    _ if !tok.is_empty() => {
                        ops.push(ContentOp {
                            op: String::from_utf8_lossy(tok).to_string(),
                            operands: std::mem::take(&mut operands),
                            span: ByteRange::new(start, i),
                        });
                    }
                    _ => i += 1,
                }
            }
        }
    }
    ops
}

fn is_ws(b: u8) -> bool {
    crate::markers::is_pdf_whitespace(b)
}

fn is_delim(b: u8) -> bool {
    crate::markers::is_pdf_delimiter(b)
}

fn read_literal_string(bytes: &[u8], start: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'(' => {
                depth += 1;
                if depth > 1 {
                    out.push(b);
                }
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return (out, i + 1);
                }
                out.push(b);
            }
            b'\\' => {
                if let Some(&next) = bytes.get(i + 1) {
                    out.push(match next {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    });
                    i += 1;
                }
            }
            _ => out.push(b),
        }
        i += 1;
    }
    (out, i)
}

fn read_hex_string(bytes: &[u8], start: usize) -> (Vec<u8>, usize) {
    let mut digits = Vec::new();
    let mut i = start + 1;
    while i < bytes.len() && bytes[i] != b'>' {
        if crate::parser::hex_val(bytes[i]).is_some() {
            digits.push(bytes[i]);
        }
        i += 1;
    }
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    let mut j = 0;
    while j < digits.len() {
        let hi = crate::parser::hex_val(digits[j]).unwrap_or(0);
        let lo = if j + 1 < digits.len() {
            crate::parser::hex_val(digits[j + 1]).unwrap_or(0)
        } else {
            0
        };
        out.push((hi << 4) | lo);
        j += 2;
    }
    (out, (i + 1).min(bytes.len()))
}

fn read_array(bytes: &[u8], mut i: usize, depth: usize) -> (Vec<Operand>, usize) {
    let mut out = Vec::new();
    if depth > 16 {
        return (out, bytes.len());
    }
    while i < bytes.len() {
        while i < bytes.len() && is_ws(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b']' => return (out, i + 1),
            b'(' => {
                let (s, next) = read_literal_string(bytes, i);
                out.push(Operand::Str(s));
                i = next;
            }
            b'<' => {
                let (s, next) = read_hex_string(bytes, i);
                out.push(Operand::Str(s));
                i = next;
            }
            b'[' => {
                let (arr, next) = read_array(bytes, i + 1, depth + 1);
                out.push(Operand::Array(arr));
                i = next;
            }
            b'/' => {
                let start = i + 1;
                i += 1;
                while i < bytes.len() && !is_ws(bytes[i]) && !is_delim(bytes[i]) {
                    i += 1;
                }
                out.push(Operand::Name(format!(
                    "/{}",
                    String::from_utf8_lossy(&bytes[start..i])
                )));
            }
            _ => {
                let start = i;
                while i < bytes.len() && !is_ws(bytes[i]) && !is_delim(bytes[i]) {
                    i += 1;
                }
                if let Some(v) =
                    std::str::from_utf8(&bytes[start..i]).ok().and_then(|s| s.parse().ok())
                {
                    out.push(Operand::Number(v));
                }
                if start == i {
                    i += 1;
                }
            }
        }
    }
    (out, i)
}

fn skip_dict(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"<<") {
            depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b">>") {
            depth = depth.saturating_sub(1);
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    i
}

fn skip_inline_image(bytes: &[u8], mut i: usize) -> usize {
    // Find `ID`, then scan for a whitespace-delimited `EI`.
    while i + 2 <= bytes.len() {
        if &bytes[i..i + 2] == b"ID" {
            i += 2;
            break;
        }
        i += 1;
    }
    while i + 2 <= bytes.len() {
        if &bytes[i..i + 2] == b"EI"
            && i.checked_sub(1).map(|p| is_ws(bytes[p])).unwrap_or(true)
            && bytes.get(i + 2).map(|&b| is_ws(b)).unwrap_or(true)
        {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Per-page observations used by the content indicators.
#[derive(Debug, Clone, Default)]
pub struct PageContentStats {
    /// Highest count of text-positioning operators (`Tm`, `Td`, `TD`, `T*`)
    /// inside a single BT/ET block.
    pub max_positioning_per_block: usize,
    /// Number of `re` rectangles drawn while the fill colour was white.
    pub white_rect_fills: usize,
    /// Total drawing operators on the page.
    pub drawing_ops: usize,
    /// Text shown while rendering mode 3 (invisible) was active, one run per
    /// stretch between mode changes.
    pub invisible_text_runs: Vec<Vec<u8>>,
}

const DRAWING_OPS: &[&str] =
    &["re", "m", "l", "c", "v", "y", "h", "f", "F", "f*", "S", "s", "B", "b"];

const POSITIONING_OPS: &[&str] = &["Tm", "Td", "TD", "T*"];

#[derive(Clone, Copy)]
struct GraphicsState {
    fill_is_white: bool,
    render_mode: i32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self { fill_is_white: false, render_mode: 0 }
    }
}

/// Replays the operator sequence, tracking the graphics-state stack well
/// enough to answer the indicator questions: what was the fill colour when a
/// rectangle was drawn, and was text shown invisibly.
pub fn analyze_page_ops(ops: &[ContentOp]) -> PageContentStats {
    let mut stats = PageContentStats::default();
    let mut stack: Vec<GraphicsState> = Vec::new();
    let mut gs = GraphicsState::default();
    let mut in_text_block = false;
    let mut positioning_in_block = 0usize;
    let mut invisible_run: Vec<u8> = Vec::new();

    for op in ops {
        let name = op.op.as_str();
        if DRAWING_OPS.contains(&name) {
            stats.drawing_ops += 1;
        }
        match name {
            "q" => stack.push(gs),
            "Q" => gs = stack.pop().unwrap_or_default(),
            "rg" => {
                gs.fill_is_white = is_white_rgb(&op.operands);
            }
            "g" => {
                gs.fill_is_white =
                    op.operands.last().and_then(Operand::as_number).map(near_one).unwrap_or(false);
            }
            "k" => {
                // All-zero CMYK is white.
                gs.fill_is_white = op.operands.len() == 4
                    && op.operands.iter().all(|o| o.as_number().map(near_zero).unwrap_or(false));
            }
            "sc" | "scn" => {
                let numbers: Vec<f64> =
                    op.operands.iter().filter_map(Operand::as_number).collect();
                gs.fill_is_white = !numbers.is_empty() && numbers.iter().all(|v| near_one(*v));
            }
            "re" => {
                if gs.fill_is_white {
                    stats.white_rect_fills += 1;
                }
            }
            "BT" => {
                in_text_block = true;
                positioning_in_block = 0;
            }
            "ET" => {
                in_text_block = false;
                stats.max_positioning_per_block =
                    stats.max_positioning_per_block.max(positioning_in_block);
            }
            "Tr" => {
                let new_mode =
                    op.operands.last().and_then(Operand::as_number).map(|v| v as i32).unwrap_or(0);
                if gs.render_mode == 3 && new_mode != 3 && !invisible_run.is_empty() {
                    stats.invisible_text_runs.push(std::mem::take(&mut invisible_run));
                }
                gs.render_mode = new_mode;
            }
            "Tj" | "'" | "\"" => {
                if gs.render_mode == 3 {
                    if let Some(Operand::Str(s)) = op.operands.last() {
                        invisible_run.extend_from_slice(s);
                    }
                }
            }
            "TJ" => {
                if gs.render_mode == 3 {
                    if let Some(Operand::Array(items)) = op.operands.last() {
                        for item in items {
                            if let Operand::Str(s) = item {
                                invisible_run.extend_from_slice(s);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        if in_text_block && POSITIONING_OPS.contains(&name) {
            positioning_in_block += 1;
        }
    }
    if in_text_block {
        stats.max_positioning_per_block = stats.max_positioning_per_block.max(positioning_in_block);
    }
    if !invisible_run.is_empty() {
        stats.invisible_text_runs.push(invisible_run);
    }
    stats
}

fn is_white_rgb(operands: &[Operand]) -> bool {
    let numbers: Vec<f64> = operands.iter().filter_map(Operand::as_number).collect();
    numbers.len() == 3 && numbers.iter().all(|v| near_one(*v))
}

fn near_one(v: f64) -> bool {
    v >= 0.99
}

fn near_zero(v: f64) -> bool {
    v.abs() < 0.01
}
