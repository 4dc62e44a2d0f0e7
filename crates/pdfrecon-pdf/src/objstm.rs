use tracing::warn;

use crate::decode::decode_stream;
use crate::object::{PdfAtom, PdfDict, PdfName, PdfObj, PdfStr, PdfStream};
use crate::parser::{ObjEntry, Parser};

const MAX_OBJSTM_COUNT: usize = 100;

/// Lifts compressed objects out of `/Type /ObjStm` streams so that the object
/// index and reference accounting see the whole document, not just the
/// uncompressed layer. Byte ranges on lifted objects point into the decoded
/// buffer and are kept only to size evidence; their provenance is marked.
pub fn expand_object_streams<'a>(
    bytes: &'a [u8],
    objects: &[ObjEntry<'a>],
    max_stream_size: usize,
    max_objects: usize,
) -> Vec<ObjEntry<'a>> {
    let mut out = Vec::new();
    let mut objstm_count = 0usize;
    for entry in objects {
        if max_objects > 0 && objects.len() + out.len() >= max_objects {
            warn!(
                domain = "pdf.objstm",
                kind = "object_budget_reached",
                max_objects,
                "object stream expansion halted"
            );
            break;
        }
        let PdfAtom::Stream(st) = &entry.atom else { continue };
        if !st.dict.has_name(b"/Type", b"/ObjStm") {
            continue;
        }
        objstm_count += 1;
        if objstm_count > MAX_OBJSTM_COUNT {
            warn!(
                domain = "pdf.objstm",
                kind = "objstm_count_exceeded",
                max = MAX_OBJSTM_COUNT,
                "object stream expansion halted"
            );
            break;
        }
        let Some(n) = st.dict.int(b"/N").and_then(|v| usize::try_from(v).ok()) else { continue };
        let Some(first) = st.dict.int(b"/First").and_then(|v| usize::try_from(v).ok()) else {
            continue;
        };
        let Ok(decoded) = decode_stream(bytes, st, max_stream_size) else { continue };
        if decoded.truncated || decoded.data.len() <= first {
            continue;
        }
        let data = decoded.data;
        let pairs = header_numbers(&data[..first], n * 2);
        if pairs.len() < n * 2 {
            continue;
        }
        for idx in 0..n {
            let obj_num = pairs[idx * 2] as u32;
            if obj_num == entry.obj {
                warn!(
                    domain = "pdf.objstm",
                    kind = "objstm_self_reference",
                    obj = obj_num,
                    "object stream lists itself"
                );
                continue;
            }
            let Some(obj_start) = first.checked_add(pairs[idx * 2 + 1] as usize) else { continue };
            if obj_start >= data.len() {
                continue;
            }
            let mut parser = Parser::new(&data, obj_start);
            let Ok(parsed) = parser.parse_object() else { continue };
            if let PdfAtom::Stream(inner) = &parsed.atom {
                if inner.dict.has_name(b"/Type", b"/ObjStm") {
                    continue;
                }
            }
            out.push(ObjEntry {
                obj: obj_num,
                gen: 0,
                atom: own_atom(parsed.atom),
                header_span: st.data_span,
                body_span: parsed.span,
                full_span: st.data_span,
                from_object_stream: true,
            });
        }
    }
    out
}

fn header_numbers(bytes: &[u8], max: usize) -> Vec<u64> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() && out.len() < max {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if start == i {
            break;
        }
        match std::str::from_utf8(&bytes[start..i]).ok().and_then(|s| s.parse::<u64>().ok()) {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}

fn own_atom(atom: PdfAtom<'_>) -> PdfAtom<'static> {
    fn own_name(name: PdfName<'_>) -> PdfName<'static> {
        PdfName {
            span: name.span,
            raw: std::borrow::Cow::Owned(name.raw.into_owned()),
            decoded: name.decoded,
        }
    }

    fn own_str(s: PdfStr<'_>) -> PdfStr<'static> {
        match s {
            PdfStr::Literal { span, raw, decoded } => PdfStr::Literal {
                span,
                raw: std::borrow::Cow::Owned(raw.into_owned()),
                decoded,
            },
            PdfStr::Hex { span, raw, decoded } => PdfStr::Hex {
                span,
                raw: std::borrow::Cow::Owned(raw.into_owned()),
                decoded,
            },
        }
    }

    fn own_dict(dict: PdfDict<'_>) -> PdfDict<'static> {
        PdfDict {
            span: dict.span,
            entries: dict
                .entries
                .into_iter()
                .map(|(k, v)| (own_name(k), PdfObj { span: v.span, atom: own_atom(v.atom) }))
                .collect(),
        }
    }

    match atom {
        PdfAtom::Null => PdfAtom::Null,
        PdfAtom::Bool(v) => PdfAtom::Bool(v),
        PdfAtom::Int(v) => PdfAtom::Int(v),
        PdfAtom::Real(v) => PdfAtom::Real(v),
        PdfAtom::Ref { obj, gen } => PdfAtom::Ref { obj, gen },
        PdfAtom::Name(name) => PdfAtom::Name(own_name(name)),
        PdfAtom::Str(s) => PdfAtom::Str(own_str(s)),
        PdfAtom::Array(arr) => PdfAtom::Array(
            arr.into_iter().map(|o| PdfObj { span: o.span, atom: own_atom(o.atom) }).collect(),
        ),
        PdfAtom::Dict(d) => PdfAtom::Dict(own_dict(d)),
        PdfAtom::Stream(st) => PdfAtom::Stream(PdfStream {
            dict: own_dict(st.dict),
            data_span: st.data_span,
        }),
    }
}
