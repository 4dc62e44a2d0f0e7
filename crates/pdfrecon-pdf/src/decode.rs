use std::io::Read;

use anyhow::{anyhow, Result};
use thiserror::Error;
use tracing::warn;

use crate::object::{PdfAtom, PdfDict, PdfName, PdfStream};

/// Result of running a stream body through its declared filter chain.
#[derive(Debug, Clone)]
pub struct DecodedStream {
    pub data: Vec<u8>,
    pub truncated: bool,
    pub filters: Vec<String>,
    /// Set when the chain ended at an image codec that is deliberately left
    /// compressed (DCT/JPX/CCITT/JBIG2). `data` holds the codec input bytes.
    pub deferred_filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unsupported filter {0}")]
    Unsupported(String),
    #[error("filter {filter} failed: {reason}")]
    Failed { filter: String, reason: String },
}

#[derive(Debug, Clone, Copy)]
struct DecodeParms {
    predictor: u32,
    colors: u32,
    bits_per_component: u32,
    columns: u32,
}

const MAX_PARM_VALUE: u32 = 100_000;

/// Decodes a stream's bytes, applying the `/Filter` chain in order. Output is
/// clamped to `max_out` bytes; hitting the clamp sets `truncated` instead of
/// failing, matching the skip-and-record stance of the rest of the parser.
pub fn decode_stream(bytes: &[u8], stream: &PdfStream<'_>, max_out: usize) -> Result<DecodedStream> {
    let start = stream.data_span.start as usize;
    let end = stream.data_span.end as usize;
    if start > end || end > bytes.len() {
        return Err(anyhow!("invalid stream span"));
    }
    let filters = stream_filters(&stream.dict);
    let parms = stream_decode_parms(&stream.dict, filters.len());
    let mut data = bytes[start..end].to_vec();
    let mut truncated = false;
    let mut deferred_filter = None;
    for (idx, filter) in filters.iter().enumerate() {
        if let Some(info) = image_codec(filter) {
            deferred_filter = Some(info.to_string());
            break;
        }
        let (decoded, trunc) = decode_filter(&data, filter, max_out)?;
        data = decoded;
        truncated |= trunc;
        if !truncated {
            if let Some(p) = parms.get(idx).copied().flatten() {
                if is_flate_or_lzw(filter) && p.predictor > 1 {
                    data = apply_predictor(&data, p)?;
                }
            }
        }
        if truncated {
            warn!(
                domain = "pdf.decode",
                kind = "stream_output_clamped",
                filter = filter.as_str(),
                max_out,
                "decoded stream clamped"
            );
            break;
        }
    }
    Ok(DecodedStream { data, truncated, filters, deferred_filter })
}

pub fn stream_filters(dict: &PdfDict<'_>) -> Vec<String> {
    let mut out = Vec::new();
    for key in [&b"/Filter"[..], &b"/F"[..]] {
        if let Some((_, obj)) = dict.get_first(key) {
            match &obj.atom {
                PdfAtom::Name(n) => out.push(name_to_string(n)),
                PdfAtom::Array(items) => {
                    for item in items {
                        if let PdfAtom::Name(n) = &item.atom {
                            out.push(name_to_string(n));
                        }
                    }
                }
                _ => {}
            }
            if !out.is_empty() {
                break;
            }
        }
    }
    out
}

fn stream_decode_parms(dict: &PdfDict<'_>, filter_count: usize) -> Vec<Option<DecodeParms>> {
    let mut out = vec![None; filter_count];
    let Some((_, obj)) = dict.get_first(b"/DecodeParms").or_else(|| dict.get_first(b"/DP")) else {
        return out;
    };
    match &obj.atom {
        PdfAtom::Dict(d) => {
            if let Some(slot) = out.first_mut() {
                *slot = decode_parms_from_dict(d);
            }
        }
        PdfAtom::Array(items) => {
            for (i, item) in items.iter().enumerate().take(filter_count) {
                if let PdfAtom::Dict(d) = &item.atom {
                    out[i] = decode_parms_from_dict(d);
                }
            }
        }
        _ => {}
    }
    out
}

fn decode_parms_from_dict(dict: &PdfDict<'_>) -> Option<DecodeParms> {
    let parms = DecodeParms {
        predictor: dict_u32(dict, b"/Predictor").unwrap_or(1),
        colors: dict_u32(dict, b"/Colors").unwrap_or(1),
        bits_per_component: dict_u32(dict, b"/BitsPerComponent").unwrap_or(8),
        columns: dict_u32(dict, b"/Columns").unwrap_or(1),
    };
    Some(parms)
}

fn dict_u32(dict: &PdfDict<'_>, key: &[u8]) -> Option<u32> {
    dict.int(key).and_then(|v| u32::try_from(v).ok())
}

fn is_flate_or_lzw(filter: &str) -> bool {
    matches!(filter, "/FlateDecode" | "/Fl" | "/LZWDecode" | "/LZW")
}

fn image_codec(filter: &str) -> Option<&'static str> {
    match filter {
        "/DCTDecode" | "/DCT" => Some("/DCTDecode"),
        "/JPXDecode" => Some("/JPXDecode"),
        "/CCITTFaxDecode" | "/CCF" => Some("/CCITTFaxDecode"),
        "/JBIG2Decode" => Some("/JBIG2Decode"),
        _ => None,
    }
}

fn decode_filter(data: &[u8], filter: &str, max_out: usize) -> Result<(Vec<u8>, bool)> {
    match filter {
        "/FlateDecode" | "/Fl" => decode_flate(data, max_out),
        "/LZWDecode" | "/LZW" => decode_lzw(data, max_out),
        "/ASCIIHexDecode" | "/AHx" => Ok((decode_ascii_hex(data), false)),
        "/ASCII85Decode" | "/A85" => decode_ascii85(data),
        "/RunLengthDecode" | "/RL" => Ok(decode_run_length(data, max_out)),
        "/Crypt" => Err(FilterError::Unsupported(filter.to_string()).into()),
        other => Err(FilterError::Unsupported(other.to_string()).into()),
    }
}

fn decode_flate(data: &[u8], max_out: usize) -> Result<(Vec<u8>, bool)> {
    // Some producers emit raw deflate without the zlib wrapper; try both.
    match decode_flate_with(flate2::read::ZlibDecoder::new(data), max_out) {
        Ok(ok) if !ok.0.is_empty() || data.is_empty() => Ok(ok),
        _ => decode_flate_with(flate2::read::DeflateDecoder::new(data), max_out),
    }
}

fn decode_flate_with<R: Read>(mut decoder: R, max_out: usize) -> Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if out.len() + n > max_out {
                    out.extend_from_slice(&buf[..max_out - out.len()]);
                    return Ok((out, true));
                }
                out.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                // Partial output from a corrupt tail is still useful evidence.
                if out.is_empty() {
                    return Err(FilterError::Failed {
                        filter: "/FlateDecode".into(),
                        reason: e.to_string(),
                    }
                    .into());
                }
                return Ok((out, true));
            }
        }
    }
    Ok((out, false))
}

fn decode_lzw(data: &[u8], max_out: usize) -> Result<(Vec<u8>, bool)> {
    let mut decoder = weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8);
    let mut out = Vec::new();
    let mut input = data;
    loop {
        let res = decoder.decode_bytes(input, &mut out);
        let consumed = res.consumed_in;
        input = &input[consumed..];
        if res.status.is_ok() {
            break;
        }
        if out.len() > max_out {
            out.truncate(max_out);
            return Ok((out, true));
        }
        if input.is_empty() {
            break;
        }
    }
    let truncated = out.len() > max_out;
    out.truncate(max_out);
    Ok((out, truncated))
}

pub fn decode_ascii_hex(data: &[u8]) -> Vec<u8> {
    let mut digits = Vec::new();
    for &b in data {
        if b == b'>' {
            break;
        }
        if crate::parser::hex_val(b).is_some() {
            digits.push(b);
        }
    }
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    let mut i = 0;
    while i < digits.len() {
        let hi = crate::parser::hex_val(digits[i]).unwrap_or(0);
        let lo = if i + 1 < digits.len() {
            crate::parser::hex_val(digits[i + 1]).unwrap_or(0)
        } else {
            0
        };
        out.push((hi << 4) | lo);
        i += 2;
    }
    out
}

fn decode_ascii85(data: &[u8]) -> Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut group = [0u8; 5];
    let mut n = 0usize;
    for b in data.iter().copied() {
        match b {
            b'~' => break,
            b'z' if n == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[n] = b - b'!';
                n += 1;
                if n == 5 {
                    push_ascii85_group(&mut out, &group, 5);
                    n = 0;
                }
            }
            b if b.is_ascii_whitespace() => {}
            _ => {
                return Err(FilterError::Failed {
                    filter: "/ASCII85Decode".into(),
                    reason: format!("invalid byte 0x{b:02x}"),
                }
                .into())
            }
        }
    }
    if n > 0 {
        for slot in group.iter_mut().skip(n) {
            *slot = 84;
        }
        push_ascii85_group(&mut out, &group, n);
    }
    Ok((out, false))
}

fn push_ascii85_group(out: &mut Vec<u8>, group: &[u8; 5], present: usize) {
    let mut value = 0u32;
    for &g in group {
        value = value.wrapping_mul(85).wrapping_add(g as u32);
    }
    let bytes = value.to_be_bytes();
    let take = present.saturating_sub(1).min(4);
    out.extend_from_slice(&bytes[..take]);
}

fn decode_run_length(data: &[u8], max_out: usize) -> (Vec<u8>, bool) {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < data.len() {
        let len = data[i];
        i += 1;
        match len {
            0..=127 => {
                let count = len as usize + 1;
                let end = (i + count).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            128 => break,
            _ => {
                if let Some(&b) = data.get(i) {
                    out.extend(std::iter::repeat(b).take(257 - len as usize));
                    i += 1;
                }
            }
        }
        if out.len() > max_out {
            out.truncate(max_out);
            return (out, true);
        }
    }
    (out, false)
}

fn apply_predictor(data: &[u8], parms: DecodeParms) -> Result<Vec<u8>> {
    validate_parms(parms)?;
    match parms.predictor {
        2 => apply_tiff_predictor(data, parms),
        10..=15 => apply_png_predictor(data, parms),
        other => Err(anyhow!("unsupported predictor {other}")),
    }
}

fn validate_parms(parms: DecodeParms) -> Result<()> {
    if parms.colors == 0
        || parms.colors > MAX_PARM_VALUE
        || parms.columns == 0
        || parms.columns > MAX_PARM_VALUE
        || !matches!(parms.bits_per_component, 1 | 2 | 4 | 8 | 16)
    {
        return Err(anyhow!("invalid decode parameters"));
    }
    Ok(())
}

fn bytes_per_pixel(parms: DecodeParms) -> usize {
    ((parms.colors as usize * parms.bits_per_component as usize) + 7) / 8
}

fn row_len(parms: DecodeParms) -> usize {
    (parms.columns as usize * parms.colors as usize * parms.bits_per_component as usize + 7) / 8
}

fn apply_tiff_predictor(data: &[u8], parms: DecodeParms) -> Result<Vec<u8>> {
    if parms.bits_per_component != 8 {
        return Ok(data.to_vec());
    }
    let row = row_len(parms);
    let bpp = bytes_per_pixel(parms);
    let mut out = data.to_vec();
    for r in out.chunks_mut(row) {
        for i in bpp..r.len() {
            r[i] = r[i].wrapping_add(r[i - bpp]);
        }
    }
    Ok(out)
}

fn apply_png_predictor(data: &[u8], parms: DecodeParms) -> Result<Vec<u8>> {
    let row = row_len(parms);
    let bpp = bytes_per_pixel(parms).max(1);
    let stride = row + 1;
    if row == 0 || data.len() % stride != 0 {
        return Err(anyhow!("png predictor row misalignment"));
    }
    let rows = data.len() / stride;
    let mut out = vec![0u8; rows * row];
    let mut prev_row = vec![0u8; row];
    for r in 0..rows {
        let tag = data[r * stride];
        let src = &data[r * stride + 1..r * stride + stride];
        let dst_start = r * row;
        for i in 0..row {
            let raw = src[i];
            let left = if i >= bpp { out[dst_start + i - bpp] } else { 0 };
            let up = prev_row[i];
            let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            let value = match tag {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                _ => return Err(anyhow!("invalid png predictor tag {tag}")),
            };
            out[dst_start + i] = value;
        }
        prev_row.copy_from_slice(&out[dst_start..dst_start + row]);
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn name_to_string(n: &PdfName<'_>) -> String {
    String::from_utf8_lossy(&n.decoded).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ByteRange, PdfDict, PdfName, PdfObj, PdfStream};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn make_name(decoded: &[u8]) -> PdfName<'static> {
        PdfName {
            span: ByteRange::new(0, 0),
            raw: std::borrow::Cow::Borrowed(&b""[..]),
            decoded: decoded.to_vec(),
        }
    }

    fn stream_with_filter(filter: &[u8], data_len: usize) -> PdfStream<'static> {
        let name = make_name(b"/Filter");
        let value = PdfObj {
            span: ByteRange::new(0, 0),
            atom: crate::object::PdfAtom::Name(make_name(filter)),
        };
        PdfStream {
            dict: PdfDict { span: ByteRange::new(0, 0), entries: vec![(name, value)] },
            data_span: ByteRange::new(0, data_len),
        }
    }

    #[test]
    fn flate_roundtrip() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"forensics").unwrap();
        let compressed = enc.finish().unwrap();
        let stream = stream_with_filter(b"/FlateDecode", compressed.len());
        let decoded = decode_stream(&compressed, &stream, 1024).unwrap();
        assert_eq!(decoded.data, b"forensics");
        assert!(!decoded.truncated);
    }

    #[test]
    fn flate_output_clamped() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&vec![0u8; 4096]).unwrap();
        let compressed = enc.finish().unwrap();
        let stream = stream_with_filter(b"/FlateDecode", compressed.len());
        let decoded = decode_stream(&compressed, &stream, 100).unwrap();
        assert!(decoded.truncated);
        assert_eq!(decoded.data.len(), 100);
    }

    #[test]
    fn ascii_hex_decodes_with_terminator() {
        assert_eq!(decode_ascii_hex(b"48 65 6C 6C 6F>garbage"), b"Hello");
    }

    #[test]
    fn ascii85_decodes() {
        let (out, _) = decode_ascii85(b"87cURDZ~>").unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn run_length_decodes() {
        // literal "AB", then 0xFF → repeat next byte 2 times, then EOD
        let (out, truncated) = decode_run_length(&[1, b'A', b'B', 0xFF, b'C', 128], 1024);
        assert_eq!(out, b"ABCC");
        assert!(!truncated);
    }

    #[test]
    fn dct_streams_deferred() {
        let raw = b"\xff\xd8\xff\xe0jpegdata";
        let stream = stream_with_filter(b"/DCTDecode", raw.len());
        let decoded = decode_stream(raw, &stream, 1024).unwrap();
        assert_eq!(decoded.deferred_filter.as_deref(), Some("/DCTDecode"));
        assert_eq!(decoded.data, raw);
    }

    #[test]
    fn png_predictor_up() {
        // Two rows of 3 bytes, predictor tag 2 (Up).
        let data = [0u8, 1, 2, 3, 2, 1, 1, 1];
        let parms =
            DecodeParms { predictor: 12, colors: 1, bits_per_component: 8, columns: 3 };
        let out = apply_png_predictor(&data, parms).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }
}
