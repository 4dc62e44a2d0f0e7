use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Result;
use tracing::{debug, warn};

use crate::markers::{scan_markers, Marker, MarkerMap};
use crate::object::{ObjId, PdfAtom, PdfDict, PdfObj};
use crate::objstm::expand_object_streams;
use crate::parser::{scan_indirect_objects, ObjEntry, ParseIssue, Parser};
use crate::xref::{parse_xref_chain, XrefSection};

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub max_objects: usize,
    pub max_stream_size: usize,
    pub expand_object_streams: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_objects: 500_000,
            max_stream_size: 64 * 1024 * 1024,
            expand_object_streams: true,
        }
    }
}

/// `%PDF-x.y` header, if one was found in the first kilobyte.
#[derive(Debug, Clone, Copy)]
pub struct HeaderInfo {
    pub offset: u64,
    pub major: u8,
    pub minor: u8,
}

impl HeaderInfo {
    /// Version as a comparable number: 1.4 → 14.
    pub fn version_decimal(&self) -> u32 {
        self.major as u32 * 10 + self.minor as u32
    }
}

/// A `startxref` marker and the xref offset it declares.
#[derive(Debug, Clone, Copy)]
pub struct StartXref {
    pub marker_offset: u64,
    pub target: u64,
}

/// One parse of one file's bytes: the raw markers, the object population, the
/// xref chain, and the structural facts every indicator evaluator reads.
#[derive(Debug)]
pub struct ObjectGraph<'a> {
    pub bytes: &'a [u8],
    pub header: Option<HeaderInfo>,
    /// End offsets of every `%%EOF` marker, in file order. Two or more mean
    /// the file carries incremental updates.
    pub eof_offsets: Vec<u64>,
    pub startxrefs: Vec<StartXref>,
    /// Newest first, following the `/Prev` chain.
    pub xref_sections: Vec<XrefSection<'a>>,
    pub objects: Vec<ObjEntry<'a>>,
    pub index: HashMap<ObjId, Vec<usize>>,
    /// Trailer dictionaries, newest first.
    pub trailers: Vec<PdfDict<'a>>,
    pub defined_ids: BTreeSet<ObjId>,
    pub referenced_ids: BTreeSet<ObjId>,
    /// Page object ids in document order.
    pub pages: Vec<ObjId>,
    pub linearized: bool,
    pub markers: MarkerMap,
    pub issues: Vec<ParseIssue>,
}

impl<'a> ObjectGraph<'a> {
    /// Resolves an object id to its *current* definition, the one written
    /// last. That is what a conforming reader displays after incremental
    /// updates.
    pub fn get_object(&self, obj: u32, gen: u16) -> Option<&ObjEntry<'a>> {
        self.index
            .get(&(obj, gen))
            .and_then(|v| v.last().copied())
            .and_then(|idx| self.objects.get(idx))
    }

    pub fn resolve_ref(&self, obj: &PdfObj<'a>) -> Option<&ObjEntry<'a>> {
        match obj.atom {
            PdfAtom::Ref { obj, gen } => self.get_object(obj, gen),
            _ => None,
        }
    }

    /// Follows at most one level of indirection to a dictionary.
    pub fn resolve_dict<'s>(&'s self, obj: &'s PdfObj<'a>) -> Option<&'s PdfDict<'a>> {
        match &obj.atom {
            PdfAtom::Dict(d) => Some(d),
            PdfAtom::Stream(st) => Some(&st.dict),
            PdfAtom::Ref { .. } => self.resolve_ref(obj).and_then(|e| match &e.atom {
                PdfAtom::Dict(d) => Some(d),
                PdfAtom::Stream(st) => Some(&st.dict),
                _ => None,
            }),
            _ => None,
        }
    }

    /// The document catalog: `/Root` from the newest trailer, falling back to
    /// the newest `/Type /Catalog` object in the file.
    pub fn catalog(&self) -> Option<&PdfDict<'a>> {
        for trailer in &self.trailers {
            if let Some(root) = trailer.get(b"/Root") {
                if let Some(dict) = self.resolve_dict(root) {
                    return Some(dict);
                }
            }
        }
        self.objects
            .iter()
            .rev()
            .find_map(|e| match &e.atom {
                PdfAtom::Dict(d) if d.has_name(b"/Type", b"/Catalog") => Some(d),
                _ => None,
            })
    }

    pub fn has_incremental_updates(&self) -> bool {
        self.eof_offsets.len() >= 2
    }

    pub fn uses_xref_streams(&self) -> bool {
        self.xref_sections.iter().any(|s| s.kind == crate::xref::XrefKind::Stream)
    }

    pub fn uses_object_streams(&self) -> bool {
        self.objects.iter().any(|e| match &e.atom {
            PdfAtom::Stream(st) => st.dict.has_name(b"/Type", b"/ObjStm"),
            _ => false,
        })
    }
}

pub fn parse_pdf(bytes: &[u8], options: ParseOptions) -> Result<ObjectGraph<'_>> {
    let markers = scan_markers(bytes);
    let header = find_header(bytes, &markers);
    let eof_offsets: Vec<u64> =
        markers.offsets(Marker::Eof).iter().map(|o| o + Marker::Eof.token().len() as u64).collect();
    let startxrefs = read_startxrefs(bytes, &markers);

    let (mut objects, mut issues) = scan_indirect_objects(bytes, options.max_objects);
    if options.expand_object_streams {
        let lifted =
            expand_object_streams(bytes, &objects, options.max_stream_size, options.max_objects);
        objects.extend(lifted);
    }

    let mut xref_sections = Vec::new();
    if let Some(last) = startxrefs.last() {
        let chain = parse_xref_chain(bytes, last.target);
        xref_sections = chain.sections;
        issues.extend(chain.issues);
    }
    let mut trailers: Vec<PdfDict<'_>> = Vec::new();
    for section in &xref_sections {
        if let Some(t) = &section.trailer {
            trailers.push(t.clone());
        }
    }
    if trailers.is_empty() {
        trailers = recover_trailers(bytes, &markers);
        if !trailers.is_empty() {
            debug!(domain = "pdf.graph", count = trailers.len(), "recovered trailers by marker scan");
        }
    }

    let mut index: HashMap<ObjId, Vec<usize>> = HashMap::new();
    for (i, o) in objects.iter().enumerate() {
        index.entry((o.obj, o.gen)).or_default().push(i);
    }
    let defined_ids: BTreeSet<ObjId> = objects.iter().map(|o| (o.obj, o.gen)).collect();
    let mut referenced_ids = BTreeSet::new();
    for o in &objects {
        collect_refs_atom(&o.atom, &mut referenced_ids);
    }
    for t in &trailers {
        collect_refs_dict(t, &mut referenced_ids);
    }

    let linearized = objects
        .iter()
        .filter(|e| !e.from_object_stream)
        .min_by_key(|e| e.full_span.start)
        .map(|e| match &e.atom {
            PdfAtom::Dict(d) => d.has_key(b"/Linearized"),
            _ => false,
        })
        .unwrap_or(false);

    let mut graph = ObjectGraph {
        bytes,
        header,
        eof_offsets,
        startxrefs,
        xref_sections,
        objects,
        index,
        trailers,
        defined_ids,
        referenced_ids,
        pages: Vec::new(),
        linearized,
        markers,
        issues,
    };
    graph.pages = collect_pages(&graph);
    Ok(graph)
}

fn find_header(bytes: &[u8], markers: &MarkerMap) -> Option<HeaderInfo> {
    let offset = *markers.offsets(Marker::Header).iter().find(|&&o| o < 1024)?;
    let tail = &bytes[offset as usize + 5..];
    let major = tail.first().filter(|b| b.is_ascii_digit()).map(|b| b - b'0')?;
    if tail.get(1) != Some(&b'.') {
        return None;
    }
    let minor = tail.get(2).filter(|b| b.is_ascii_digit()).map(|b| b - b'0')?;
    Some(HeaderInfo { offset, major, minor })
}

fn read_startxrefs(bytes: &[u8], markers: &MarkerMap) -> Vec<StartXref> {
    let mut out = Vec::new();
    for &off in markers.offsets(Marker::StartXref) {
        let mut p = Parser::new(bytes, off as usize + b"startxref".len());
        p.skip_ws_and_comments();
        if let Ok((_, num)) = p.read_number_token() {
            if let Ok(target) = num.parse::<u64>() {
                out.push(StartXref { marker_offset: off, target });
                continue;
            }
        }
        warn!(
            domain = "pdf.graph",
            kind = "startxref_without_offset",
            offset = off,
            "startxref not followed by a number"
        );
    }
    out
}

fn recover_trailers<'a>(bytes: &'a [u8], markers: &MarkerMap) -> Vec<PdfDict<'a>> {
    let mut out = Vec::new();
    for &off in markers.offsets(Marker::Trailer).iter().rev() {
        let mut p = Parser::new(bytes, off as usize + b"trailer".len());
        p.skip_ws_and_comments();
        if let Ok(PdfObj { atom: PdfAtom::Dict(d), .. }) = p.parse_object() {
            out.push(d);
        }
    }
    out
}

fn collect_refs_atom(atom: &PdfAtom<'_>, out: &mut BTreeSet<ObjId>) {
    match atom {
        PdfAtom::Ref { obj, gen } => {
            out.insert((*obj, *gen));
        }
        PdfAtom::Array(items) => {
            for item in items {
                collect_refs_atom(&item.atom, out);
            }
        }
        PdfAtom::Dict(d) => collect_refs_dict(d, out),
        PdfAtom::Stream(st) => collect_refs_dict(&st.dict, out),
        _ => {}
    }
}

fn collect_refs_dict(dict: &PdfDict<'_>, out: &mut BTreeSet<ObjId>) {
    for (_, value) in &dict.entries {
        collect_refs_atom(&value.atom, out);
    }
}

/// Walks the page tree from the catalog, carrying a visited set. Pages trees
/// contain Parent back-pointers and doctored files contain cycles.
fn collect_pages(graph: &ObjectGraph<'_>) -> Vec<ObjId> {
    let mut pages = Vec::new();
    let Some(catalog) = graph.catalog() else { return pages };
    let Some(root) = catalog.get(b"/Pages") else { return pages };
    let Some(root_id) = root.as_ref_id() else { return pages };
    let mut visited = HashSet::new();
    walk_page_node(graph, root_id, &mut visited, &mut pages, 0);
    pages
}

const MAX_PAGE_TREE_DEPTH: usize = 64;

fn walk_page_node(
    graph: &ObjectGraph<'_>,
    id: ObjId,
    visited: &mut HashSet<ObjId>,
    pages: &mut Vec<ObjId>,
    depth: usize,
) {
    if depth > MAX_PAGE_TREE_DEPTH || !visited.insert(id) {
        return;
    }
    let Some(entry) = graph.get_object(id.0, id.1) else { return };
    let dict = match &entry.atom {
        PdfAtom::Dict(d) => d,
        PdfAtom::Stream(st) => &st.dict,
        _ => return,
    };
    if dict.has_name(b"/Type", b"/Page") {
        pages.push(id);
        return;
    }
    if let Some(kids) = dict.array(b"/Kids") {
        for kid in kids {
            if let Some(kid_id) = kid.as_ref_id() {
                walk_page_node(graph, kid_id, visited, pages, depth + 1);
            }
        }
    } else if !dict.has_name(b"/Type", b"/Pages") && dict.has_key(b"/Contents") {
        // Pages written without /Type by sloppy producers.
        pages.push(id);
    }
}

/// Inheritable page attribute lookup (`/MediaBox`, `/CropBox`, `/Resources`),
/// following `/Parent` with a visited set.
pub fn page_attribute<'g, 'a>(
    graph: &'g ObjectGraph<'a>,
    page: ObjId,
    key: &[u8],
) -> Option<&'g PdfObj<'a>> {
    let mut current = Some(page);
    let mut visited = HashSet::new();
    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        let entry = graph.get_object(id.0, id.1)?;
        let dict = match &entry.atom {
            PdfAtom::Dict(d) => d,
            PdfAtom::Stream(st) => &st.dict,
            _ => return None,
        };
        if let Some(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"/Parent").and_then(PdfObj::as_ref_id);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let objects = [
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n",
            "2 0 obj\n<< /Type /Pages /Count 2 /Kids [3 0 R 4 0 R] >>\nendobj\n",
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n",
            "4 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n",
        ];
        let mut offsets = Vec::new();
        for object in objects {
            offsets.push(pdf.len());
            pdf.extend_from_slice(object.as_bytes());
        }
        let xref_off = pdf.len();
        pdf.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
        for off in &offsets {
            pdf.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        pdf.extend_from_slice(b"trailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n");
        pdf.extend_from_slice(xref_off.to_string().as_bytes());
        pdf.extend_from_slice(b"\n%%EOF\n");
        pdf
    }

    #[test]
    fn header_and_eof_recorded() {
        let pdf = simple_pdf();
        let graph = parse_pdf(&pdf, ParseOptions::default()).unwrap();
        let header = graph.header.unwrap();
        assert_eq!((header.major, header.minor), (1, 4));
        assert_eq!(graph.eof_offsets.len(), 1);
        assert_eq!(graph.startxrefs.len(), 1);
        assert!(!graph.has_incremental_updates());
    }

    #[test]
    fn pages_walked_in_order() {
        let pdf = simple_pdf();
        let graph = parse_pdf(&pdf, ParseOptions::default()).unwrap();
        assert_eq!(graph.pages, vec![(3, 0), (4, 0)]);
    }

    #[test]
    fn defined_and_referenced_sets() {
        let pdf = simple_pdf();
        let graph = parse_pdf(&pdf, ParseOptions::default()).unwrap();
        assert!(graph.defined_ids.contains(&(1, 0)));
        assert!(graph.referenced_ids.contains(&(1, 0)), "trailer /Root reference");
        assert!(graph.referenced_ids.contains(&(3, 0)));
        let missing: Vec<_> = graph.referenced_ids.difference(&graph.defined_ids).collect();
        assert!(missing.is_empty());
    }

    #[test]
    fn incremental_update_has_two_eofs() {
        let mut pdf = simple_pdf();
        let base = pdf.len();
        pdf.extend_from_slice(b"5 0 obj\n<< /Annot (late) >>\nendobj\n");
        let xref_off = pdf.len();
        pdf.extend_from_slice(b"xref\n5 1\n");
        pdf.extend_from_slice(format!("{base:010} 00000 n \n").as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R /Prev 9 >>\nstartxref\n");
        pdf.extend_from_slice(xref_off.to_string().as_bytes());
        pdf.extend_from_slice(b"\n%%EOF\n");
        let graph = parse_pdf(&pdf, ParseOptions::default()).unwrap();
        assert_eq!(graph.eof_offsets.len(), 2);
        assert!(graph.has_incremental_updates());
        assert_eq!(graph.startxrefs.len(), 2);
    }

    #[test]
    fn missing_reference_detected() {
        let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 7 0 R >>\nendobj\n%%EOF\n";
        let graph = parse_pdf(pdf, ParseOptions::default()).unwrap();
        let missing: Vec<_> =
            graph.referenced_ids.difference(&graph.defined_ids).copied().collect();
        assert_eq!(missing, vec![(7, 0)]);
    }

    #[test]
    fn page_attribute_inherited_from_parent() {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        pdf.extend_from_slice(
            b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /MediaBox [0 0 100 100] >>\nendobj\n",
        );
        pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");
        pdf.extend_from_slice(b"trailer\n<< /Root 1 0 R >>\n%%EOF\n");
        let graph = parse_pdf(&pdf, ParseOptions::default()).unwrap();
        assert_eq!(graph.pages, vec![(3, 0)]);
        let mb = page_attribute(&graph, (3, 0), b"/MediaBox");
        assert!(mb.is_some());
    }

    #[test]
    fn empty_file_yields_empty_graph() {
        let graph = parse_pdf(b"", ParseOptions::default()).unwrap();
        assert!(graph.header.is_none());
        assert!(graph.eof_offsets.is_empty());
        assert!(graph.objects.is_empty());
    }
}
