use std::collections::BTreeMap;

use crate::metadata::{parse_any_date, parse_pdf_date, parse_xmp_date, DocumentMetadata};
use crate::model::TimelineEvent;

/// A signature's dated marker: the object it came from and the raw `/M` value.
#[derive(Debug, Clone)]
pub struct SignatureDate {
    pub object: String,
    pub raw: String,
}

/// Merges every dated source into one chronology: Info dates, XMP dates, XMP
/// history entries, signature timestamps, and (when present) the external
/// metadata map. Stable sort by timestamp; unparseable dates keep their raw
/// string, are flagged, and sort to the end in insertion order.
pub fn build_timeline(
    meta: &DocumentMetadata,
    signature_dates: &[SignatureDate],
    external: Option<&BTreeMap<String, String>>,
) -> Vec<TimelineEvent> {
    let mut events = Vec::new();

    for (key, label) in [("CreationDate", "created"), ("ModDate", "modified")] {
        if let Some(raw) = meta.info_value(key) {
            events.push(event(parse_pdf_date(raw), raw, "info", label));
        }
    }
    for (key, label) in [
        ("xmp:CreateDate", "created"),
        ("xmp:ModifyDate", "modified"),
        ("xmp:MetadataDate", "metadata written"),
    ] {
        if let Some(raw) = meta.xmp_value(key) {
            events.push(event(parse_xmp_date(raw), raw, "xmp", label));
        }
    }

    // History entries: one event per rdf:li, labelled with action and agent.
    let mut history: BTreeMap<usize, (Option<String>, Option<String>, Option<String>)> =
        BTreeMap::new();
    for (key, value) in meta.xmp_with_prefix("xmpMM:History/") {
        let Some(index) = li_index(key) else { continue };
        let slot = history.entry(index).or_default();
        if key.ends_with("/stEvt:when") {
            slot.0 = Some(value.to_string());
        } else if key.ends_with("/stEvt:action") {
            slot.1 = Some(value.to_string());
        } else if key.ends_with("/stEvt:softwareAgent") {
            slot.2 = Some(value.to_string());
        }
    }
    for (_, (when, action, agent)) in history {
        let raw = when.unwrap_or_default();
        let label = match (action, agent) {
            (Some(a), Some(s)) => format!("{a} ({s})"),
            (Some(a), None) => a,
            (None, Some(s)) => format!("history ({s})"),
            (None, None) => "history entry".to_string(),
        };
        let parsed = parse_xmp_date(&raw);
        events.push(event(parsed, &raw, "xmp history", &label));
    }

    for sig in signature_dates {
        let parsed = parse_pdf_date(&sig.raw);
        events.push(event(parsed, &sig.raw, "signature", &format!("signed ({})", sig.object)));
    }

    if let Some(map) = external {
        for (key, value) in map {
            if let Some(parsed) = parse_any_date(value) {
                events.push(event(Some(parsed), value, "external metadata", key));
            }
        }
    }

    // Stable: ties and unparseable entries keep insertion order.
    events.sort_by_key(|e| e.when.map(|t| t.timestamp()).unwrap_or(i64::MAX));
    events
}

fn event(
    when: Option<chrono::DateTime<chrono::FixedOffset>>,
    raw: &str,
    source: &str,
    label: &str,
) -> TimelineEvent {
    TimelineEvent {
        unparseable: when.is_none() && !raw.is_empty(),
        when,
        raw: raw.to_string(),
        source: source.to_string(),
        event: label.to_string(),
    }
}

fn li_index(key: &str) -> Option<usize> {
    let start = key.find("rdf:li[")? + "rdf:li[".len();
    let end = key[start..].find(']')? + start;
    key[start..end].parse().ok()
}
