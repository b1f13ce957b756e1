use crate::ledger::LedgerEntry;
use crate::state::ItemState;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// Every ledger header starts with this
pub const HEADER_PREFIX: &str = "# facility-harvester progress ledger v1";

/// Encodes an entry as one newline-terminated line
pub fn encode_entry(entry: &LedgerEntry) -> String {
    let mut line = format!(
        "{}\t{}\t{}",
        entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        entry.state.to_log_string(),
        escape(&entry.id)
    );
    if let Some(error) = &entry.error_detail {
        line.push('\t');
        line.push_str(&escape(error));
    }
    line.push('\n');
    line
}

/// Parses ledger text into entries, in file order
///
/// Never fails: the header, blank lines, comments and lines that do not
/// parse are skipped, and so is a final line missing its newline, since
/// that is what a write cut short by a crash looks like.
pub fn parse_ledger(text: &str) -> Vec<LedgerEntry> {
    let complete = match text.rfind('\n') {
        Some(end) => &text[..=end],
        None => return Vec::new(),
    };

    complete.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<LedgerEntry> {
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.splitn(4, '\t');
    let timestamp = DateTime::parse_from_rfc3339(fields.next()?)
        .ok()?
        .with_timezone(&Utc);
    let state = ItemState::from_log_string(fields.next()?)?;
    let id = unescape(fields.next()?)?;
    if id.is_empty() {
        return None;
    }
    let error_detail = match fields.next() {
        Some(raw) => Some(unescape(raw)?),
        None => None,
    };

    Some(LedgerEntry {
        timestamp,
        state,
        id,
        error_detail,
    })
}

/// Folds entries into the latest entry per id (last write wins)
pub fn latest_states(entries: &[LedgerEntry]) -> HashMap<String, LedgerEntry> {
    let mut latest = HashMap::new();
    for entry in entries {
        latest.insert(entry.id.clone(), entry.clone());
    }
    latest
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            't' => out.push('\t'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}
