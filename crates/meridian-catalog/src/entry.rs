//! The on-the-wire encoding of a replication log entry.
//!
//! Entries use a line-oriented `key: value` text format. Parsers skip keys
//! they do not recognize, so fields can be added without breaking older
//! replicas. Values are escaped to stay on one line.

use crate::error::{ReplicationError, Result};

/// Version written into every entry. Readers accept newer versions and
/// simply ignore fields they do not know.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// One entry of the replication log.
///
/// An entry with an empty query and no hosts is a *heartbeat*: it triggers
/// follower work (such as refreshing the cluster topology) without mutating
/// any schema. Replica registration writes one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEntry {
    /// The statement to apply, in wire form; empty for heartbeats.
    pub query: String,
    /// Host id of the proposing replica; empty for heartbeats.
    pub initiator: String,
    /// Host ids expected to execute the entry; unused by replicated groups
    /// (every registered replica executes), kept for compatibility.
    pub hosts: Vec<String>,
}

impl LogEntry {
    /// Creates an entry carrying a statement.
    #[must_use]
    pub fn new(query: impl Into<String>, initiator: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            initiator: initiator.into(),
            hosts: Vec::new(),
        }
    }

    /// Creates a heartbeat entry.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// Whether this entry is a heartbeat.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.query.is_empty() && self.hosts.is_empty()
    }

    /// Renders the entry in wire form.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("version: {ENTRY_FORMAT_VERSION}\n"));
        out.push_str(&format!("query: {}\n", escape_line(&self.query)));
        out.push_str(&format!("hosts: {}\n", self.hosts.join(",")));
        out.push_str(&format!("initiator: {}\n", escape_line(&self.initiator)));
        out
    }

    /// Parses an entry from wire form.
    ///
    /// Unknown keys are ignored; missing keys default to empty. A line
    /// without a `key: ` shape makes the entry unreadable.
    ///
    /// # Errors
    ///
    /// Returns a logical error for a malformed line; log entries are written
    /// by this subsystem, so unreadable ones signal corruption.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entry = Self::default();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(": ").or_else(|| {
                line.strip_suffix(':').map(|key| (key, ""))
            }) else {
                return Err(ReplicationError::logical(format!(
                    "malformed log entry line: {line:?}"
                )));
            };
            match key {
                "query" => entry.query = unescape_line(value),
                "initiator" => entry.initiator = unescape_line(value),
                "hosts" => {
                    entry.hosts = value
                        .split(',')
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                // "version" and any future keys
                _ => {}
            }
        }
        Ok(entry)
    }
}

fn escape_line(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_line(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_roundtrip() {
        let entry = LogEntry::heartbeat();
        assert!(entry.is_heartbeat());

        let parsed = LogEntry::parse(&entry.to_wire()).unwrap();
        assert_eq!(parsed, entry);
        assert!(parsed.is_heartbeat());
    }

    #[test]
    fn statement_roundtrip_preserves_newlines() {
        let entry = LogEntry::new("line one\nline two\\with slash", "host:9000:uuid");
        let parsed = LogEntry::parse(&entry.to_wire()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn hosts_roundtrip() {
        let mut entry = LogEntry::new("q", "i");
        entry.hosts = vec!["a:1:u".into(), "b:2:u".into()];
        let parsed = LogEntry::parse(&entry.to_wire()).unwrap();
        assert_eq!(parsed.hosts, entry.hosts);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = "version: 7\nquery: q\nshiny_new_field: whatever\nhosts: \ninitiator: i\n";
        let parsed = LogEntry::parse(text).unwrap();
        assert_eq!(parsed.query, "q");
        assert_eq!(parsed.initiator, "i");
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(LogEntry::parse("no separator here").is_err());
    }
}
