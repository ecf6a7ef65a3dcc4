//! Packet and filter-criteria model shared by every stage of the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A captured packet, already rendered to text by the capture backend.
///
/// Both strings are reference-counted so that snapshots of large lists are
/// cheap to take under the session lock. A packet is never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    summary: Arc<str>,
    detail: Arc<str>,
}

impl Packet {
    pub fn new(summary: impl Into<Arc<str>>, detail: impl Into<Arc<str>>) -> Self {
        Packet {
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// One-line summary (protocol, endpoints, flags).
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Multi-line detail blob (layers and hex dump).
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// `summary + " " + detail`, the text most criteria are matched against.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.summary.len() + 1 + self.detail.len());
        text.push_str(&self.summary);
        text.push(' ');
        text.push_str(&self.detail);
        text
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.summary, self.detail)
    }
}

/// Structured filter arguments.
///
/// Empty strings are wildcards; `limit == 0` means unbounded. Field names
/// match the parameters of the assistant's `filterPackets` function so the
/// same shape can be read from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub protocol: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: String,
    pub dst_port: String,
    pub free_text: String,
    pub limit: usize,
}

impl FilterCriteria {
    /// Criteria built from free-form assistant text: the whole text,
    /// lower-cased, as a single free-text term.
    pub fn free_text(text: &str) -> Self {
        FilterCriteria {
            free_text: text.to_lowercase(),
            ..FilterCriteria::default()
        }
    }

    /// True when every field is a wildcard and there is no limit.
    pub fn is_wildcard(&self) -> bool {
        self.protocol.is_empty()
            && self.src_ip.is_empty()
            && self.dst_ip.is_empty()
            && self.src_port.is_empty()
            && self.dst_port.is_empty()
            && self.free_text.is_empty()
            && self.limit == 0
    }

    /// Set a field by its parameter name. Returns `false` for unknown names.
    pub fn set_field(&mut self, name: &str, value: &str) -> bool {
        let slot = match name {
            "protocol" | "proto" => &mut self.protocol,
            "src_ip" => &mut self.src_ip,
            "dst_ip" => &mut self.dst_ip,
            "src_port" => &mut self.src_port,
            "dst_port" => &mut self.dst_port,
            "free_text" | "text" => &mut self.free_text,
            "limit" if value.trim().is_empty() => {
                self.limit = 0;
                return true;
            }
            "limit" => {
                return match value.trim().parse::<usize>() {
                    Ok(limit) => {
                        self.limit = limit;
                        true
                    }
                    Err(_) => false,
                };
            }
            _ => return false,
        };
        *slot = value.to_string();
        true
    }
}

impl fmt::Display for FilterCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return write!(f, "(none)");
        }
        let fields = [
            ("protocol", &self.protocol),
            ("src_ip", &self.src_ip),
            ("dst_ip", &self.dst_ip),
            ("src_port", &self.src_port),
            ("dst_port", &self.dst_port),
            ("free_text", &self.free_text),
        ];
        let mut first = true;
        for (name, value) in fields.iter().filter(|(_, v)| !v.is_empty()) {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={:?}", name, value)?;
            first = false;
        }
        if self.limit > 0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "limit={}", self.limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_joins_with_single_space() {
        let p = Packet::new("UDP 9.9.9.9:53", "len=40");
        assert_eq!(p.combined(), "UDP 9.9.9.9:53 len=40");
        assert_eq!(p.to_string(), "UDP 9.9.9.9:53 | len=40");
    }

    #[test]
    fn free_text_lowercases_and_wildcards_the_rest() {
        let c = FilterCriteria::free_text("Only DNS Traffic");
        assert_eq!(c.free_text, "only dns traffic");
        assert!(c.protocol.is_empty());
        assert_eq!(c.limit, 0);
    }

    #[test]
    fn set_field_accepts_known_names_only() {
        let mut c = FilterCriteria::default();
        assert!(c.set_field("protocol", "udp"));
        assert!(c.set_field("dst_port", "53"));
        assert!(c.set_field("limit", "5"));
        assert!(!c.set_field("limit", "many"));
        assert!(c.set_field("limit", ""));
        assert_eq!(c.limit, 0);
        assert!(c.set_field("limit", "5"));
        assert!(!c.set_field("ttl", "64"));
        assert_eq!(c.protocol, "udp");
        assert_eq!(c.dst_port, "53");
        assert_eq!(c.limit, 5);
    }

    #[test]
    fn display_lists_only_active_fields() {
        let mut c = FilterCriteria::default();
        assert_eq!(c.to_string(), "(none)");
        c.protocol = "tcp".into();
        c.limit = 1;
        assert_eq!(c.to_string(), "protocol=\"tcp\" limit=1");
    }

    #[test]
    fn criteria_deserialize_with_defaults() {
        let c: FilterCriteria = toml::from_str("protocol = \"udp\"").unwrap();
        assert_eq!(c.protocol, "udp");
        assert!(c.src_ip.is_empty());
        assert_eq!(c.limit, 0);
    }
}
