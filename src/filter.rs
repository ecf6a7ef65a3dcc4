//! Multi-field packet filter.
//!
//! Every non-empty criterion is compiled once per [`apply`] call into a
//! case-insensitive regular expression. A criterion that is not a valid
//! expression (e.g. `"tcp("`) silently degrades to a case-insensitive
//! substring test; filtering itself never fails.

use regex::{Regex, RegexBuilder};

use crate::packet::{FilterCriteria, Packet};

/// Which part of the packet a criterion is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Summary,
    Combined,
}

#[derive(Debug)]
enum Matcher {
    Regex(Regex),
    /// Lower-cased needle for the substring fallback.
    Substring(String),
}

impl Matcher {
    fn compile(expr: &str) -> Self {
        match RegexBuilder::new(expr).case_insensitive(true).build() {
            Ok(re) => Matcher::Regex(re),
            Err(err) => {
                tracing::trace!(expr, error = %err, "criterion is not a regex, using substring match");
                Matcher::Substring(expr.to_lowercase())
            }
        }
    }

    fn is_match(&self, haystack: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(haystack),
            Matcher::Substring(needle) => haystack.to_lowercase().contains(needle.as_str()),
        }
    }
}

/// Criteria compiled for repeated evaluation against many packets.
#[derive(Debug)]
pub struct CompiledFilter {
    // Evaluation order: protocol, src_ip, dst_ip, src_port, dst_port, free_text.
    terms: Vec<(Target, Matcher)>,
    limit: usize,
}

impl CompiledFilter {
    pub fn new(criteria: &FilterCriteria) -> Self {
        let fields = [
            (&criteria.protocol, Target::Combined),
            (&criteria.src_ip, Target::Summary),
            (&criteria.dst_ip, Target::Summary),
            (&criteria.src_port, Target::Combined),
            (&criteria.dst_port, Target::Combined),
            (&criteria.free_text, Target::Combined),
        ];
        let terms = fields
            .iter()
            .filter(|(expr, _)| !expr.is_empty())
            .map(|(expr, target)| (*target, Matcher::compile(expr)))
            .collect();
        CompiledFilter {
            terms,
            limit: criteria.limit,
        }
    }

    /// True if every non-wildcard criterion matches. Short-circuits on the
    /// first miss.
    pub fn matches(&self, packet: &Packet) -> bool {
        let mut combined: Option<String> = None;
        for (target, matcher) in &self.terms {
            let haystack = match target {
                Target::Summary => packet.summary(),
                Target::Combined => combined.get_or_insert_with(|| packet.combined()).as_str(),
            };
            if !matcher.is_match(haystack) {
                return false;
            }
        }
        true
    }

    /// Filter `packets`, preserving order and stopping after `limit` hits.
    pub fn apply(&self, packets: &[Packet]) -> Vec<Packet> {
        let mut out = Vec::new();
        for packet in packets {
            if !self.matches(packet) {
                continue;
            }
            out.push(packet.clone());
            if self.limit > 0 && out.len() >= self.limit {
                break;
            }
        }
        out
    }
}

/// Return the packets of `packets` that satisfy `criteria`, in their
/// original order, truncated to the first `criteria.limit` matches when the
/// limit is non-zero.
pub fn apply(packets: &[Packet], criteria: &FilterCriteria) -> Vec<Packet> {
    CompiledFilter::new(criteria).apply(packets)
}
