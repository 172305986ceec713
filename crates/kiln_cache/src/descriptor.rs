//! Semantic descriptors that name inputs and derived values.
//!
//! A descriptor says *what* a value is ("the value of definition `total`",
//! "the text of `src/a.calc`"), never *where* it currently lives. This is
//! what lets a cache entry survive edits that only move things around.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a node is supplied by the caller or computed by a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Externally supplied each session (e.g. source text).
    Input,
    /// Produced by a computation step.
    Derived,
}

impl NodeKind {
    fn as_str(self) -> &'static str {
        match self {
            NodeKind::Input => "input",
            NodeKind::Derived => "derived",
        }
    }
}

/// A structured, position-independent name for a node.
///
/// Rendered canonically as `<kind>:<query>:<key>`, e.g.
/// `derived:value:total`. The `query` names the computation (or input
/// family); the `key` names its subject. Both may contain anything: `:`
/// and `%` in the query are percent-escaped, so distinct descriptors
/// never render to the same string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Descriptor {
    kind: NodeKind,
    query: String,
    key: String,
}

impl Descriptor {
    /// Describes an input supplied by the caller.
    pub fn input(query: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(NodeKind::Input, query.into(), key.into())
    }

    /// Describes a value derived by a computation step.
    pub fn derived(query: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(NodeKind::Derived, query.into(), key.into())
    }

    fn new(kind: NodeKind, query: String, key: String) -> Self {
        Self { kind, query, key }
    }

    /// Parses the canonical rendering produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let kind = match parts.next()? {
            "input" => NodeKind::Input,
            "derived" => NodeKind::Derived,
            _ => return None,
        };
        let query = unescape_query(parts.next()?)?;
        let key = parts.next()?;
        Some(Self {
            kind,
            query,
            key: key.to_string(),
        })
    }

    /// Returns whether this names an input or a derived value.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns the query (computation or input family) name.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns the subject key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.kind.as_str(),
            escape_query(&self.query),
            self.key
        )
    }
}

fn escape_query(query: &str) -> Cow<'_, str> {
    if query.contains(['%', ':']) {
        Cow::Owned(query.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(query)
    }
}

/// Inverse of [`escape_query`]. Rejects `%` that starts no known escape.
fn unescape_query(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%25") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%3A") {
            out.push(':');
            rest = after;
        } else {
            return None;
        }
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical() {
        assert_eq!(
            Descriptor::derived("value", "total").to_string(),
            "derived:value:total"
        );
        assert_eq!(
            Descriptor::input("file", "src/a.calc").to_string(),
            "input:file:src/a.calc"
        );
    }

    #[test]
    fn parse_inverts_display() {
        let d = Descriptor::input("file", "C:/proj/a.calc");
        assert_eq!(Descriptor::parse(&d.to_string()), Some(d));
    }

    #[test]
    fn colon_in_query_keeps_descriptors_apart() {
        let a = Descriptor::derived("parse", "file:x");
        let b = Descriptor::derived("parse:file", "x");
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(b.to_string(), "derived:parse%3Afile:x");
        assert_eq!(Descriptor::parse(&a.to_string()), Some(a));
        assert_eq!(Descriptor::parse(&b.to_string()), Some(b));
    }

    #[test]
    fn percent_in_query_round_trips() {
        let d = Descriptor::input("100%3A", "k");
        assert_eq!(d.to_string(), "input:100%253A:k");
        assert_eq!(Descriptor::parse(&d.to_string()), Some(d));
        assert!(Descriptor::parse("input:50%:k").is_none());
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        assert!(Descriptor::parse("cached:value:x").is_none());
        assert!(Descriptor::parse("derived:value").is_none());
    }

    #[test]
    fn kind_accessors() {
        let d = Descriptor::derived("emit", "x");
        assert_eq!(d.kind(), NodeKind::Derived);
        assert_eq!(d.query(), "emit");
        assert_eq!(d.key(), "x");
    }
}
