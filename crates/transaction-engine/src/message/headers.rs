//! Typed header values used by the transaction engine.
//!
//! Only the headers that take part in transaction identity, matching or
//! engine-generated messages are modelled. Everything else travels as an
//! [`ExtensionHeader`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Method;
use crate::transport::TransportKind;

/// Branch prefix mandated by RFC 3261 section 8.1.1.7
pub const RFC3261_BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A SIP or SIPS URI kept in its textual form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Uri {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// From or To header value: an address with an optional tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub tag: Option<String>,
}

impl Party {
    pub fn new(uri: impl Into<Uri>) -> Self {
        Self {
            display_name: None,
            uri: uri.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

/// A single Via header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub transport: TransportKind,
    /// host[:port] of the sender
    pub sent_by: String,
    pub branch: Option<String>,
    pub received: Option<String>,
    pub rport: Option<u16>,
}

impl Via {
    pub fn new(transport: TransportKind, sent_by: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            transport,
            sent_by: sent_by.into(),
            branch,
            received: None,
            rport: None,
        }
    }

    /// Whether the branch follows RFC 3261 and can be used for matching on its own
    pub fn has_magic_cookie(&self) -> bool {
        self.branch
            .as_deref()
            .is_some_and(|b| b.starts_with(RFC3261_BRANCH_MAGIC_COOKIE))
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={}", received)?;
        }
        if let Some(rport) = self.rport {
            write!(f, ";rport={}", rport)?;
        }
        Ok(())
    }
}

/// CSeq header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// RAck header value (RFC 3262)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RAck {
    pub rseq: u32,
    pub cseq: u32,
    pub method: Method,
}

impl fmt::Display for RAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rseq, self.cseq, self.method)
    }
}

/// Any header the engine does not interpret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionHeader {
    pub name: String,
    pub value: String,
}

impl ExtensionHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Case-insensitive comparison for branch and tag parameters.
///
/// Absent only equals absent; an empty string is a present value.
pub fn params_match(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_match_absence() {
        assert!(params_match(None, None));
        assert!(!params_match(None, Some("")));
        assert!(!params_match(Some(""), None));
        assert!(params_match(Some("AbC"), Some("abc")));
        assert!(!params_match(Some("abc"), Some("abd")));
    }

    #[test]
    fn test_via_display_and_cookie() {
        let via = Via::new(TransportKind::Udp, "10.0.0.1:5060", Some("z9hG4bK-1".into()));
        assert_eq!(via.to_string(), "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK-1");
        assert!(via.has_magic_cookie());
        let old = Via::new(TransportKind::Udp, "10.0.0.1", Some("abc".into()));
        assert!(!old.has_magic_cookie());
    }

    #[test]
    fn test_party_display() {
        let party = Party::new("sip:alice@example.com")
            .with_display_name("Alice")
            .with_tag("1928301774");
        assert_eq!(
            party.to_string(),
            "\"Alice\" <sip:alice@example.com>;tag=1928301774"
        );
    }
}
