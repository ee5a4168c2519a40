//! # SIP Message Model
//!
//! A compact typed representation of the SIP messages the transaction engine
//! creates, inspects and forwards. Parsing of wire bytes belongs to the
//! transport collaborator; this module only offers typed access to the headers
//! that transaction identity depends on and a wire encoding through
//! [`std::fmt::Display`].
//!
//! ```
//! use rvoip_transaction_engine::message::{Method, Party, Request, Response, Via};
//! use rvoip_transaction_engine::transport::TransportKind;
//!
//! let request = Request::new(Method::Options, "sip:bob@example.com")
//!     .with_via(Via::new(TransportKind::Udp, "10.0.0.1:5060", Some("z9hG4bK-1".into())))
//!     .with_from(Party::new("sip:alice@example.com").with_tag("a1"))
//!     .with_to(Party::new("sip:bob@example.com"))
//!     .with_call_id("call-1@10.0.0.1")
//!     .with_cseq(1);
//!
//! let response = Response::for_request(&request, 200);
//! assert_eq!(response.branch(), Some("z9hG4bK-1"));
//! assert!(response.to_string().starts_with("SIP/2.0 200 OK\r\n"));
//! ```

mod headers;
mod method;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use headers::{
    params_match, CSeq, ExtensionHeader, Party, RAck, Uri, Via, RFC3261_BRANCH_MAGIC_COOKIE,
};
pub use method::Method;

use crate::auth::{Challenge, Credentials};

/// Option tag for reliable provisional responses (RFC 3262)
pub const OPTION_TAG_100REL: &str = "100rel";

/// Header fields of a request or response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    pub via: Vec<Via>,
    pub from: Option<Party>,
    pub to: Option<Party>,
    pub call_id: Option<String>,
    pub cseq: Option<CSeq>,
    pub max_forwards: Option<u8>,
    pub contact: Option<Uri>,
    pub require: Vec<String>,
    pub supported: Vec<String>,
    pub rseq: Option<u32>,
    pub rack: Option<RAck>,
    /// Authorization and Proxy-Authorization values
    pub authorization: Vec<Credentials>,
    /// WWW-Authenticate and Proxy-Authenticate values
    pub challenges: Vec<Challenge>,
    pub extensions: Vec<ExtensionHeader>,
}

impl Headers {
    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }

    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(|v| v.branch.as_deref())
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.from.as_ref().and_then(|p| p.tag.as_deref())
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to.as_ref().and_then(|p| p.tag.as_deref())
    }

    pub fn requires(&self, option_tag: &str) -> bool {
        self.require.iter().any(|t| t.eq_ignore_ascii_case(option_tag))
    }

    pub fn supports(&self, option_tag: &str) -> bool {
        self.supported.iter().any(|t| t.eq_ignore_ascii_case(option_tag)) || self.requires(option_tag)
    }

    fn encode(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for via in &self.via {
            write!(f, "Via: {}\r\n", via)?;
        }
        if let Some(max_forwards) = self.max_forwards {
            write!(f, "Max-Forwards: {}\r\n", max_forwards)?;
        }
        if let Some(from) = &self.from {
            write!(f, "From: {}\r\n", from)?;
        }
        if let Some(to) = &self.to {
            write!(f, "To: {}\r\n", to)?;
        }
        if let Some(call_id) = &self.call_id {
            write!(f, "Call-ID: {}\r\n", call_id)?;
        }
        if let Some(cseq) = &self.cseq {
            write!(f, "CSeq: {}\r\n", cseq)?;
        }
        if let Some(contact) = &self.contact {
            write!(f, "Contact: <{}>\r\n", contact)?;
        }
        if !self.require.is_empty() {
            write!(f, "Require: {}\r\n", self.require.join(", "))?;
        }
        if !self.supported.is_empty() {
            write!(f, "Supported: {}\r\n", self.supported.join(", "))?;
        }
        if let Some(rseq) = self.rseq {
            write!(f, "RSeq: {}\r\n", rseq)?;
        }
        if let Some(rack) = &self.rack {
            write!(f, "RAck: {}\r\n", rack)?;
        }
        for credentials in &self.authorization {
            let name = if credentials.is_proxy { "Proxy-Authorization" } else { "Authorization" };
            write!(f, "{}: {}\r\n", name, credentials)?;
        }
        for challenge in &self.challenges {
            let name = if challenge.is_proxy { "Proxy-Authenticate" } else { "WWW-Authenticate" };
            write!(f, "{}: {}\r\n", name, challenge)?;
        }
        for header in &self.extensions {
            write!(f, "{}: {}\r\n", header.name, header.value)?;
        }
        Ok(())
    }
}

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<Uri>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    pub fn with_via(mut self, via: Via) -> Self {
        self.headers.via.push(via);
        self
    }

    pub fn with_from(mut self, from: Party) -> Self {
        self.headers.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: Party) -> Self {
        self.headers.to = Some(to);
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.headers.call_id = Some(call_id.into());
        self
    }

    /// Sets the CSeq using this request's own method
    pub fn with_cseq(mut self, seq: u32) -> Self {
        self.headers.cseq = Some(CSeq::new(seq, self.method.clone()));
        self
    }

    pub fn with_contact(mut self, contact: impl Into<Uri>) -> Self {
        self.headers.contact = Some(contact.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.extensions.push(ExtensionHeader::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.call_id.as_deref()
    }

    pub fn branch(&self) -> Option<&str> {
        self.headers.branch()
    }

    pub fn top_via(&self) -> Option<&Via> {
        self.headers.top_via()
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.headers.from_tag()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.headers.to_tag()
    }

    pub fn cseq(&self) -> Option<&CSeq> {
        self.headers.cseq.as_ref()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)?;
        self.headers.encode(f)?;
        write!(f, "Content-Length: {}\r\n\r\n", self.body.len())?;
        f.write_str(&String::from_utf8_lossy(&self.body))
    }
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    /// Builds a response to `request` copying Via, From, To, Call-ID and CSeq
    /// as RFC 3261 section 8.2.6.2 requires.
    pub fn for_request(request: &Request, status: u16) -> Self {
        let mut response = Self::new(status);
        response.headers.via = request.headers.via.clone();
        response.headers.from = request.headers.from.clone();
        response.headers.to = request.headers.to.clone();
        response.headers.call_id = request.headers.call_id.clone();
        response.headers.cseq = request.headers.cseq.clone();
        response
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        if let Some(to) = self.headers.to.as_mut() {
            to.tag = Some(tag.into());
        }
        self
    }

    pub fn with_contact(mut self, contact: impl Into<Uri>) -> Self {
        self.headers.contact = Some(contact.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.extensions.push(ExtensionHeader::new(name, value));
        self
    }

    pub fn is_provisional(&self) -> bool {
        self.status < 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A provisional response sent reliably per RFC 3262
    pub fn is_reliable_provisional(&self) -> bool {
        self.status > 100
            && self.is_provisional()
            && self.headers.requires(OPTION_TAG_100REL)
            && self.headers.rseq.is_some()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.call_id.as_deref()
    }

    pub fn branch(&self) -> Option<&str> {
        self.headers.branch()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.headers.to_tag()
    }

    pub fn cseq(&self) -> Option<&CSeq> {
        self.headers.cseq.as_ref()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}\r\n", self.status, self.reason)?;
        self.headers.encode(f)?;
        write!(f, "Content-Length: {}\r\n\r\n", self.body.len())?;
        f.write_str(&String::from_utf8_lossy(&self.body))
    }
}

/// Either kind of SIP message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(r) => &mut r.headers,
            Message::Response(r) => &mut r.headers,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers().call_id.as_deref()
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }

    /// Short description used in log fields
    pub fn summary(&self) -> String {
        match self {
            Message::Request(r) => r.method.to_string(),
            Message::Response(r) => match r.cseq() {
                Some(cseq) => format!("{} ({})", r.status, cseq.method),
                None => r.status.to_string(),
            },
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => r.fmt(f),
            Message::Response(r) => r.fmt(f),
        }
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Message::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Message::Response(value)
    }
}

/// Default reason phrase for a status code
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        420 => "Bad Extension",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        482 => "Loop Detected",
        486 => "Busy Here",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        600 => "Busy Everywhere",
        603 => "Decline",
        _ => match status / 100 {
            1 => "Provisional",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            5 => "Server Error",
            _ => "Global Failure",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;

    fn invite() -> Request {
        Request::new(Method::Invite, "sip:bob@example.com")
            .with_via(Via::new(TransportKind::Udp, "10.0.0.1:5060", Some("z9hG4bK-abc".into())))
            .with_from(Party::new("sip:alice@example.com").with_tag("from-1"))
            .with_to(Party::new("sip:bob@example.com"))
            .with_call_id("call-1@10.0.0.1")
            .with_cseq(7)
    }

    #[test]
    fn test_response_copies_identity_headers() {
        let request = invite();
        let response = Response::for_request(&request, 486).with_to_tag("to-9");
        assert_eq!(response.reason, "Busy Here");
        assert_eq!(response.call_id(), Some("call-1@10.0.0.1"));
        assert_eq!(response.branch(), Some("z9hG4bK-abc"));
        assert_eq!(response.to_tag(), Some("to-9"));
        assert_eq!(response.cseq(), Some(&CSeq::new(7, Method::Invite)));
    }

    #[test]
    fn test_request_encoding() {
        let encoded = invite().with_body("v=0").to_string();
        assert!(encoded.starts_with("INVITE sip:bob@example.com SIP/2.0\r\n"));
        assert!(encoded.contains("CSeq: 7 INVITE\r\n"));
        assert!(encoded.contains("From: <sip:alice@example.com>;tag=from-1\r\n"));
        assert!(encoded.ends_with("Content-Length: 3\r\n\r\nv=0"));
    }

    #[test]
    fn test_reliable_provisional_detection() {
        let mut response = Response::for_request(&invite(), 183);
        assert!(!response.is_reliable_provisional());
        response.headers.require.push(OPTION_TAG_100REL.to_string());
        response.headers.rseq = Some(1);
        assert!(response.is_reliable_provisional());
    }

    #[test]
    fn test_reason_phrase_fallback() {
        assert_eq!(reason_phrase(299), "Success");
        assert_eq!(reason_phrase(699), "Global Failure");
    }
}
