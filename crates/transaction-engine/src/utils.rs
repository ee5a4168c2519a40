//! Identifier generation and builders for engine-generated requests.
//!
//! RFC 3261 section 17.1.1.3 fixes the shape of an ACK for a non-2xx final
//! response; section 13.2.2.4 covers the ACK for a 2xx; section 9.1 the
//! CANCEL. RFC 3262 section 7.2 adds the RAck of a PRACK.

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::{CSeq, Method, RAck, Request, Response, Uri, Via, RFC3261_BRANCH_MAGIC_COOKIE};

/// Generates a branch carrying the RFC 3261 magic cookie
pub fn generate_branch() -> String {
    format!("{}-{}", RFC3261_BRANCH_MAGIC_COOKIE, Uuid::new_v4().simple())
}

/// Generates a random alphanumeric tag of `len` characters
pub fn generate_tag(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(1))
        .map(char::from)
        .collect()
}

/// Generates a Call-ID scoped to `host`
pub fn generate_call_id(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        Uuid::new_v4().simple().to_string()
    } else {
        format!("{}@{}", Uuid::new_v4().simple(), host)
    }
}

/// Starting RSeq for reliable provisional responses (RFC 3262 section 3)
pub(crate) fn initial_rseq() -> u32 {
    rand::thread_rng().gen_range(1..=(1u32 << 31) - 1)
}

fn missing(what: &str) -> Error {
    Error::InvalidArgument(format!("missing {} in original request", what))
}

/// ACK for a non-2xx final response.
///
/// Same top Via (and so the same branch), Request-URI, From, Call-ID and CSeq
/// number as the INVITE; To comes from the response to pick up its tag.
pub fn create_ack_for_non_2xx(invite: &Request, response: &Response) -> Result<Request> {
    let via = invite.top_via().cloned().ok_or_else(|| missing("Via"))?;
    let cseq = invite.cseq().ok_or_else(|| missing("CSeq"))?;
    let mut ack = Request::new(Method::Ack, invite.uri.clone());
    ack.headers.via.push(via);
    ack.headers.from = Some(invite.headers.from.clone().ok_or_else(|| missing("From"))?);
    ack.headers.to = response.headers.to.clone().or_else(|| invite.headers.to.clone());
    ack.headers.call_id = Some(invite.call_id().ok_or_else(|| missing("Call-ID"))?.to_string());
    ack.headers.cseq = Some(CSeq::new(cseq.seq, Method::Ack));
    ack.headers.max_forwards = invite.headers.max_forwards;
    Ok(ack)
}

/// ACK for a 2xx final response.
///
/// A new transaction of its own: fresh branch, sent to the remote target from
/// the response Contact (falling back to the INVITE Request-URI).
pub fn create_ack_for_2xx(
    invite: &Request,
    response: &Response,
    via: Via,
) -> Result<Request> {
    let cseq = invite.cseq().ok_or_else(|| missing("CSeq"))?;
    let target: Uri = response
        .headers
        .contact
        .clone()
        .unwrap_or_else(|| invite.uri.clone());
    let mut ack = Request::new(Method::Ack, target);
    ack.headers.via.push(via);
    ack.headers.from = Some(invite.headers.from.clone().ok_or_else(|| missing("From"))?);
    ack.headers.to = response.headers.to.clone();
    ack.headers.call_id = Some(invite.call_id().ok_or_else(|| missing("Call-ID"))?.to_string());
    ack.headers.cseq = Some(CSeq::new(cseq.seq, Method::Ack));
    ack.headers.max_forwards = invite.headers.max_forwards;
    Ok(ack)
}

/// CANCEL for a pending request: identical top Via, Request-URI, From, To,
/// Call-ID and CSeq number.
pub fn create_cancel(request: &Request) -> Result<Request> {
    let via = request.top_via().cloned().ok_or_else(|| missing("Via"))?;
    let cseq = request.cseq().ok_or_else(|| missing("CSeq"))?;
    let mut cancel = Request::new(Method::Cancel, request.uri.clone());
    cancel.headers.via.push(via);
    cancel.headers.from = request.headers.from.clone();
    cancel.headers.to = request.headers.to.clone();
    cancel.headers.call_id = request.headers.call_id.clone();
    cancel.headers.cseq = Some(CSeq::new(cseq.seq, Method::Cancel));
    cancel.headers.max_forwards = request.headers.max_forwards;
    Ok(cancel)
}

/// PRACK for a reliable provisional response to `invite`.
///
/// The PRACK is sent without a Via; the client transaction adds its own.
pub fn create_prack(invite: &Request, response: &Response, uri: Uri, seq: u32) -> Result<Request> {
    let invite_cseq = invite.cseq().ok_or_else(|| missing("CSeq"))?;
    let rseq = response
        .headers
        .rseq
        .ok_or_else(|| Error::InvalidArgument("provisional response has no RSeq".to_string()))?;
    let mut prack = Request::new(Method::Prack, uri);
    prack.headers.from = invite.headers.from.clone();
    prack.headers.to = response.headers.to.clone();
    prack.headers.call_id = invite.headers.call_id.clone();
    prack.headers.cseq = Some(CSeq::new(seq, Method::Prack));
    prack.headers.rack = Some(RAck {
        rseq,
        cseq: invite_cseq.seq,
        method: invite_cseq.method.clone(),
    });
    Ok(prack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Party;
    use crate::transport::TransportKind;

    fn invite() -> Request {
        Request::new(Method::Invite, "sip:bob@example.com")
            .with_via(Via::new(TransportKind::Udp, "10.0.0.1:5060", Some("z9hG4bK-inv".into())))
            .with_from(Party::new("sip:alice@example.com").with_tag("f1"))
            .with_to(Party::new("sip:bob@example.com"))
            .with_call_id("c1@10.0.0.1")
            .with_cseq(3)
    }

    #[test]
    fn test_generated_identifiers() {
        let branch = generate_branch();
        assert!(branch.starts_with("z9hG4bK-"));
        assert_ne!(branch, generate_branch());
        assert_eq!(generate_tag(10).len(), 10);
        assert!(generate_call_id("10.0.0.1:5060").ends_with("@10.0.0.1"));
        assert!(initial_rseq() >= 1);
    }

    #[test]
    fn test_non_2xx_ack_reuses_branch_and_uri() {
        let invite = invite();
        let response = Response::for_request(&invite, 486).with_to_tag("t9");
        let ack = create_ack_for_non_2xx(&invite, &response).unwrap();
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.uri, invite.uri);
        assert_eq!(ack.branch(), Some("z9hG4bK-inv"));
        assert_eq!(ack.to_tag(), Some("t9"));
        assert_eq!(ack.cseq(), Some(&CSeq::new(3, Method::Ack)));
    }

    #[test]
    fn test_2xx_ack_targets_contact() {
        let invite = invite();
        let response = Response::for_request(&invite, 200)
            .with_to_tag("t9")
            .with_contact("sip:bob@10.0.0.9:5060");
        let via = Via::new(TransportKind::Udp, "10.0.0.1:5060", Some(generate_branch()));
        let ack = create_ack_for_2xx(&invite, &response, via).unwrap();
        assert_eq!(ack.uri.as_str(), "sip:bob@10.0.0.9:5060");
        assert_ne!(ack.branch(), Some("z9hG4bK-inv"));
    }

    #[test]
    fn test_cancel_and_prack() {
        let invite = invite();
        let cancel = create_cancel(&invite).unwrap();
        assert_eq!(cancel.branch(), invite.branch());
        assert_eq!(cancel.cseq(), Some(&CSeq::new(3, Method::Cancel)));

        let mut response = Response::for_request(&invite, 183).with_to_tag("t1");
        response.headers.rseq = Some(77);
        let prack = create_prack(&invite, &response, invite.uri.clone(), 4).unwrap();
        assert!(prack.headers.via.is_empty());
        let rack = prack.headers.rack.unwrap();
        assert_eq!((rack.rseq, rack.cseq, rack.method), (77, 3, Method::Invite));
    }

    #[test]
    fn test_missing_headers_are_invalid() {
        let mut request = invite();
        request.headers.via.clear();
        assert!(matches!(create_cancel(&request), Err(Error::InvalidArgument(_))));
    }
}
