//! Matching rules for inbound messages (RFC 3261 sections 17.1.3 and 17.2.3).
//!
//! These are pure functions over a message and a [`MatchInfo`]; the handlers
//! apply them to the candidates sharing the message's Call-ID.

use crate::message::{params_match, Method, Request, Response};
use crate::transaction::Direction;

use super::types::MatchInfo;

/// A response belongs to the client transaction with the same branch and
/// CSeq method
pub(crate) fn response_matches(response: &Response, info: &MatchInfo) -> bool {
    let key = &info.key;
    key.direction == Direction::Client
        && key.has_initialized_branch()
        && params_match(response.branch(), key.branch.as_deref())
        && response.cseq().is_some_and(|cseq| cseq.method == key.method)
}

/// A request (including an ACK for a non-2xx response) belongs to this
/// server transaction.
///
/// With an RFC 3261 branch the top Via branch, sent-by and tags decide;
/// otherwise the RFC 2543 rules compare tags and CSeq. The To tag of an ACK
/// carries the tag of our final response, so it is compared with that tag
/// rather than with the key.
pub(crate) fn request_matches(request: &Request, info: &MatchInfo) -> bool {
    let key = &info.key;
    if key.direction != Direction::Server || request.method.transaction_method() != key.method {
        return false;
    }

    let magic = request.top_via().is_some_and(|via| via.has_magic_cookie());
    if magic {
        let sent_by_matches = match (request.top_via(), info.sent_by.as_deref()) {
            (Some(via), Some(sent_by)) => via.sent_by.eq_ignore_ascii_case(sent_by),
            _ => true,
        };
        let to_tag_matches = request.method == Method::Ack
            || params_match(request.to_tag(), key.to_tag.as_deref());
        return params_match(request.branch(), key.branch.as_deref())
            && sent_by_matches
            && params_match(request.from_tag(), key.from_tag.as_deref())
            && to_tag_matches;
    }

    let expected_to_tag = if request.method == Method::Ack {
        info.local_tag.as_deref().or(key.to_tag.as_deref())
    } else {
        key.to_tag.as_deref()
    };
    params_match(request.from_tag(), key.from_tag.as_deref())
        && params_match(request.to_tag(), expected_to_tag)
        && request.cseq().map(|c| c.seq) == info.cseq
        && params_match(request.branch(), key.branch.as_deref())
}

/// The server transaction a CANCEL is aimed at: same branch, any method but
/// CANCEL and ACK (RFC 3261 section 9.2)
pub(crate) fn cancel_target_matches(cancel: &Request, info: &MatchInfo) -> bool {
    let key = &info.key;
    key.direction == Direction::Server
        && !matches!(key.method, Method::Cancel | Method::Ack)
        && params_match(cancel.branch(), key.branch.as_deref())
        && params_match(cancel.from_tag(), key.from_tag.as_deref())
}

/// The INVITE server transaction a PRACK acknowledges (RFC 3262 section 4)
pub(crate) fn prack_target_matches(prack: &Request, info: &MatchInfo) -> bool {
    let key = &info.key;
    let Some(rack) = prack.headers.rack.as_ref() else {
        return false;
    };
    key.direction == Direction::Server
        && key.method == Method::Invite
        && params_match(prack.from_tag(), key.from_tag.as_deref())
        && rack.method == Method::Invite
        && Some(rack.cseq) == info.cseq
        && info.awaiting_prack == Some(rack.rseq)
}

/// A request that reached us twice over different paths
/// (RFC 3261 section 8.2.2.2): no To tag, same From tag, Call-ID and CSeq as
/// a live server transaction, but a different branch.
pub(crate) fn is_merged_request(request: &Request, info: &MatchInfo) -> bool {
    let key = &info.key;
    request.to_tag().is_none()
        && key.direction == Direction::Server
        && key.method == request.method
        && params_match(request.from_tag(), key.from_tag.as_deref())
        && request.cseq().map(|c| c.seq) == info.cseq
        && !params_match(request.branch(), key.branch.as_deref())
}
