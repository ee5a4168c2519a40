use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::message::{params_match, Method, Request};

/// Which side of the exchange a transaction plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We sent the request
    Client,
    /// We received the request
    Server,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Client => f.write_str("client"),
            Direction::Server => f.write_str("server"),
        }
    }
}

/// Identity of a SIP transaction.
///
/// Two keys are equal when the Call-ID is byte-equal, the tags and branch are
/// equal ignoring ASCII case, and method and direction are the same. An absent
/// tag or branch only equals another absent one.
///
/// The branch is `None` until the first request of a client transaction is
/// sent; see [`TransactionKey::has_initialized_branch`].
#[derive(Debug, Clone)]
pub struct TransactionKey {
    pub call_id: String,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    pub branch: Option<String>,
    pub method: Method,
    pub direction: Direction,
}

impl TransactionKey {
    pub fn new(call_id: impl Into<String>, method: Method, direction: Direction) -> Self {
        Self {
            call_id: call_id.into(),
            from_tag: None,
            to_tag: None,
            branch: None,
            method,
            direction,
        }
    }

    /// Builds the key of the transaction `request` belongs to.
    ///
    /// Server keys use the transaction method, so an ACK yields the key of
    /// the INVITE it acknowledges.
    pub fn from_request(request: &Request, direction: Direction) -> Result<Self> {
        let call_id = request
            .call_id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::InvalidArgument("request has no Call-ID".to_string()))?;
        let method = match direction {
            Direction::Server => request.method.transaction_method(),
            Direction::Client => request.method.clone(),
        };
        Ok(Self {
            call_id: call_id.to_string(),
            from_tag: request.from_tag().map(str::to_string),
            to_tag: request.to_tag().map(str::to_string),
            branch: request.branch().map(str::to_string),
            method,
            direction,
        })
    }

    pub fn has_initialized_branch(&self) -> bool {
        self.branch.is_some()
    }

    pub fn with_method(&self, method: Method) -> Self {
        let mut key = self.clone();
        key.method = method;
        key
    }

    pub fn is_server(&self) -> bool {
        self.direction == Direction::Server
    }
}

impl PartialEq for TransactionKey {
    fn eq(&self, other: &Self) -> bool {
        self.call_id == other.call_id
            && params_match(self.from_tag.as_deref(), other.from_tag.as_deref())
            && params_match(self.to_tag.as_deref(), other.to_tag.as_deref())
            && params_match(self.branch.as_deref(), other.branch.as_deref())
            && self.method == other.method
            && self.direction == other.direction
    }
}

impl Eq for TransactionKey {}

impl Hash for TransactionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fn lower(value: &Option<String>) -> Option<String> {
            value.as_ref().map(|v| v.to_ascii_lowercase())
        }

        self.call_id.hash(state);
        lower(&self.from_tag).hash(state);
        lower(&self.to_tag).hash(state);
        lower(&self.branch).hash(state);
        self.method.hash(state);
        self.direction.hash(state);
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.branch.as_deref().unwrap_or("-"),
            self.method,
            self.call_id,
            self.direction
        )
    }
}
