//! Manager-level decisions delegated to the transaction user.
//!
//! The manager asks its [`ManagerPolicy`] whether to accept new inbound
//! requests, who owns the resulting server transactions, and what to do with
//! messages no transaction claims. All methods run without any transaction
//! guard held.

use std::sync::Arc;

use tracing::debug;

use crate::message::{Message, Request, Response};
use crate::transaction::{Transaction, TransactionOwner};
use crate::transport::InboundContext;

/// What the manager does with a freshly created server transaction
#[derive(Clone)]
pub enum TransactionDisposition {
    /// Hand the transaction to this owner
    Accept(Arc<dyn TransactionOwner>),
    /// Leave it to default handling
    Default,
    /// Answer with this final response code through default handling
    Reject(u16),
}

impl std::fmt::Debug for TransactionDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept(owner) => write!(f, "Accept({:?})", owner.kind()),
            Self::Default => write!(f, "Default"),
            Self::Reject(code) => write!(f, "Reject({})", code),
        }
    }
}

pub trait ManagerPolicy: Send + Sync {
    /// Whether a request that matches no transaction starts a new one.
    /// Refused requests are reported through `out_of_context_message`.
    fn new_request_received(&self, _request: &Request, _context: &InboundContext) -> bool {
        true
    }

    /// Chooses the owner of a new server transaction before it sees its request
    fn transaction_created(
        &self,
        _transaction: &Arc<Transaction>,
        _request: &Request,
    ) -> TransactionDisposition {
        TransactionDisposition::Default
    }

    /// A message matched no transaction: stray responses, ACKs for 2xx,
    /// retransmissions after termination
    fn out_of_context_message(&self, message: &Message, context: &InboundContext) {
        debug!(from = %context.remote, "dropping out-of-context {}", message.summary());
    }

    /// A 2xx from another fork reached an INVITE that already sent its ACK
    fn forked_invite_response(&self, transaction: &Arc<Transaction>, response: &Response) {
        debug!(
            id = %transaction.id(),
            to_tag = ?response.to_tag(),
            "ignoring 2xx from another fork"
        );
    }
}

/// Accepts every request and leaves everything to default handling
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl ManagerPolicy for DefaultPolicy {}
