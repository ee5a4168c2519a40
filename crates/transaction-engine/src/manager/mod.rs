//! # Transaction Manager
//!
//! The [`TransactionManager`] is the entry point of the transaction layer
//! (RFC 3261 section 17). It owns the table of live transactions, creates
//! client transactions on request, and routes every message the transport
//! delivers to the transaction it belongs to, creating server transactions
//! for new requests.
//!
//! ```text
//! +---------------------------+
//! |  Transaction User         |  owners, ManagerPolicy
//! +---------------------------+
//!              ^ |
//!   callbacks  | |  send_request, respond, cancel, ack, ...
//!              | v
//! +---------------------------+
//! |  TransactionManager       |  table, matching, timers
//! +---------------------------+
//!              ^ |
//!  receive_    | |  Transport::resolve / Transport::send
//!  message     | v
//! +---------------------------+
//! |  Transport                |
//! +---------------------------+
//! ```
//!
//! ## Matching
//!
//! | Message | Matches |
//! |---------|---------|
//! | response | client transaction with the top Via branch and CSeq method |
//! | request | server transaction with the same branch and sent-by (RFC 3261) or tags and CSeq (RFC 2543) |
//! | ACK | INVITE server transaction whose non-2xx response it acknowledges |
//! | CANCEL | server transaction with the same branch, any method but CANCEL |
//! | PRACK | INVITE server transaction awaiting the RSeq in its RAck |
//!
//! Messages that match nothing and start nothing are handed to
//! [`ManagerPolicy::out_of_context_message`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_transaction_engine::prelude::*;
//!
//! # fn example(transport: Arc<dyn Transport>) -> Result<()> {
//! let manager = TransactionManagerBuilder::new(transport)
//!     .config(TransactionConfig::default())
//!     .build();
//!
//! let (owner, mut events) = ChannelOwner::new();
//! let transaction = manager.create_transaction(Arc::new(owner))?;
//! transaction.set_from(Party::new("sip:alice@example.com"))?;
//! transaction.set_to(Party::new("sip:bob@example.com"))?;
//! transaction.send_request(Method::Options, "sip:bob@example.com")?;
//! # Ok(())
//! # }
//! ```

mod handlers;
mod matching;
mod policy;
mod types;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub use policy::{DefaultPolicy, ManagerPolicy, TransactionDisposition};
pub(crate) use types::{MatchInfo, TransactionTable};

use crate::auth::Authenticator;
use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::message::{Message, Method};
use crate::transaction::{
    Direction, StateChangeReason, Transaction, TransactionId, TransactionKey, TransactionOwner,
};
use crate::transport::{InboundContext, ResolvedAddress, Transport};

/// State shared by the manager and its transactions
pub(crate) struct ManagerCore {
    pub config: Arc<TransactionConfig>,
    pub transport: Arc<dyn Transport>,
    pub policy: Arc<dyn ManagerPolicy>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub table: TransactionTable,
    /// Runtime the timers run on
    pub runtime: Option<Handle>,
    next_id: AtomicU64,
}

impl ManagerCore {
    /// Creates a transaction that is not in the table yet
    pub fn new_transaction(
        self: &Arc<Self>,
        key: TransactionKey,
        owner: Arc<dyn TransactionOwner>,
    ) -> Result<Arc<Transaction>> {
        if self.table.len() >= self.config.max_transactions {
            warn!(limit = self.config.max_transactions, "transaction limit reached");
            return Err(Error::OutOfResources(format!(
                "transaction limit of {} reached",
                self.config.max_transactions
            )));
        }
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(Transaction::new(id, key, owner, self))
    }

    /// Makes `transaction` visible to matching under its current key
    pub fn insert(&self, transaction: &Arc<Transaction>) -> Result<()> {
        let info = {
            let inner = transaction.inner.lock();
            let server = inner.key.direction == Direction::Server;
            MatchInfo {
                key: inner.key.clone(),
                sent_by: server
                    .then(|| inner.request.as_ref())
                    .flatten()
                    .and_then(|request| request.top_via())
                    .map(|via| via.sent_by.clone()),
                cseq: inner.cseq,
                local_tag: inner.local_tag.clone(),
                awaiting_prack: None,
            }
        };
        self.table
            .insert(transaction.clone(), info, self.config.max_transactions)
    }
}

/// Builder for [`TransactionManager`]
pub struct TransactionManagerBuilder {
    transport: Arc<dyn Transport>,
    config: TransactionConfig,
    policy: Arc<dyn ManagerPolicy>,
    authenticator: Option<Arc<dyn Authenticator>>,
    runtime: Option<Handle>,
}

impl TransactionManagerBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: TransactionConfig::default(),
            policy: Arc::new(DefaultPolicy),
            authenticator: None,
            runtime: None,
        }
    }

    pub fn config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn ManagerPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Enables [`Transaction::auth_begin`]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Runtime for transaction timers. Defaults to the runtime `build` is
    /// called on; without one, timers never fire.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> TransactionManager {
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            warn!("no tokio runtime available, transaction timers are disabled");
        }
        info!(
            max_transactions = self.config.max_transactions,
            proxy = self.config.is_proxy,
            "transaction manager created"
        );
        TransactionManager {
            core: Arc::new(ManagerCore {
                config: Arc::new(self.config),
                transport: self.transport,
                policy: self.policy,
                authenticator: self.authenticator,
                table: TransactionTable::default(),
                runtime,
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Creates, matches and tracks SIP transactions
pub struct TransactionManager {
    core: Arc<ManagerCore>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transactions", &self.core.table.len())
            .finish()
    }
}

impl TransactionManager {
    /// A manager with the default configuration and policy
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        TransactionManagerBuilder::new(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> TransactionManagerBuilder {
        TransactionManagerBuilder::new(transport)
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.core.config
    }

    /// Creates an idle client transaction owned by `owner`.
    ///
    /// It joins the table once its request is sent.
    pub fn create_transaction(&self, owner: Arc<dyn TransactionOwner>) -> Result<Arc<Transaction>> {
        let key = TransactionKey::new(String::new(), Method::Options, Direction::Client);
        let transaction = self.core.new_transaction(key, owner)?;
        debug!(id = %transaction.id(), "client transaction created");
        Ok(transaction)
    }

    /// Routes a message received from the transport
    pub fn receive_message(&self, message: Message, context: InboundContext) -> Result<()> {
        self.core.receive_message(message, context)
    }

    /// Sends a message outside of any transaction, e.g. the ACK for a 2xx or
    /// a stateless response
    pub fn send_out_of_context_message(
        &self,
        message: &Message,
        destination: &ResolvedAddress,
    ) -> Result<()> {
        self.core
            .transport
            .send(message, destination)
            .map(|_| ())
            .map_err(Error::from)
    }

    pub fn find_transaction(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.core.table.get(id)
    }

    pub fn find_by_key(&self, key: &TransactionKey) -> Option<Arc<Transaction>> {
        self.core.table.find(&key.call_id, |info| &info.key == key)
    }

    pub fn transaction_count(&self) -> usize {
        self.core.table.len()
    }

    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        self.core.table.all()
    }

    /// Terminates every live transaction
    pub fn shutdown(&self) {
        let transactions = self.core.table.all();
        info!(count = transactions.len(), "shutting down transaction manager");
        for transaction in transactions {
            if let Err(e) = transaction.terminate_with_reason(StateChangeReason::TransactionCommand) {
                debug!(id = %transaction.id(), "terminate on shutdown: {}", e);
            }
        }
    }
}
