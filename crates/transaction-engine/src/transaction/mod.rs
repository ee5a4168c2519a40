//! # SIP Transactions
//!
//! A [`Transaction`] is one request and the responses it produces, as defined
//! in RFC 3261 section 17. The engine knows four kinds, distinguished by
//! [`Direction`] and by whether the method is INVITE:
//!
//! | Kind | Created by | First state |
//! |------|-----------|-------------|
//! | client INVITE | [`Transaction::send_request`] | `InviteCalling` |
//! | client non-INVITE | [`Transaction::send_request`] | `GenRequestSent` / `CancelSent` |
//! | server INVITE | inbound INVITE | `InviteRequestRcvd` |
//! | server non-INVITE | inbound request | `GenRequestRcvd` / `CancelRequestRcvd` |
//!
//! ## Locking
//!
//! Each transaction carries a reentrant [`TransactionLock`] serializing every
//! transition. Public entry points take the guard; owner callbacks and
//! transport I/O run with it released (see the `callbacks` module). The small
//! `inner` mutex only protects field access and is never held across a call
//! out of the transaction.
//!
//! ## Termination
//!
//! Reaching [`TransactionState::Terminated`] cancels all timers, removes the
//! transaction from its manager and detaches the owner once the owner has
//! been told. Afterwards every operation fails with [`Error::Terminated`].

mod callbacks;
mod key;
mod lock;
mod owner;
mod state;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error};

pub use key::{Direction, TransactionKey};
pub use lock::{TransactionGuard, TransactionLock, UpcallToken};
pub use owner::{
    default_state_behavior, ChannelOwner, NoOwner, OwnerKind, PrackParameters, TransactionEvent,
    TransactionOwner,
};
pub use state::{StateChangeReason, TransactionState};

use crate::auth::Credentials;
use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::manager::ManagerCore;
use crate::message::{Message, Method, Party, Request, Response};
use crate::timer::TransactionTimers;
use crate::transport::{ConnectionInfo, InboundContext, ResolvedAddress, TransportError};

/// Process-unique handle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Reliable provisional response bookkeeping (RFC 3262)
#[derive(Debug, Default)]
pub(crate) struct ReliableState {
    /// Server: RSeq for the next reliable provisional response
    pub next_rseq: Option<u32>,
    /// Server: reliable provisional response awaiting PRACK
    pub pending: Option<Response>,
    /// Client: highest RSeq seen
    pub last_received_rseq: Option<u32>,
    /// Client: CSeq of the last PRACK sent
    pub last_prack_cseq: Option<u32>,
}

/// Position in the server authentication procedure
#[derive(Debug)]
pub(crate) struct AuthProgress {
    pub headers: Vec<Credentials>,
    pub cursor: usize,
}

pub(crate) struct TransactionInner {
    pub key: TransactionKey,
    pub state: TransactionState,
    pub previous_state: TransactionState,
    pub response_code: u16,
    pub owner: Arc<dyn TransactionOwner>,

    // Client identity set before the request goes out
    pub cseq: Option<u32>,
    pub from: Option<Party>,
    pub to: Option<Party>,

    /// Request as sent (client) or received (server)
    pub request: Option<Request>,
    /// Client request before the engine added its Via
    pub prepared: Option<Request>,
    pub last_response: Option<Response>,
    pub ack: Option<Request>,

    pub candidates: Vec<ResolvedAddress>,
    pub candidate_index: usize,
    pub destination: Option<ResolvedAddress>,
    pub connection: Option<ConnectionInfo>,
    pub inbound: Option<InboundContext>,

    /// Server: the CANCEL for this request, or the request this CANCEL targets.
    /// Client: the CANCEL we sent, or the request we cancel.
    pub cancel_pair: Option<TransactionId>,
    /// PRACK server: the INVITE it acknowledges
    pub prack_target: Option<TransactionId>,

    /// Server: To tag added to our responses
    pub local_tag: Option<String>,
    /// Server: response code applied by default handling
    pub preset_response: Option<u16>,

    pub reliable: ReliableState,
    pub auth: Option<AuthProgress>,
    pub timers: TransactionTimers,

    /// Terminate once the pending 503 is acknowledged
    pub terminate_after_ack: bool,
    pub ack_sent_for_503: bool,
    pub cloned_from: Option<TransactionId>,
    /// An outbound message is between validation and the wire
    pub sending: bool,
}

impl TransactionInner {
    fn new(key: TransactionKey, owner: Arc<dyn TransactionOwner>) -> Self {
        Self {
            key,
            state: TransactionState::Idle,
            previous_state: TransactionState::Undefined,
            response_code: 0,
            owner,
            cseq: None,
            from: None,
            to: None,
            request: None,
            prepared: None,
            last_response: None,
            ack: None,
            candidates: Vec::new(),
            candidate_index: 0,
            destination: None,
            connection: None,
            inbound: None,
            cancel_pair: None,
            prack_target: None,
            local_tag: None,
            preset_response: None,
            reliable: ReliableState::default(),
            auth: None,
            timers: TransactionTimers::default(),
            terminate_after_ack: false,
            ack_sent_for_503: false,
            cloned_from: None,
            sending: false,
        }
    }
}

/// A SIP transaction
pub struct Transaction {
    id: TransactionId,
    direction: Direction,
    pub(crate) lock: TransactionLock,
    pub(crate) inner: Mutex<TransactionInner>,
    pub(crate) config: Arc<TransactionConfig>,
    pub(crate) core: Weak<ManagerCore>,
    pub(crate) this: Weak<Transaction>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("key", &inner.key)
            .field("state", &inner.state)
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        key: TransactionKey,
        owner: Arc<dyn TransactionOwner>,
        core: &Arc<ManagerCore>,
    ) -> Arc<Self> {
        let direction = key.direction;
        Arc::new_cyclic(|this| Self {
            id,
            direction,
            lock: TransactionLock::new(),
            inner: Mutex::new(TransactionInner::new(key, owner)),
            config: core.config.clone(),
            core: Arc::downgrade(core),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn key(&self) -> TransactionKey {
        self.inner.lock().key.clone()
    }

    pub fn method(&self) -> Method {
        self.inner.lock().key.method.clone()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn previous_state(&self) -> TransactionState {
        self.inner.lock().previous_state
    }

    /// Last response code sent or received, 0 before any
    pub fn response_code(&self) -> u16 {
        self.inner.lock().response_code
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub fn owner_kind(&self) -> OwnerKind {
        self.inner.lock().owner.kind()
    }

    /// Request as sent (client) or as received (server)
    pub fn request(&self) -> Option<Request> {
        self.inner.lock().request.clone()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.inner.lock().last_response.clone()
    }

    /// ACK sent by this client INVITE transaction
    pub fn ack_request(&self) -> Option<Request> {
        self.inner.lock().ack.clone()
    }

    pub fn destination(&self) -> Option<ResolvedAddress> {
        self.inner.lock().destination
    }

    /// Resolved addresses not tried yet
    pub fn remaining_candidates(&self) -> Vec<ResolvedAddress> {
        let inner = self.inner.lock();
        inner
            .candidates
            .get(inner.candidate_index + 1..)
            .map(<[ResolvedAddress]>::to_vec)
            .unwrap_or_default()
    }

    pub fn connection(&self) -> Option<ConnectionInfo> {
        self.inner.lock().connection
    }

    pub fn inbound_context(&self) -> Option<InboundContext> {
        self.inner.lock().inbound
    }

    /// To tag this server transaction puts in its responses
    pub fn local_tag(&self) -> Option<String> {
        self.inner.lock().local_tag.clone()
    }

    /// Transaction this one was cloned from by [`Transaction::dns_continue`]
    pub fn cloned_from(&self) -> Option<TransactionId> {
        self.inner.lock().cloned_from
    }

    /// The CANCEL paired with this transaction, or the transaction this CANCEL targets
    pub fn paired_transaction(&self) -> Option<Arc<Transaction>> {
        let pair = self.inner.lock().cancel_pair?;
        self.core.upgrade()?.table.get(pair)
    }

    /// Response code default handling answers a received request with.
    ///
    /// A code preset at creation wins. Otherwise a CANCEL gets 200 when it
    /// found its target and 481 when not; a request carrying both tags (an
    /// in-dialog request nobody handles) gets 481, an INVITE 486 and anything
    /// else 501.
    pub fn default_response_code(&self) -> u16 {
        let inner = self.inner.lock();
        if let Some(code) = inner.preset_response {
            return code;
        }
        let Some(request) = inner.request.as_ref() else {
            return 500;
        };
        match request.method {
            Method::Cancel if inner.cancel_pair.is_some() => 200,
            Method::Cancel => 481,
            _ if request.from_tag().is_some() && request.to_tag().is_some() => 481,
            Method::Invite => 486,
            _ => 501,
        }
    }

    /// Whether this client INVITE failed with a 503 that still needs its ACK
    pub fn awaits_503_ack(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == TransactionState::MsgSendFailure
            && inner.key.method.is_invite()
            && inner.response_code == 503
            && !inner.ack_sent_for_503
    }

    /// Replaces the owner
    pub fn set_owner(&self, owner: Arc<dyn TransactionOwner>) -> Result<()> {
        let _guard = self.lock.lock();
        let mut inner = self.inner.lock();
        if inner.state.is_terminated() {
            return Err(Error::Terminated);
        }
        inner.owner = owner;
        Ok(())
    }

    /// Hands the transaction to default handling. Detaching twice is a no-op.
    pub fn detach_owner(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let mut inner = self.inner.lock();
        if inner.state.is_terminated() {
            return Err(Error::Terminated);
        }
        if inner.owner.kind() != OwnerKind::None {
            debug!(id = %self.id, "owner detached");
            inner.owner = Arc::new(NoOwner);
        }
        Ok(())
    }

    /// Terminates the transaction on behalf of its owner
    pub fn terminate(&self) -> Result<()> {
        self.terminate_with_reason(StateChangeReason::UserCommand)
    }

    pub fn terminate_with_reason(&self, reason: StateChangeReason) -> Result<()> {
        let _guard = self.lock.lock();
        self.change_state(TransactionState::Terminated, reason)
    }

    /// Fails with `Terminated` once the transaction is gone
    pub(crate) fn check_live(&self) -> Result<TransactionState> {
        let state = self.inner.lock().state;
        if state.is_terminated() {
            return Err(Error::Terminated);
        }
        Ok(state)
    }

    pub(crate) fn core(&self) -> Result<Arc<ManagerCore>> {
        self.core
            .upgrade()
            .ok_or(Error::Transport(TransportError::Closed))
    }

    pub(crate) fn arc(&self) -> Result<Arc<Transaction>> {
        self.this.upgrade().ok_or(Error::Destructed)
    }

    /// Moves to `state` and reports it to the owner. The caller holds the guard.
    pub(crate) fn change_state(&self, state: TransactionState, reason: StateChangeReason) -> Result<()> {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminated() {
                return Err(Error::Terminated);
            }
            let previous = inner.state;
            inner.previous_state = previous;
            inner.state = state;
            previous
        };
        debug!(id = %self.id, from = %previous, to = %state, %reason, "state changed");

        if state.is_terminated() {
            self.release_resources();
            let result = self.notify_state_changed(state, reason);
            self.inner.lock().owner = Arc::new(NoOwner);
            return result;
        }
        self.notify_state_changed(state, reason)
    }

    pub(crate) fn terminate_with(&self, reason: StateChangeReason) -> Result<()> {
        self.change_state(TransactionState::Terminated, reason)
    }

    fn release_resources(&self) {
        {
            let mut inner = self.inner.lock();
            inner.timers.cancel_all();
            inner.auth = None;
            inner.cancel_pair = None;
            inner.prack_target = None;
        }
        if let Some(core) = self.core.upgrade() {
            core.table.remove(self.id);
        }
    }

    /// Sends `message` with the guard released and tracks the connection used
    pub(crate) fn transmit(&self, message: &Message, destination: &ResolvedAddress) -> Result<()> {
        let core = self.core()?;
        let receipt = self
            .lock
            .upcall(|| core.transport.send(message, destination))
            .map_err(|e| {
                error!(id = %self.id, %destination, "failed to send {}: {}", message.summary(), e);
                Error::Transport(e)
            })?;
        self.ensure_alive()?;

        if let Some(connection) = receipt.connection {
            let changed = {
                let mut inner = self.inner.lock();
                let changed = inner.connection != Some(connection);
                inner.connection = Some(connection);
                changed
            };
            if changed || receipt.new_connection {
                self.notify_new_connection(connection, receipt.new_connection)?;
            }
        }
        Ok(())
    }

    /// Claims the send path until the returned marker is dropped. A send
    /// started from an owner callback meanwhile fails with `IllegalState`.
    pub(crate) fn begin_send(&self, operation: &'static str) -> Result<SendInProgress<'_>> {
        let mut inner = self.inner.lock();
        if inner.sending {
            debug!(id = %self.id, operation, "send already in progress");
            return Err(Error::illegal_state(inner.state, operation));
        }
        inner.sending = true;
        Ok(SendInProgress { transaction: self })
    }

    /// Terminates after the transport failed to deliver a message
    pub(crate) fn terminate_on_network_error(&self) {
        if let Err(e) = self.terminate_with(StateChangeReason::NetworkError) {
            debug!(id = %self.id, "termination after send failure ended with {}", e);
        }
    }

    /// Reaction to a transport failure outside an API call
    pub(crate) fn handle_send_failure(&self) {
        let result = match self.direction {
            Direction::Client => self.change_state(
                TransactionState::MsgSendFailure,
                StateChangeReason::NetworkError,
            ),
            Direction::Server => self.terminate_with(StateChangeReason::NetworkError),
        };
        if let Err(e) = result {
            debug!(id = %self.id, "send failure handling ended with {}", e);
        }
    }

    /// Whether the current hop needs retransmissions and lingering
    pub(crate) fn is_unreliable(&self) -> bool {
        let inner = self.inner.lock();
        let transport = inner
            .destination
            .map(|d| d.transport)
            .or(inner.inbound.map(|c| c.transport));
        transport.is_some_and(|t| !t.is_reliable())
    }
}

/// Unwraps the request an owner handed back from `message_to_send`
pub(crate) fn into_request(message: Message) -> Result<Request> {
    match message {
        Message::Request(request) => Ok(request),
        Message::Response(_) => Err(Error::InvalidArgument(
            "owner replaced an outbound request with a response".to_string(),
        )),
    }
}

pub(crate) fn into_response(message: Message) -> Result<Response> {
    match message {
        Message::Response(response) => Ok(response),
        Message::Request(_) => Err(Error::InvalidArgument(
            "owner replaced an outbound response with a request".to_string(),
        )),
    }
}

/// Send in flight on a transaction, cleared on drop
pub(crate) struct SendInProgress<'a> {
    transaction: &'a Transaction,
}

impl Drop for SendInProgress<'_> {
    fn drop(&mut self) {
        self.transaction.inner.lock().sending = false;
    }
}
