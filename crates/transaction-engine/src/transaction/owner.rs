//! Owner side of a transaction.
//!
//! Every transaction reports to exactly one [`TransactionOwner`]. Application
//! code, a dialog layer and the engine itself ([`NoOwner`]) all implement the
//! same trait; what differs is which methods they override. Every method has
//! a default, and the default [`TransactionOwner::state_changed`] applies
//! [`default_state_behavior`], so an owner that only cares about, say,
//! received messages still gets requests answered and INVITE responses
//! acknowledged.
//!
//! Owner methods are always called with the transaction guard released, so
//! they may call back into the transaction, including terminating it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::{AuthAction, Credentials};
use crate::error::{Error, Result};
use crate::message::{Message, Request, Response, Uri};
use crate::transaction::{StateChangeReason, Transaction, TransactionId, TransactionState};
use crate::transport::ConnectionInfo;

/// Which kind of party owns a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    Application,
    /// A dialog layer built on top of the engine
    Dialog,
    /// Nobody; the engine's default behavior applies
    None,
}

/// Parameters of an internally generated PRACK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrackParameters {
    pub cseq: u32,
    pub request_uri: Uri,
}

/// Event handlers of a transaction owner
pub trait TransactionOwner: Send + Sync {
    fn kind(&self) -> OwnerKind {
        OwnerKind::Application
    }

    /// The transaction entered `state`
    fn state_changed(
        &self,
        transaction: &Arc<Transaction>,
        state: TransactionState,
        reason: StateChangeReason,
    ) {
        default_state_behavior(transaction, state, reason);
    }

    /// A message is about to be sent. The owner may modify it; an error aborts
    /// the send.
    fn message_to_send(&self, _transaction: &Arc<Transaction>, _message: &mut Message) -> Result<()> {
        Ok(())
    }

    /// A message was received for this transaction. An error stops its
    /// processing.
    fn message_received(&self, _transaction: &Arc<Transaction>, _message: &Message) -> Result<()> {
        Ok(())
    }

    /// CSeq and Request-URI for an automatic PRACK. `None` lets the engine
    /// pick the next CSeq and the remote target.
    fn supply_prack_parameters(
        &self,
        _transaction: &Arc<Transaction>,
        _response: &Response,
    ) -> Option<PrackParameters> {
        None
    }

    /// A CANCEL arrived for this server transaction
    fn cancelled(&self, _transaction: &Arc<Transaction>) {}

    /// The authentication procedure found a credential. The owner continues
    /// with [`Transaction::auth_proceed`].
    fn credentials_found(
        &self,
        transaction: &Arc<Transaction>,
        _credentials: &Credentials,
        _supported: bool,
    ) {
        if let Err(e) = transaction.auth_proceed(AuthAction::Skip) {
            debug!(id = %transaction.id(), "skipping credentials failed: {}", e);
        }
    }

    /// The authentication procedure finished
    fn auth_completed(&self, _transaction: &Arc<Transaction>, _success: bool) {}

    /// The destination of an outbound request is known. The owner may adjust
    /// the request, e.g. the sent-by of the top Via.
    fn final_destination_resolved(&self, _transaction: &Arc<Transaction>, _request: &mut Request) {}

    /// The transaction now uses `connection`
    fn new_connection_in_use(
        &self,
        _transaction: &Arc<Transaction>,
        _connection: &ConnectionInfo,
        _is_new: bool,
    ) {
    }
}

/// The owner of transactions nobody claimed
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOwner;

impl TransactionOwner for NoOwner {
    fn kind(&self) -> OwnerKind {
        OwnerKind::None
    }
}

/// Behavior applied when an owner does not handle a state change itself.
///
/// - a newly received request is answered with its default response code
///   (see [`Transaction::default_response_code`])
/// - a final response to a client INVITE is acknowledged
/// - a send failure terminates the transaction, acknowledging a 503 first
/// - an expired proceeding timeout cancels the INVITE
///
/// Failures terminate the transaction.
pub fn default_state_behavior(
    transaction: &Arc<Transaction>,
    state: TransactionState,
    _reason: StateChangeReason,
) {
    let result = match state {
        TransactionState::GenRequestRcvd
        | TransactionState::InviteRequestRcvd
        | TransactionState::CancelRequestRcvd => {
            transaction.respond(transaction.default_response_code())
        }
        TransactionState::InviteFinalResponseRcvd => transaction.ack(),
        TransactionState::MsgSendFailure => {
            if transaction.awaits_503_ack() {
                if let Err(e) = transaction.ack() {
                    debug!(id = %transaction.id(), "ACK for 503 failed: {}", e);
                }
            }
            transaction.terminate()
        }
        TransactionState::InviteProceedingTimeout => transaction.cancel().map(|_| ()),
        _ => Ok(()),
    };

    match result {
        Ok(()) => {}
        Err(e) if e.is_terminal() => {}
        Err(e) => {
            warn!(id = %transaction.id(), %state, "default behavior failed: {}", e);
            let _ = transaction.terminate_with_reason(StateChangeReason::Error);
        }
    }
}

/// Callback forwarded by [`ChannelOwner`]
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    StateChanged {
        id: TransactionId,
        state: TransactionState,
        reason: StateChangeReason,
    },
    MessageReceived {
        id: TransactionId,
        message: Message,
    },
    Cancelled {
        id: TransactionId,
    },
    CredentialsFound {
        id: TransactionId,
        credentials: Credentials,
        supported: bool,
    },
    AuthCompleted {
        id: TransactionId,
        success: bool,
    },
    NewConnection {
        id: TransactionId,
        connection: ConnectionInfo,
        is_new: bool,
    },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionEvent::StateChanged { id, .. }
            | TransactionEvent::MessageReceived { id, .. }
            | TransactionEvent::Cancelled { id }
            | TransactionEvent::CredentialsFound { id, .. }
            | TransactionEvent::AuthCompleted { id, .. }
            | TransactionEvent::NewConnection { id, .. } => *id,
        }
    }
}

/// Owner that turns callbacks into [`TransactionEvent`]s on a channel.
///
/// With default handling enabled the engine also applies
/// [`default_state_behavior`] and skips credentials, so the receiver only
/// observes. Without it, the receiver is responsible for driving each
/// transaction (answering requests, acknowledging INVITE responses,
/// continuing authentication).
///
/// ```
/// use rvoip_transaction_engine::transaction::ChannelOwner;
///
/// let (owner, mut events) = ChannelOwner::new();
/// assert!(owner.handles_defaults());
/// assert!(events.try_recv().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelOwner {
    events: mpsc::UnboundedSender<TransactionEvent>,
    apply_defaults: bool,
}

impl ChannelOwner {
    /// Channel owner that keeps default handling
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransactionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                apply_defaults: true,
            },
            rx,
        )
    }

    /// Channel owner that leaves every decision to the receiver
    pub fn manual() -> (Self, mpsc::UnboundedReceiver<TransactionEvent>) {
        let (mut owner, rx) = Self::new();
        owner.apply_defaults = false;
        (owner, rx)
    }

    pub fn handles_defaults(&self) -> bool {
        self.apply_defaults
    }

    fn forward(&self, event: TransactionEvent) {
        if self.events.send(event).is_err() {
            debug!("transaction event receiver dropped");
        }
    }
}

impl TransactionOwner for ChannelOwner {
    fn state_changed(
        &self,
        transaction: &Arc<Transaction>,
        state: TransactionState,
        reason: StateChangeReason,
    ) {
        self.forward(TransactionEvent::StateChanged {
            id: transaction.id(),
            state,
            reason,
        });
        if self.apply_defaults {
            default_state_behavior(transaction, state, reason);
        }
    }

    fn message_received(&self, transaction: &Arc<Transaction>, message: &Message) -> Result<()> {
        self.forward(TransactionEvent::MessageReceived {
            id: transaction.id(),
            message: message.clone(),
        });
        Ok(())
    }

    fn cancelled(&self, transaction: &Arc<Transaction>) {
        self.forward(TransactionEvent::Cancelled { id: transaction.id() });
    }

    fn credentials_found(
        &self,
        transaction: &Arc<Transaction>,
        credentials: &Credentials,
        supported: bool,
    ) {
        self.forward(TransactionEvent::CredentialsFound {
            id: transaction.id(),
            credentials: credentials.clone(),
            supported,
        });
        if self.apply_defaults {
            if let Err(e) = transaction.auth_proceed(AuthAction::Skip) {
                debug!(id = %transaction.id(), "skipping credentials failed: {}", e);
            }
        }
    }

    fn auth_completed(&self, transaction: &Arc<Transaction>, success: bool) {
        self.forward(TransactionEvent::AuthCompleted {
            id: transaction.id(),
            success,
        });
    }

    fn new_connection_in_use(
        &self,
        transaction: &Arc<Transaction>,
        connection: &ConnectionInfo,
        is_new: bool,
    ) {
        self.forward(TransactionEvent::NewConnection {
            id: transaction.id(),
            connection: *connection,
            is_new,
        });
    }
}

/// Converts an owner refusal into the error reported to the caller
pub(crate) fn aborted(reason: Error) -> Error {
    match reason {
        Error::Aborted(_) => reason,
        other => Error::Aborted(other.to_string()),
    }
}
