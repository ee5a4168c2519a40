//! PRACK handling (RFC 3262).
//!
//! A reliable provisional response is acknowledged with a PRACK, a
//! non-INVITE request running in its own transaction. The client side sends
//! it automatically unless `manual_prack` is set; the server side matches it
//! to the INVITE through its RAck header.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Request, Response};
use crate::timer::SlotId;
use crate::transaction::{Direction, StateChangeReason, Transaction, TransactionKey, TransactionState};
use crate::utils::create_prack;

impl Transaction {
    /// Sends a PRACK for a reliable provisional `response` received by this
    /// client INVITE and returns the PRACK transaction.
    pub fn prack(&self, response: &Response) -> Result<Arc<Transaction>> {
        let _guard = self.lock.lock();
        self.send_prack(response)
    }

    pub(crate) fn send_prack(&self, response: &Response) -> Result<Arc<Transaction>> {
        let state = self.check_live()?;
        let proceeding = matches!(
            state,
            TransactionState::InviteProceeding
                | TransactionState::InviteProceedingTimeout
                | TransactionState::InviteCancelling
        );
        if self.direction() != Direction::Client || !self.method().is_invite() || !proceeding {
            return Err(Error::illegal_state(state, "prack"));
        }
        if !response.is_reliable_provisional() {
            return Err(Error::InvalidArgument(
                "response is not a reliable provisional response".to_string(),
            ));
        }

        let parameters = self.notify_supply_prack_parameters(response)?;
        let (invite, destination, owner, last_cseq) = {
            let inner = self.inner.lock();
            (
                inner.request.clone(),
                inner.destination,
                inner.owner.clone(),
                inner.reliable.last_prack_cseq.or(inner.cseq),
            )
        };
        let invite = invite.ok_or_else(|| Error::illegal_state(state, "prack"))?;

        let (seq, uri) = match parameters {
            Some(parameters) => (parameters.cseq, parameters.request_uri),
            None => (
                last_cseq.unwrap_or_default().wrapping_add(1),
                response
                    .headers
                    .contact
                    .clone()
                    .unwrap_or_else(|| invite.uri.clone()),
            ),
        };
        let prack = create_prack(&invite, response, uri, seq)?;
        self.inner.lock().reliable.last_prack_cseq = Some(seq);

        let core = self.core()?;
        let key = TransactionKey::from_request(&prack, Direction::Client)?;
        let prack_transaction = core.new_transaction(key, owner)?;
        if let Some(destination) = destination {
            prack_transaction.inner.lock().candidates = vec![destination];
        }
        debug!(id = %self.id(), prack = %prack_transaction.id(), rseq = ?response.headers.rseq, "sending PRACK");

        self.lock
            .upcall(|| prack_transaction.send_request_message(prack))?;
        self.ensure_alive()?;
        Ok(prack_transaction)
    }

    /// A PRACK matched the reliable provisional response this server INVITE
    /// is retransmitting
    pub(crate) fn on_prack_received(&self, prack: &Request) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        if state != TransactionState::InviteRelProvResponseSent {
            return Err(Error::illegal_state(state, "prack"));
        }
        debug!(id = %self.id(), rack = ?prack.headers.rack, "PRACK received");

        self.cancel_timer(SlotId::Retransmit);
        self.cancel_timer(SlotId::Main);
        self.inner.lock().reliable.pending = None;
        if let Ok(core) = self.core() {
            core.table.update(self.id(), |info| info.awaiting_prack = None);
        }
        self.change_state(TransactionState::InvitePrackCompleted, StateChangeReason::PrackReceived)
    }
}
