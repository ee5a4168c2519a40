//! CANCEL handling (RFC 3261 section 9).
//!
//! Client side, [`Transaction::cancel`] builds a CANCEL that shares the top
//! Via of the request it cancels and runs it as a non-INVITE client
//! transaction of its own. Server side, the manager pairs an inbound CANCEL
//! with its target and calls [`Transaction::on_cancelled`] on the target.
//!
//! The two transactions reference each other by id only, so either can
//! terminate first.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::{Message, Method, Request, Response};
use crate::timer::{SlotId, TimerType};
use crate::transaction::{
    into_request, Direction, StateChangeReason, Transaction, TransactionKey, TransactionState,
};
use crate::transport::ResolvedAddress;
use crate::utils::create_cancel;

impl Transaction {
    /// Cancels this pending client request and returns the CANCEL transaction.
    ///
    /// Allowed once a provisional response arrived for an INVITE
    /// (RFC 3261 section 9.1), and while a non-INVITE is pending.
    pub fn cancel(&self) -> Result<Arc<Transaction>> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let cancellable = matches!(
            state,
            TransactionState::InviteProceeding
                | TransactionState::InviteProceedingTimeout
                | TransactionState::GenRequestSent
                | TransactionState::GenProceeding
        );
        if self.direction() != Direction::Client || !cancellable || self.method() == Method::Cancel {
            return Err(Error::illegal_state(state, "cancel"));
        }

        let (request, destination, owner) = {
            let inner = self.inner.lock();
            (inner.request.clone(), inner.destination, inner.owner.clone())
        };
        let (Some(request), Some(destination)) = (request, destination) else {
            return Err(Error::illegal_state(state, "cancel"));
        };
        let cancel_request = create_cancel(&request)?;
        let core = self.core()?;
        let key = TransactionKey::from_request(&cancel_request, Direction::Client)?;
        let cancel = core.new_transaction(key, owner)?;

        self.inner.lock().cancel_pair = Some(cancel.id());
        cancel.inner.lock().cancel_pair = Some(self.id());
        debug!(id = %self.id(), cancel = %cancel.id(), "cancelling");

        self.lock
            .upcall(|| cancel.send_cancel(cancel_request, destination))?;
        self.ensure_alive()?;

        let state = self.state();
        let (next, timeout) = match state {
            TransactionState::InviteProceeding | TransactionState::InviteProceedingTimeout => (
                TransactionState::InviteCancelling,
                self.timer_settings().cancel_invite_timeout,
            ),
            TransactionState::GenRequestSent | TransactionState::GenProceeding => (
                TransactionState::GenCancelling,
                self.timer_settings().cancel_general_timeout,
            ),
            _ => {
                // A final response overtook the CANCEL
                trace!(id = %self.id(), %state, "request completed while cancelling");
                return Ok(cancel);
            }
        };
        self.start_timer(SlotId::Main, TimerType::CancelTimeout, timeout);
        self.change_state(next, StateChangeReason::UserCommand)?;
        Ok(cancel)
    }

    /// Sends a CANCEL built by [`Transaction::cancel`] to the hop of its target
    fn send_cancel(&self, request: Request, destination: ResolvedAddress) -> Result<()> {
        let _guard = self.lock.lock();
        self.check_live()?;
        let core = self.core()?;
        let sending = self.begin_send("cancel")?;

        let mut message = Message::Request(request);
        self.notify_message_to_send(&mut message)?;
        let request = into_request(message)?;
        {
            let mut inner = self.inner.lock();
            inner.key.branch = request.branch().map(str::to_string);
            inner.cseq = request.cseq().map(|c| c.seq);
            inner.candidates = vec![destination];
            inner.candidate_index = 0;
            inner.destination = Some(destination);
            inner.request = Some(request.clone());
        }
        core.insert(&self.arc()?)?;

        let sent = self.transmit(&Message::Request(request), &destination);
        drop(sending);
        if let Err(e) = sent {
            return match e {
                Error::Transport(transport_error) => self.fail_send(transport_error),
                other => Err(other),
            };
        }
        let settings = self.timer_settings();
        if !destination.transport.is_reliable() {
            self.start_retransmission(TimerType::E, settings.t1);
        }
        self.start_timer(SlotId::Main, TimerType::F, settings.transaction_timeout);
        self.change_state(TransactionState::CancelSent, StateChangeReason::UserCommand)
    }

    /// A CANCEL matched this server transaction.
    ///
    /// The owner hears about it through `cancelled`. Unless configured
    /// otherwise a pending INVITE is then answered with 487.
    pub(crate) fn on_cancelled(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        if !state.awaits_final_response() || state == TransactionState::CancelRequestRcvd {
            trace!(id = %self.id(), %state, "CANCEL arrived after the final response");
            return Ok(());
        }
        self.notify_cancelled()?;

        let auto_487 = self.method().is_invite()
            && !self.config.manual_cancel_response
            && !self.config.is_proxy
            && self.state().awaits_final_response();
        if auto_487 {
            let request = self
                .request()
                .ok_or_else(|| Error::illegal_state(state, "respond"))?;
            let response = Response::for_request(&request, 487);
            self.deliver_response(response, StateChangeReason::TransactionCancelled)?;
        }
        Ok(())
    }
}
