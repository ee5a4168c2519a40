//! # Server Transactions
//!
//! The manager creates a server transaction for every new inbound request and
//! starts it in `InviteRequestRcvd`, `GenRequestRcvd` or `CancelRequestRcvd`.
//! The owner answers with [`Transaction::respond`] or
//! [`Transaction::send_response`]; an owner that does nothing gets the
//! default answer described in
//! [`default_state_behavior`](crate::transaction::default_state_behavior).
//!
//! Responses go to the address the request came from. Provisional responses
//! do not change the state (except reliable ones, see
//! [`Transaction::respond_reliable`]). A final response moves the transaction
//! to its completed state:
//!
//! ```text
//! INVITE 2xx       InviteFinalResponseSent -> Terminated
//!                  (InviteProxy2xxResponseSent when acting as a proxy)
//! INVITE non-2xx   InviteFinalResponseSent -> ACK -> InviteAckRcvd -> Terminated
//!                  retransmitted on timer G until the ACK, given up on timer H
//! CANCEL           CancelFinalResponseSent -> Terminated
//! PRACK            PrackFinalResponseSent  -> Terminated
//! other            GenFinalResponseSent    -> Terminated
//! ```
//!
//! Over UDP the completed states linger (timers I and J) to absorb
//! retransmissions; reliable transports terminate at once.

mod auth;
mod invite;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{Message, Method, Request, Response};
use crate::timer::{SlotId, TimerType};
use crate::transaction::{
    into_response, Direction, StateChangeReason, Transaction, TransactionState,
};
use crate::transport::InboundContext;

impl Transaction {
    /// Records the request and enters the first server state
    pub(crate) fn start_server(&self, request: Request, context: InboundContext) -> Result<()> {
        let _guard = self.lock.lock();
        self.check_live()?;
        let method = request.method.clone();
        {
            let mut inner = self.inner.lock();
            inner.request = Some(request.clone());
            inner.inbound = Some(context);
            inner.destination = Some(context.reply_address());
        }
        self.notify_message_received(&Message::Request(request))?;

        let state = match method {
            Method::Invite => TransactionState::InviteRequestRcvd,
            Method::Cancel => TransactionState::CancelRequestRcvd,
            _ => TransactionState::GenRequestRcvd,
        };
        self.change_state(state, StateChangeReason::RequestReceived)
    }

    /// Responds with `status` and its default reason phrase
    pub fn respond(&self, status: u16) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let request = self
            .request()
            .ok_or_else(|| Error::illegal_state(state, "respond"))?;
        self.send_response_locked(Response::for_request(&request, status))
    }

    /// Sends a response built by the owner, e.g. with extra headers or a body
    pub fn send_response(&self, response: Response) -> Result<()> {
        let _guard = self.lock.lock();
        self.send_response_locked(response)
    }

    fn send_response_locked(&self, response: Response) -> Result<()> {
        let state = self.check_live()?;
        if self.direction() != Direction::Server {
            return Err(Error::illegal_state(state, "respond"));
        }
        if !(100..=699).contains(&response.status) {
            return Err(Error::InvalidArgument(format!(
                "invalid status code {}",
                response.status
            )));
        }
        let proxy_2xx = state == TransactionState::InviteProxy2xxResponseSent && response.is_success();
        if !state.awaits_final_response() && !proxy_2xx {
            return Err(Error::illegal_state(state, "respond"));
        }
        if state == TransactionState::InviteRelProvResponseSent && response.is_provisional() {
            // RFC 3262 section 3: no further provisional response before the PRACK
            return Err(Error::illegal_state(state, "respond"));
        }
        self.deliver_response(response, StateChangeReason::UserCommand)
    }

    /// Tags, sends and records a response, then moves the state machine.
    /// The caller holds the guard and has validated the state.
    pub(crate) fn deliver_response(&self, mut response: Response, reason: StateChangeReason) -> Result<()> {
        let sending = self.begin_send("respond")?;
        if response.status > 100 {
            if let Some(to) = response.headers.to.as_mut() {
                if to.tag.is_none() {
                    to.tag = self.local_tag();
                }
            }
        }

        let mut message = Message::Response(response);
        self.notify_message_to_send(&mut message)?;
        let response = into_response(message)?;
        let destination = self
            .destination()
            .ok_or_else(|| Error::illegal_state(self.state(), "respond"))?;

        let sent_tag = response.to_tag().map(str::to_string);
        let retagged = {
            let mut inner = self.inner.lock();
            inner.response_code = response.status;
            inner.last_response = Some(response.clone());
            let retagged = !response.is_provisional()
                && sent_tag.is_some()
                && sent_tag != inner.local_tag;
            if retagged {
                inner.local_tag = sent_tag.clone();
            }
            retagged
        };
        if retagged {
            // ACKs for this response carry the owner's tag
            if let Ok(core) = self.core() {
                core.table.update(self.id(), |info| info.local_tag = sent_tag);
            }
        }
        let sent = self.transmit(&Message::Response(response.clone()), &destination);
        drop(sending);
        if let Err(e) = sent {
            if matches!(e, Error::Transport(_)) {
                self.terminate_on_network_error();
            }
            return Err(e);
        }
        debug!(id = %self.id(), status = response.status, "response sent");

        if response.is_provisional() {
            return Ok(());
        }
        self.final_response_sent(&response, reason)
    }

    fn final_response_sent(&self, response: &Response, reason: StateChangeReason) -> Result<()> {
        let method = self.method();
        let unreliable = self.is_unreliable();
        let settings = self.timer_settings();
        if self.state() == TransactionState::InviteProxy2xxResponseSent {
            // Further 2xx from other branches pass through untouched
            return Ok(());
        }
        self.cancel_timers();

        if method.is_invite() {
            if response.is_success() {
                if self.config.is_proxy {
                    self.start_timer(SlotId::Main, TimerType::Proxy2xx, settings.fork_window);
                    return self.change_state(TransactionState::InviteProxy2xxResponseSent, reason);
                }
                // 2xx retransmission belongs to the dialog layer (RFC 3261 section 13.3.1.4)
                self.change_state(TransactionState::InviteFinalResponseSent, reason)?;
                return self.terminate_with(StateChangeReason::NormalTermination);
            }
            if unreliable {
                self.start_retransmission(TimerType::G, settings.t1);
            }
            self.start_timer(SlotId::Main, TimerType::H, settings.wait_time_h);
            return self.change_state(TransactionState::InviteFinalResponseSent, reason);
        }

        let next = match method {
            Method::Cancel => TransactionState::CancelFinalResponseSent,
            Method::Prack => TransactionState::PrackFinalResponseSent,
            _ => TransactionState::GenFinalResponseSent,
        };
        self.change_state(next, reason)?;
        if unreliable {
            self.start_timer(SlotId::Main, TimerType::J, settings.wait_time_j);
            Ok(())
        } else {
            self.terminate_with(StateChangeReason::NormalTermination)
        }
    }

    /// A retransmission of our request arrived; resend the last response
    pub(crate) fn on_request_retransmission(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let (response, destination) = {
            let inner = self.inner.lock();
            (inner.last_response.clone(), inner.destination)
        };
        let (Some(response), Some(destination)) = (response, destination) else {
            trace!(id = %self.id(), %state, "retransmission before any response");
            return Ok(());
        };
        trace!(id = %self.id(), status = response.status, "resending response");
        if let Err(e) = self.transmit(&Message::Response(response), &destination) {
            if matches!(e, Error::Transport(_)) {
                self.handle_send_failure();
            }
            return Err(e);
        }
        Ok(())
    }

    /// An ACK matched this INVITE server transaction
    pub(crate) fn receive_ack(&self, ack: Request) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        match state {
            TransactionState::InviteFinalResponseSent => {}
            TransactionState::InviteAckRcvd => {
                trace!(id = %self.id(), "absorbing ACK retransmission");
                return Ok(());
            }
            _ => {
                warn!(id = %self.id(), %state, "unexpected ACK");
                return Ok(());
            }
        }

        self.cancel_timers();
        self.notify_message_received(&Message::Request(ack))?;
        self.change_state(TransactionState::InviteAckRcvd, StateChangeReason::AckReceived)?;
        if self.is_unreliable() {
            self.start_timer(SlotId::Main, TimerType::I, self.timer_settings().wait_time_i);
            Ok(())
        } else {
            self.terminate_with(StateChangeReason::NormalTermination)
        }
    }
}
