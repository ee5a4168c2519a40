//! INVITE client transaction (RFC 3261 section 17.1.1).
//!
//! Unlike the RFC machine, the ACK is not sent implicitly: a final response
//! moves the transaction to `InviteFinalResponseRcvd` and the owner calls
//! [`Transaction::ack`] (the default behavior does so right away). Both the
//! non-2xx ACK, which belongs to this transaction, and the 2xx ACK, which is
//! a transaction of its own, go out through `ack`.

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{params_match, Message, Response, Via};
use crate::timer::{SlotId, TimerType};
use crate::transaction::{into_request, StateChangeReason, Transaction, TransactionState};
use crate::transport::TransportKind;
use crate::utils::{create_ack_for_2xx, create_ack_for_non_2xx, generate_branch};

impl Transaction {
    pub(super) fn invite_response(&self, response: Response) -> Result<()> {
        let state = self.state();
        match state {
            TransactionState::InviteCalling
            | TransactionState::InviteProceeding
            | TransactionState::InviteProceedingTimeout
            | TransactionState::InviteCancelling => {}
            TransactionState::InviteAckSent => return self.response_after_ack(response),
            TransactionState::InviteProxy2xxResponseRcvd if response.is_success() => {
                // Every 2xx is forwarded upstream by a proxy
                self.record_response(&response);
                return self.notify_message_received(&Message::Response(response));
            }
            _ => {
                trace!(id = %self.id(), %state, "absorbing response {}", response.status);
                return Ok(());
            }
        }

        if response.is_provisional() {
            self.invite_provisional(response)
        } else {
            self.invite_final(response)
        }
    }

    fn invite_provisional(&self, response: Response) -> Result<()> {
        let reliable = response.is_reliable_provisional();
        if reliable {
            let rseq = response.headers.rseq.unwrap_or_default();
            let mut inner = self.inner.lock();
            if inner.reliable.last_received_rseq.is_some_and(|last| rseq <= last) {
                trace!(id = %self.id(), rseq, "reliable provisional retransmission");
                return Ok(());
            }
            inner.reliable.last_received_rseq = Some(rseq);
        }

        self.record_response(&response);
        self.notify_message_received(&Message::Response(response.clone()))?;

        if self.state() == TransactionState::InviteCalling {
            self.cancel_timers();
            if let Some(timeout) = self.timer_settings().provisional_timeout {
                self.start_timer(SlotId::Main, TimerType::ProvisionalTimeout, timeout);
            }
            self.change_state(
                TransactionState::InviteProceeding,
                StateChangeReason::ProvisionalResponseReceived,
            )?;
        }

        if reliable && !self.config.manual_prack {
            self.send_prack(&response)?;
        }
        Ok(())
    }

    fn invite_final(&self, response: Response) -> Result<()> {
        let to_tag = response.to_tag().map(str::to_string);
        self.inner.lock().key.to_tag = to_tag.clone();
        if let Ok(core) = self.core() {
            core.table.update(self.id(), |info| info.key.to_tag = to_tag);
        }
        self.record_response(&response);
        self.cancel_timers();
        self.notify_message_received(&Message::Response(response.clone()))?;

        let reason = StateChangeReason::for_response(response.status);
        if response.status == 503 {
            return self.change_state(TransactionState::MsgSendFailure, StateChangeReason::Received503);
        }
        if response.is_success() && self.config.is_proxy {
            self.start_timer(SlotId::Main, TimerType::Proxy2xx, self.timer_settings().fork_window);
            return self.change_state(TransactionState::InviteProxy2xxResponseRcvd, reason);
        }

        self.change_state(TransactionState::InviteFinalResponseRcvd, reason)?;
        if self.state() == TransactionState::InviteFinalResponseRcvd {
            self.start_timer(
                SlotId::Main,
                TimerType::AwaitAck,
                self.timer_settings().transaction_timeout,
            );
        }
        Ok(())
    }

    /// Responses arriving once the ACK went out: retransmissions get the ACK
    /// again, a 2xx from another fork goes to the manager policy.
    fn response_after_ack(&self, response: Response) -> Result<()> {
        if response.is_provisional() {
            return Ok(());
        }
        let (ack, destination, to_tag, acked_success) = {
            let inner = self.inner.lock();
            (
                inner.ack.clone(),
                inner.destination,
                inner.key.to_tag.clone(),
                inner.last_response.as_ref().is_some_and(Response::is_success),
            )
        };

        let same_dialog = params_match(response.to_tag(), to_tag.as_deref());
        if response.is_success() && !same_dialog {
            debug!(id = %self.id(), "2xx from another fork");
            let core = self.core()?;
            let this = self.arc()?;
            self.lock
                .upcall(|| core.policy.forked_invite_response(&this, &response));
            return self.ensure_alive();
        }
        if response.is_success() != acked_success {
            warn!(id = %self.id(), "final response {} conflicts with the acknowledged one", response.status);
            return Ok(());
        }

        if let (Some(ack), Some(destination)) = (ack, destination) {
            trace!(id = %self.id(), "retransmitting ACK");
            self.transmit(&Message::Request(ack), &destination)?;
        }
        Ok(())
    }

    /// Sends the ACK for the final response received.
    ///
    /// Valid in `InviteFinalResponseRcvd`, and in `MsgSendFailure` to
    /// acknowledge a 503. A non-2xx ACK reuses the INVITE's branch and
    /// Request-URI; a 2xx ACK gets a new branch and goes to the remote target.
    pub fn ack(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let for_503 = state == TransactionState::MsgSendFailure && self.awaits_503_ack();
        if state != TransactionState::InviteFinalResponseRcvd && !for_503 {
            return Err(Error::illegal_state(state, "ack"));
        }

        let (invite, response, current) = {
            let inner = self.inner.lock();
            (inner.request.clone(), inner.last_response.clone(), inner.destination)
        };
        let (Some(invite), Some(response)) = (invite, response) else {
            return Err(Error::illegal_state(state, "ack"));
        };
        let success = response.is_success();
        let core = self.core()?;
        let sending = self.begin_send("ack")?;

        let (ack, destination) = if success {
            let transport = current.map(|d| d.transport).unwrap_or(TransportKind::Udp);
            let via = Via::new(transport, core.transport.sent_by(transport), Some(generate_branch()));
            let ack = create_ack_for_2xx(&invite, &response, via)?;
            let resolved = self.lock.upcall(|| core.transport.resolve(&ack));
            self.ensure_alive()?;
            let destination = resolved
                .ok()
                .and_then(|candidates| candidates.first().copied())
                .or(current);
            (ack, destination)
        } else {
            (create_ack_for_non_2xx(&invite, &response)?, current)
        };
        let destination = destination.ok_or_else(|| Error::illegal_state(state, "ack"))?;

        let mut message = Message::Request(ack);
        self.notify_message_to_send(&mut message)?;
        let ack = into_request(message)?;

        let sent = self.transmit(&Message::Request(ack.clone()), &destination);
        drop(sending);
        if let Err(e) = sent {
            if matches!(e, Error::Transport(_)) {
                self.terminate_on_network_error();
            }
            return Err(e);
        }
        self.cancel_timers();

        let terminate_after_ack = {
            let mut inner = self.inner.lock();
            inner.ack = Some(ack);
            if for_503 {
                inner.ack_sent_for_503 = true;
            }
            inner.terminate_after_ack
        };
        if for_503 {
            if terminate_after_ack {
                return self.terminate_with(StateChangeReason::ContinueDns);
            }
            return Ok(());
        }

        self.change_state(TransactionState::InviteAckSent, StateChangeReason::UserCommand)?;
        if success {
            self.start_timer(SlotId::Main, TimerType::ForkWindow, self.timer_settings().fork_window);
            Ok(())
        } else if destination.transport.is_reliable() {
            self.terminate_with(StateChangeReason::NormalTermination)
        } else {
            self.start_timer(SlotId::Main, TimerType::D, self.timer_settings().wait_time_d);
            Ok(())
        }
    }
}
