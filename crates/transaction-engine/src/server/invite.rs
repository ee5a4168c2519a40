use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Message, Response, OPTION_TAG_100REL};
use crate::timer::{SlotId, TimerType};
use crate::transaction::{into_response, StateChangeReason, Transaction, TransactionState};
use crate::utils::initial_rseq;

impl Transaction {
    /// Sends a reliable provisional response (RFC 3262) to this INVITE.
    ///
    /// The response carries `Require: 100rel` and the next RSeq, and is
    /// retransmitted until the matching PRACK arrives. Only one reliable
    /// provisional response may be outstanding.
    pub fn respond_reliable(&self, status: u16) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        if !self.method().is_invite()
            || !matches!(
                state,
                TransactionState::InviteRequestRcvd | TransactionState::InvitePrackCompleted
            )
        {
            return Err(Error::illegal_state(state, "respond_reliable"));
        }
        if !(101..=199).contains(&status) {
            return Err(Error::InvalidArgument(format!(
                "{} cannot be sent reliably",
                status
            )));
        }
        let request = self
            .request()
            .ok_or_else(|| Error::illegal_state(state, "respond_reliable"))?;
        if !self.config.support_100rel {
            return Err(Error::Unsupported("100rel is disabled".to_string()));
        }
        if !request.headers.supports(OPTION_TAG_100REL) {
            return Err(Error::Unsupported(
                "peer does not support reliable provisional responses".to_string(),
            ));
        }

        let rseq = {
            let mut inner = self.inner.lock();
            let rseq = inner.reliable.next_rseq.unwrap_or_else(initial_rseq);
            inner.reliable.next_rseq = Some(rseq.wrapping_add(1));
            rseq
        };
        let mut response = Response::for_request(&request, status);
        response.headers.require.push(OPTION_TAG_100REL.to_string());
        response.headers.rseq = Some(rseq);
        if let Some(to) = response.headers.to.as_mut() {
            if to.tag.is_none() {
                to.tag = self.local_tag();
            }
        }

        let sending = self.begin_send("respond_reliable")?;
        let mut message = Message::Response(response);
        self.notify_message_to_send(&mut message)?;
        let response = into_response(message)?;
        let destination = self
            .destination()
            .ok_or_else(|| Error::illegal_state(state, "respond_reliable"))?;

        {
            let mut inner = self.inner.lock();
            inner.response_code = response.status;
            inner.last_response = Some(response.clone());
            inner.reliable.pending = Some(response.clone());
        }
        let sent = self.transmit(&Message::Response(response), &destination);
        drop(sending);
        if let Err(e) = sent {
            if matches!(e, Error::Transport(_)) {
                self.terminate_on_network_error();
            }
            return Err(e);
        }
        debug!(id = %self.id(), status, rseq, "reliable provisional response sent");

        let core = self.core()?;
        core.table.update(self.id(), |info| info.awaiting_prack = Some(rseq));
        let settings = self.timer_settings();
        if !destination.transport.is_reliable() {
            self.start_retransmission(TimerType::ReliableProvisional, settings.t1);
        }
        self.start_timer(
            SlotId::Main,
            TimerType::ReliableProvisionalTimeout,
            settings.reliable_provisional_timeout,
        );
        self.change_state(
            TransactionState::InviteRelProvResponseSent,
            StateChangeReason::UserCommand,
        )
    }
}
