use tracing::trace;

use crate::error::Result;
use crate::message::{Message, Method, Response};
use crate::timer::{SlotId, TimerType};
use crate::transaction::{StateChangeReason, Transaction, TransactionState};

impl Transaction {
    /// Non-INVITE client transaction handling of a matched response
    /// (RFC 3261 section 17.1.2). CANCEL uses the same machine with its own
    /// state names.
    pub(super) fn non_invite_response(&self, response: Response) -> Result<()> {
        let state = self.state();
        if !state.awaits_response() {
            trace!(id = %self.id(), %state, "absorbing response {}", response.status);
            return Ok(());
        }
        let method = self.method();
        self.record_response(&response);
        self.notify_message_received(&Message::Response(response.clone()))?;

        if response.is_provisional() {
            let next = match self.state() {
                TransactionState::GenRequestSent => Some(TransactionState::GenProceeding),
                TransactionState::CancelSent => Some(TransactionState::CancelProceeding),
                _ => None,
            };
            if let Some(next) = next {
                if self.active_timer(SlotId::Retransmit).is_some() {
                    self.start_retransmission(TimerType::E, self.timer_settings().t2);
                }
                self.change_state(next, StateChangeReason::ProvisionalResponseReceived)?;
            }
            return Ok(());
        }

        self.cancel_timers();
        let cancelling = self.state() == TransactionState::GenCancelling;
        if response.status == 503 && method != Method::Cancel && !cancelling {
            return self.change_state(TransactionState::MsgSendFailure, StateChangeReason::Received503);
        }

        let next = if method == Method::Cancel {
            TransactionState::CancelFinalResponseRcvd
        } else {
            TransactionState::GenFinalResponseRcvd
        };
        self.change_state(next, StateChangeReason::for_response(response.status))?;

        if self.is_unreliable() {
            self.start_timer(SlotId::Main, TimerType::K, self.timer_settings().wait_time_k);
            Ok(())
        } else {
            self.terminate_with(StateChangeReason::NormalTermination)
        }
    }
}
