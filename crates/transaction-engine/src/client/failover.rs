//! Failover to the next resolved destination (RFC 3263 section 4.3).
//!
//! A client transaction in `MsgSendFailure` can be cloned onto the next
//! candidate address. The clone is a new Idle transaction with the same
//! identity and owner; [`Transaction::continue_request`] sends it with a new
//! branch.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::transaction::{
    Direction, StateChangeReason, Transaction, TransactionOwner, TransactionState,
};

impl Transaction {
    /// Clones this failed client transaction onto the next candidate address.
    ///
    /// `owner` replaces the owner of the clone; `None` keeps the current one.
    /// Fails with `NotFound` once the candidates are exhausted.
    pub fn dns_continue(
        &self,
        owner: Option<Arc<dyn TransactionOwner>>,
    ) -> Result<Arc<Transaction>> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        if self.direction() != Direction::Client || state != TransactionState::MsgSendFailure {
            return Err(Error::illegal_state(state, "dns_continue"));
        }
        let core = self.core()?;

        let clone = {
            let inner = self.inner.lock();
            let next_index = inner.candidate_index + 1;
            if next_index >= inner.candidates.len() {
                return Err(Error::NotFound("no further destination candidates".to_string()));
            }
            let prepared = inner
                .prepared
                .clone()
                .ok_or_else(|| Error::illegal_state(state, "dns_continue"))?;

            let mut key = inner.key.clone();
            key.branch = None;
            // An initial INVITE must not carry the tag of the failed peer
            key.to_tag = prepared.to_tag().map(str::to_string);

            let owner = owner.unwrap_or_else(|| inner.owner.clone());
            let clone = core.new_transaction(key, owner)?;
            {
                let mut cloned = clone.inner.lock();
                cloned.previous_state = inner.state;
                cloned.cseq = inner.cseq;
                cloned.from = inner.from.clone();
                cloned.to = prepared.headers.to.clone();
                cloned.prepared = Some(prepared);
                cloned.candidates = inner.candidates.clone();
                cloned.candidate_index = next_index;
                cloned.cloned_from = Some(self.id());
            }
            clone
        };
        debug!(id = %self.id(), clone = %clone.id(), "continuing with next destination");

        if self.awaits_503_ack() {
            self.inner.lock().terminate_after_ack = true;
        } else {
            self.terminate_with(StateChangeReason::ContinueDns)?;
        }
        Ok(clone)
    }
}
