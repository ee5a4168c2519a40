//! Owner callback dispatch.
//!
//! Every owner callback goes through [`Transaction::dispatch`]: the guard is
//! released for the duration of the call and reacquired afterwards with its
//! depth restored. Since the owner may have terminated the transaction in the
//! meantime, the state is checked again and a terminated transaction turns
//! the outcome into [`Error::Destructed`].

use std::sync::Arc;

use tracing::{debug, trace};

use super::owner::{aborted, PrackParameters, TransactionOwner};
use super::{StateChangeReason, Transaction, TransactionState};
use crate::auth::Credentials;
use crate::error::{Error, Result};
use crate::message::{Message, Request, Response};
use crate::transport::ConnectionInfo;

impl Transaction {
    /// Calls into the owner with the guard released
    fn dispatch<R>(
        &self,
        callback: &'static str,
        f: impl FnOnce(&dyn TransactionOwner, &Arc<Transaction>) -> R,
    ) -> Result<R> {
        let this = self.this.upgrade().ok_or(Error::Destructed)?;
        let owner = self.inner.lock().owner.clone();
        trace!(id = %self.id, callback, "calling owner");
        let out = self.lock.upcall(|| f(owner.as_ref(), &this));
        self.ensure_alive()?;
        Ok(out)
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.inner.lock().state.is_terminated() {
            debug!(id = %self.id, "transaction destructed during callback");
            return Err(Error::Destructed);
        }
        Ok(())
    }

    /// Reports a state change. Reaching `Terminated` is the expected outcome
    /// of the terminal notification and is not reported as destruction.
    pub(crate) fn notify_state_changed(
        &self,
        state: TransactionState,
        reason: StateChangeReason,
    ) -> Result<()> {
        let result = self.dispatch("state_changed", |owner, tx| {
            owner.state_changed(tx, state, reason)
        });
        match result {
            Err(Error::Destructed) if state.is_terminated() => Ok(()),
            other => other,
        }
    }

    pub(crate) fn notify_message_to_send(&self, message: &mut Message) -> Result<()> {
        self.dispatch("message_to_send", |owner, tx| owner.message_to_send(tx, message))?
            .map_err(aborted)
    }

    pub(crate) fn notify_message_received(&self, message: &Message) -> Result<()> {
        self.dispatch("message_received", |owner, tx| owner.message_received(tx, message))?
            .map_err(aborted)
    }

    pub(crate) fn notify_supply_prack_parameters(
        &self,
        response: &Response,
    ) -> Result<Option<PrackParameters>> {
        self.dispatch("supply_prack_parameters", |owner, tx| {
            owner.supply_prack_parameters(tx, response)
        })
    }

    pub(crate) fn notify_cancelled(&self) -> Result<()> {
        self.dispatch("cancelled", |owner, tx| owner.cancelled(tx))
    }

    pub(crate) fn notify_credentials_found(
        &self,
        credentials: &Credentials,
        supported: bool,
    ) -> Result<()> {
        self.dispatch("credentials_found", |owner, tx| {
            owner.credentials_found(tx, credentials, supported)
        })
    }

    pub(crate) fn notify_auth_completed(&self, success: bool) -> Result<()> {
        self.dispatch("auth_completed", |owner, tx| owner.auth_completed(tx, success))
    }

    pub(crate) fn notify_final_destination_resolved(&self, request: &mut Request) -> Result<()> {
        self.dispatch("final_destination_resolved", |owner, tx| {
            owner.final_destination_resolved(tx, request)
        })
    }

    pub(crate) fn notify_new_connection(&self, connection: ConnectionInfo, is_new: bool) -> Result<()> {
        self.dispatch("new_connection_in_use", |owner, tx| {
            owner.new_connection_in_use(tx, &connection, is_new)
        })
    }
}
