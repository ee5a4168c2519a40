//! Routing of inbound messages.
//!
//! Every message received from the transport enters through
//! [`ManagerCore::receive_message`]. Responses go to the client transaction
//! they match. Requests either match a live server transaction (a
//! retransmission, or the ACK of a non-2xx final response) or start a new
//! one. CANCEL and PRACK are special: they start a transaction of their own
//! and act on the transaction they target.
//!
//! No transaction guard is held while routing; each transaction entry point
//! takes its own.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{Message, Method, Request, Response, OPTION_TAG_100REL};
use crate::transaction::{Direction, NoOwner, Transaction, TransactionKey};
use crate::transport::InboundContext;
use crate::utils::generate_tag;

use super::matching::{
    cancel_target_matches, is_merged_request, prack_target_matches, request_matches,
    response_matches,
};
use super::policy::TransactionDisposition;
use super::ManagerCore;

impl ManagerCore {
    pub(crate) fn receive_message(
        self: &Arc<Self>,
        message: Message,
        context: InboundContext,
    ) -> Result<()> {
        let Some(call_id) = message.call_id().map(str::to_string) else {
            return Err(Error::InvalidArgument(format!(
                "{} has no Call-ID",
                message.summary()
            )));
        };
        trace!(from = %context.remote, %call_id, "received {}", message.summary());

        match message {
            Message::Response(response) => self.route_response(&call_id, response, context),
            Message::Request(request) => match request.method {
                Method::Ack => self.route_ack(&call_id, request, context),
                Method::Cancel => self.route_cancel(&call_id, request, context),
                Method::Prack => self.route_prack(&call_id, request, context),
                _ => self.route_request(&call_id, request, context),
            },
        }
    }

    fn route_response(
        &self,
        call_id: &str,
        response: Response,
        context: InboundContext,
    ) -> Result<()> {
        let Some(transaction) = self
            .table
            .find(call_id, |info| response_matches(&response, info))
        else {
            self.out_of_context(Message::Response(response), context);
            return Ok(());
        };
        match transaction.receive_response(response.clone()) {
            Err(Error::Terminated) => {
                self.out_of_context(Message::Response(response), context);
                Ok(())
            }
            other => tolerate_destruction(other),
        }
    }

    fn route_ack(&self, call_id: &str, ack: Request, context: InboundContext) -> Result<()> {
        let Some(transaction) = self.table.find(call_id, |info| request_matches(&ack, info)) else {
            // ACK for a 2xx: the dialog layer's business
            self.out_of_context(Message::Request(ack), context);
            return Ok(());
        };
        match transaction.receive_ack(ack.clone()) {
            Err(Error::Terminated) => {
                self.out_of_context(Message::Request(ack), context);
                Ok(())
            }
            other => tolerate_destruction(other),
        }
    }

    fn route_cancel(
        self: &Arc<Self>,
        call_id: &str,
        cancel: Request,
        context: InboundContext,
    ) -> Result<()> {
        if self.absorb_retransmission(call_id, &cancel)? {
            return Ok(());
        }

        let Some(target) = self
            .table
            .find(call_id, |info| cancel_target_matches(&cancel, info))
        else {
            debug!(%call_id, "CANCEL matches no transaction");
            if self.config.reject_unmatched_cancel {
                self.respond_statelessly(&cancel, 481, &context)?;
            }
            self.out_of_context(Message::Request(cancel), context);
            return Ok(());
        };

        let key = TransactionKey::from_request(&cancel, Direction::Server)?;
        let transaction = self.new_transaction(key, Arc::new(NoOwner))?;
        let local_tag = cancel
            .to_tag()
            .map(str::to_string)
            .or_else(|| target.local_tag());
        self.prepare_server(&transaction, &cancel, local_tag);
        if self.config.is_proxy {
            self.apply_disposition(&transaction, &cancel);
        }
        if !self.insert_server(&transaction, call_id, &cancel)? {
            return Ok(());
        }
        transaction.inner.lock().cancel_pair = Some(target.id());
        {
            let _guard = target.lock.lock();
            match target.check_live() {
                Ok(_) => target.inner.lock().cancel_pair = Some(transaction.id()),
                Err(_) => trace!(target = %target.id(), "CANCEL target ended before pairing"),
            }
        }

        debug!(id = %transaction.id(), target = %target.id(), "CANCEL received");
        tolerate_destruction(transaction.start_server(cancel, context))?;
        match target.on_cancelled() {
            Err(Error::Terminated) => Ok(()),
            other => tolerate_destruction(other),
        }
    }

    fn route_prack(
        self: &Arc<Self>,
        call_id: &str,
        prack: Request,
        context: InboundContext,
    ) -> Result<()> {
        if self.absorb_retransmission(call_id, &prack)? {
            return Ok(());
        }

        let key = TransactionKey::from_request(&prack, Direction::Server)?;
        let transaction = self.new_transaction(key, Arc::new(NoOwner))?;
        let local_tag = prack
            .to_tag()
            .map(str::to_string)
            .unwrap_or_else(|| generate_tag(self.config.local_tag_length));
        self.prepare_server(&transaction, &prack, Some(local_tag));

        let unknown_extension = prack
            .headers
            .require
            .iter()
            .any(|option| !option.eq_ignore_ascii_case(OPTION_TAG_100REL));
        let target = self
            .table
            .find(call_id, |info| prack_target_matches(&prack, info));
        let preset = if unknown_extension {
            420
        } else if !self.config.support_100rel {
            405
        } else {
            match target {
                Some(target) => match target.on_prack_received(&prack) {
                    Ok(()) => {
                        transaction.inner.lock().prack_target = Some(target.id());
                        200
                    }
                    Err(e) => {
                        debug!(target = %target.id(), "PRACK not applied: {}", e);
                        481
                    }
                },
                None => 481,
            }
        };
        transaction.inner.lock().preset_response = Some(preset);
        if self.config.manual_prack {
            self.apply_disposition(&transaction, &prack);
        }
        if !self.insert_server(&transaction, call_id, &prack)? {
            return Ok(());
        }
        tolerate_destruction(transaction.start_server(prack, context))
    }

    fn route_request(
        self: &Arc<Self>,
        call_id: &str,
        request: Request,
        context: InboundContext,
    ) -> Result<()> {
        if self.absorb_retransmission(call_id, &request)? {
            return Ok(());
        }
        if !self.config.disable_merging
            && self.table.any(call_id, |info| is_merged_request(&request, info))
        {
            debug!(%call_id, "merged request, answering 482");
            return self.respond_statelessly(&request, 482, &context);
        }
        if !self.policy.new_request_received(&request, &context) {
            self.out_of_context(Message::Request(request), context);
            return Ok(());
        }

        let key = TransactionKey::from_request(&request, Direction::Server)?;
        let transaction = self.new_transaction(key, Arc::new(NoOwner))?;
        let local_tag = request
            .to_tag()
            .map(str::to_string)
            .unwrap_or_else(|| generate_tag(self.config.local_tag_length));
        self.prepare_server(&transaction, &request, Some(local_tag));
        if !self.insert_server(&transaction, call_id, &request)? {
            return Ok(());
        }
        self.apply_disposition(&transaction, &request);
        tolerate_destruction(transaction.start_server(request, context))
    }

    /// Resends the last response of the transaction `request` retransmits
    fn absorb_retransmission(&self, call_id: &str, request: &Request) -> Result<bool> {
        let Some(transaction) = self
            .table
            .find(call_id, |info| request_matches(request, info))
        else {
            return Ok(false);
        };
        trace!(id = %transaction.id(), "request retransmission");
        match transaction.on_request_retransmission() {
            Ok(()) | Err(Error::Terminated) | Err(Error::Destructed) => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn prepare_server(&self, transaction: &Arc<Transaction>, request: &Request, local_tag: Option<String>) {
        let mut inner = transaction.inner.lock();
        inner.request = Some(request.clone());
        inner.cseq = request.cseq().map(|c| c.seq);
        inner.local_tag = local_tag;
    }

    /// Adds a new server transaction. A concurrent copy of the same request
    /// may have won the race, in which case this one is a retransmission.
    fn insert_server(
        &self,
        transaction: &Arc<Transaction>,
        call_id: &str,
        request: &Request,
    ) -> Result<bool> {
        match self.insert(transaction) {
            Ok(()) => Ok(true),
            Err(Error::InvalidArgument(_)) => {
                trace!(%call_id, "request raced with its retransmission");
                self.absorb_retransmission(call_id, request)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_disposition(&self, transaction: &Arc<Transaction>, request: &Request) {
        match self.policy.transaction_created(transaction, request) {
            TransactionDisposition::Accept(owner) => {
                transaction.inner.lock().owner = owner;
            }
            TransactionDisposition::Default => {}
            TransactionDisposition::Reject(code) => {
                let mut inner = transaction.inner.lock();
                inner.preset_response = Some(code);
                inner.owner = Arc::new(NoOwner);
            }
        }
    }

    /// Answers `request` without creating a transaction
    pub(crate) fn respond_statelessly(
        &self,
        request: &Request,
        status: u16,
        context: &InboundContext,
    ) -> Result<()> {
        let mut response = Response::for_request(request, status);
        if let Some(to) = response.headers.to.as_mut() {
            if to.tag.is_none() {
                to.tag = Some(generate_tag(self.config.local_tag_length));
            }
        }
        let destination = context.reply_address();
        self.transport
            .send(&Message::Response(response), &destination)
            .map(|_| ())
            .map_err(|e| {
                warn!(%destination, status, "stateless response not sent: {}", e);
                Error::Transport(e)
            })
    }

    fn out_of_context(&self, message: Message, context: InboundContext) {
        self.policy.out_of_context_message(&message, &context);
    }
}

/// The owner terminating a transaction while it handles an inbound message
/// is a normal outcome for the sender of that message.
fn tolerate_destruction(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Destructed) => Ok(()),
        other => other,
    }
}
