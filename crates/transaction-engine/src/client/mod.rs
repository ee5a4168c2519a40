//! # Client Transactions
//!
//! A client transaction is created Idle by
//! [`TransactionManager::create_transaction`](crate::TransactionManager::create_transaction),
//! optionally given identity with the setters below, and started by
//! [`Transaction::send_request`] or [`Transaction::send_request_message`].
//!
//! Sending a request goes through these steps, each of which may stop it:
//!
//! 1. the owner sees the request in `message_to_send`
//! 2. the transport resolves the candidate destinations
//! 3. the engine pushes its own top Via with a fresh branch and the owner
//!    sees the result in `final_destination_resolved`
//! 4. the transaction enters the manager's table and the request is sent
//! 5. timers start and the state moves to `InviteCalling`, `GenRequestSent`
//!    or `CancelSent`
//!
//! A transport failure moves the transaction to `MsgSendFailure`, from which
//! [`Transaction::dns_continue`] can fail over to the next candidate.

mod failover;
mod invite;
mod non_invite;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::message::{Message, Method, Party, Request, Response, Uri, Via};
use crate::timer::{SlotId, TimerType};
use crate::transaction::{
    into_request, Direction, SendInProgress, StateChangeReason, Transaction, TransactionState,
};
use crate::transport::{TransportError, TransportKind};
use crate::utils::{generate_branch, generate_call_id, generate_tag};

impl Transaction {
    fn idle_client(&self, operation: &'static str) -> Result<()> {
        let state = self.check_live()?;
        if self.direction() != Direction::Client || state != TransactionState::Idle {
            return Err(Error::illegal_state(state, operation));
        }
        Ok(())
    }

    pub fn set_call_id(&self, call_id: impl Into<String>) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("set_call_id")?;
        let call_id = call_id.into();
        if call_id.is_empty() {
            return Err(Error::InvalidArgument("empty Call-ID".to_string()));
        }
        self.inner.lock().key.call_id = call_id;
        Ok(())
    }

    /// Sets the From party; a tag is generated when sending if it has none
    pub fn set_from(&self, from: Party) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("set_from")?;
        self.inner.lock().from = Some(from);
        Ok(())
    }

    pub fn set_to(&self, to: Party) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("set_to")?;
        self.inner.lock().to = Some(to);
        Ok(())
    }

    pub fn set_cseq(&self, cseq: u32) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("set_cseq")?;
        self.inner.lock().cseq = Some(cseq);
        Ok(())
    }

    /// Builds a `method` request to `uri` from the identity set on this
    /// transaction and sends it.
    pub fn send_request(&self, method: Method, uri: impl Into<Uri>) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("send_request")?;
        let (from, to, call_id, cseq) = {
            let inner = self.inner.lock();
            (
                inner.from.clone(),
                inner.to.clone(),
                inner.key.call_id.clone(),
                inner.cseq,
            )
        };
        let from = from.ok_or_else(|| Error::InvalidArgument("From not set".to_string()))?;
        let to = to.ok_or_else(|| Error::InvalidArgument("To not set".to_string()))?;

        let mut request = Request::new(method, uri).with_from(from).with_to(to);
        if !call_id.is_empty() {
            request = request.with_call_id(call_id);
        }
        request = request.with_cseq(cseq.unwrap_or(1));
        self.start_client(request)
    }

    /// Sends a request built by the owner. Missing Call-ID, From tag and CSeq
    /// are filled in from the transaction or generated.
    pub fn send_request_message(&self, request: Request) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("send_request_message")?;
        self.start_client(request)
    }

    /// Sends the request of a transaction cloned by [`Transaction::dns_continue`]
    pub fn continue_request(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.idle_client("continue_request")?;
        let prepared = self
            .inner
            .lock()
            .prepared
            .clone()
            .ok_or_else(|| Error::illegal_state(TransactionState::Idle, "continue_request"))?;
        let sending = self.begin_send("continue_request")?;

        let mut message = Message::Request(prepared);
        self.notify_message_to_send(&mut message)?;
        self.send_client_request(into_request(message)?, sending)
    }

    fn start_client(&self, mut request: Request) -> Result<()> {
        if matches!(request.method, Method::Ack | Method::Cancel) {
            return Err(Error::InvalidArgument(format!(
                "{} is sent through its INVITE transaction",
                request.method
            )));
        }
        let core = self.core()?;
        let sending = self.begin_send("send_request")?;
        let generated_call_id = request
            .call_id()
            .is_none()
            .then(|| generate_call_id(&core.transport.sent_by(TransportKind::Udp)));
        {
            let mut inner = self.inner.lock();
            if request.headers.from.is_none() {
                request.headers.from = inner.from.clone();
            }
            if request.headers.to.is_none() {
                request.headers.to = inner.to.clone();
            }
            let from = request
                .headers
                .from
                .as_mut()
                .ok_or_else(|| Error::InvalidArgument("request has no From".to_string()))?;
            if from.tag.is_none() {
                from.tag = Some(generate_tag(self.config.local_tag_length));
            }
            if request.headers.to.is_none() {
                return Err(Error::InvalidArgument("request has no To".to_string()));
            }
            if let Some(generated) = generated_call_id {
                let call_id = if inner.key.call_id.is_empty() {
                    generated
                } else {
                    inner.key.call_id.clone()
                };
                request.headers.call_id = Some(call_id);
            }
            if request.cseq().is_none() {
                request = request.with_cseq(inner.cseq.unwrap_or(1));
            }
            if request.headers.max_forwards.is_none() {
                request.headers.max_forwards = Some(self.config.max_forwards);
            }

            inner.key.call_id = request.call_id().unwrap_or_default().to_string();
            inner.key.from_tag = request.from_tag().map(str::to_string);
            inner.key.to_tag = request.to_tag().map(str::to_string);
            inner.key.method = request.method.clone();
            inner.cseq = request.cseq().map(|c| c.seq);
            inner.from = request.headers.from.clone();
            inner.to = request.headers.to.clone();
        }

        let mut message = Message::Request(request);
        self.notify_message_to_send(&mut message)?;
        self.send_client_request(into_request(message)?, sending)
    }

    /// Resolves, adds our Via and sends. The caller holds the guard and the
    /// send marker; the marker is released before any state change.
    pub(crate) fn send_client_request(
        &self,
        mut request: Request,
        sending: SendInProgress<'_>,
    ) -> Result<()> {
        let core = self.core()?;

        let needs_resolution = self.inner.lock().candidates.is_empty();
        if needs_resolution {
            let resolved = self.lock.upcall(|| core.transport.resolve(&request));
            self.ensure_alive()?;
            let candidates = match resolved {
                Ok(candidates) if !candidates.is_empty() => candidates,
                Ok(_) => {
                    drop(sending);
                    return self.fail_send(TransportError::ResolutionFailed(format!(
                        "no destination for {}",
                        request.uri
                    )));
                }
                Err(e) => {
                    drop(sending);
                    return self.fail_send(e);
                }
            };
            let mut inner = self.inner.lock();
            inner.candidates = candidates;
            inner.candidate_index = 0;
        }

        let destination = {
            let mut inner = self.inner.lock();
            let destination = inner.candidates.get(inner.candidate_index).copied();
            inner.prepared = Some(request.clone());
            destination
        };
        let Some(destination) = destination else {
            drop(sending);
            return self.fail_send(TransportError::ResolutionFailed(
                "candidate list exhausted".to_string(),
            ));
        };

        let branch = generate_branch();
        let sent_by = core.transport.sent_by(destination.transport);
        request
            .headers
            .via
            .insert(0, Via::new(destination.transport, sent_by, Some(branch.clone())));
        self.notify_final_destination_resolved(&mut request)?;
        if let Some(via) = request.headers.via.first_mut() {
            via.branch = Some(branch.clone());
        }

        {
            let mut inner = self.inner.lock();
            inner.key.branch = Some(branch);
            inner.destination = Some(destination);
            inner.request = Some(request.clone());
        }
        core.insert(&self.arc()?)?;

        let method = request.method.clone();
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
            let timer = if method.is_invite() { TimerType::A } else { TimerType::E };
            self.start_retransmission(timer, settings.t1);
        }
        let timeout = if method.is_invite() { TimerType::B } else { TimerType::F };
        self.start_timer(SlotId::Main, timeout, settings.transaction_timeout);

        let state = match method {
            Method::Invite => TransactionState::InviteCalling,
            Method::Cancel => TransactionState::CancelSent,
            _ => TransactionState::GenRequestSent,
        };
        debug!(id = %self.id(), %destination, "{} sent", method);
        self.change_state(state, StateChangeReason::UserCommand)
    }

    /// Moves to `MsgSendFailure` and reports `error` to the caller
    pub(crate) fn fail_send(&self, error: TransportError) -> Result<()> {
        error!(id = %self.id(), "request not sent: {}", error);
        self.cancel_timers();
        match self.change_state(TransactionState::MsgSendFailure, StateChangeReason::NetworkError) {
            Ok(()) | Err(Error::Destructed) => Err(Error::Transport(error)),
            Err(other) => Err(other),
        }
    }

    /// Entry point for a response matched to this client transaction
    pub(crate) fn receive_response(&self, response: Response) -> Result<()> {
        let _guard = self.lock.lock();
        self.check_live()?;
        if self.method().is_invite() {
            self.invite_response(response)
        } else {
            self.non_invite_response(response)
        }
    }

    /// Records a received response
    fn record_response(&self, response: &Response) {
        let mut inner = self.inner.lock();
        inner.response_code = response.status;
        inner.last_response = Some(response.clone());
    }
}
