//! Shared fixtures for the transaction engine integration tests: a mock
//! transport that records what the engine sends, a policy that records what
//! it is told, and builders for the messages a remote peer would send.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use rvoip_transaction_engine::message::CSeq;
use rvoip_transaction_engine::prelude::*;

/// Engine logs show up with `RUST_LOG=rvoip_transaction_engine=trace`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const LOCAL_ADDR: &str = "127.0.0.1:5060";
pub const PEER_ADDR: &str = "10.0.0.2:5060";
pub const PEER_SENT_BY: &str = "10.0.0.2:5060";

pub fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

pub fn udp(s: &str) -> ResolvedAddress {
    ResolvedAddress::new(addr(s), TransportKind::Udp)
}

pub fn tcp(s: &str) -> ResolvedAddress {
    ResolvedAddress::new(addr(s), TransportKind::Tcp)
}

/// Transport that records every message instead of sending it
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(Message, ResolvedAddress)>>,
    candidates: Mutex<Vec<ResolvedAddress>>,
    failing: Mutex<HashSet<SocketAddr>>,
    resolve_calls: Mutex<usize>,
}

impl MockTransport {
    /// Resolves every request to the peer over UDP
    pub fn new() -> Arc<Self> {
        Self::with_candidates(vec![udp(PEER_ADDR)])
    }

    pub fn with_candidates(candidates: Vec<ResolvedAddress>) -> Arc<Self> {
        let transport = Self::default();
        *transport.candidates.lock() = candidates;
        Arc::new(transport)
    }

    /// Sends to `address` fail from now on
    pub fn fail_address(&self, address: SocketAddr) {
        self.failing.lock().insert(address);
    }

    pub fn heal_address(&self, address: SocketAddr) {
        self.failing.lock().remove(&address);
    }

    pub fn resolve_calls(&self) -> usize {
        *self.resolve_calls.lock()
    }

    pub fn sent(&self) -> Vec<(Message, ResolvedAddress)> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn sent_requests(&self, method: Method) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(message, _)| message.as_request())
            .filter(|request| request.method == method)
            .cloned()
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(message, _)| message.as_response())
            .cloned()
            .collect()
    }

    pub fn responses_with_status(&self, status: u16) -> Vec<Response> {
        self.sent_responses()
            .into_iter()
            .filter(|response| response.status == status)
            .collect()
    }

    pub fn last_request(&self, method: Method) -> Option<Request> {
        self.sent_requests(method).pop()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.sent_responses().pop()
    }

    pub fn destinations(&self) -> Vec<ResolvedAddress> {
        self.sent.lock().iter().map(|(_, destination)| *destination).collect()
    }
}

impl Transport for MockTransport {
    fn resolve(
        &self,
        _request: &Request,
    ) -> std::result::Result<Vec<ResolvedAddress>, TransportError> {
        *self.resolve_calls.lock() += 1;
        Ok(self.candidates.lock().clone())
    }

    fn send(
        &self,
        message: &Message,
        destination: &ResolvedAddress,
    ) -> std::result::Result<SendReceipt, TransportError> {
        if self.failing.lock().contains(&destination.addr) {
            return Err(TransportError::Unreachable(destination.addr));
        }
        self.sent.lock().push((message.clone(), *destination));
        if destination.transport.is_reliable() {
            return Ok(SendReceipt {
                connection: Some(ConnectionInfo {
                    id: 1,
                    remote: destination.addr,
                    transport: destination.transport,
                }),
                new_connection: true,
            });
        }
        Ok(SendReceipt::default())
    }

    fn sent_by(&self, _transport: TransportKind) -> String {
        LOCAL_ADDR.to_string()
    }
}

/// Policy that records out-of-context messages and hands new server
/// transactions to a [`ChannelOwner`]
pub struct RecordingPolicy {
    pub out_of_context: Mutex<Vec<Message>>,
    pub forked: Mutex<Vec<Response>>,
    accept: Mutex<Option<ChannelOwner>>,
    reject_with: Mutex<Option<u16>>,
    refuse_new: Mutex<bool>,
}

impl RecordingPolicy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            out_of_context: Mutex::new(Vec::new()),
            forked: Mutex::new(Vec::new()),
            accept: Mutex::new(None),
            reject_with: Mutex::new(None),
            refuse_new: Mutex::new(false),
        })
    }

    /// Server transactions created from now on report to the returned receiver
    pub fn accept_with_channel(&self, manual: bool) -> mpsc::UnboundedReceiver<TransactionEvent> {
        let (owner, events) = if manual {
            ChannelOwner::manual()
        } else {
            ChannelOwner::new()
        };
        *self.accept.lock() = Some(owner);
        events
    }

    pub fn reject_with(&self, status: u16) {
        *self.reject_with.lock() = Some(status);
    }

    pub fn refuse_new_requests(&self) {
        *self.refuse_new.lock() = true;
    }

    pub fn out_of_context_count(&self) -> usize {
        self.out_of_context.lock().len()
    }
}

impl ManagerPolicy for RecordingPolicy {
    fn new_request_received(&self, _request: &Request, _context: &InboundContext) -> bool {
        !*self.refuse_new.lock()
    }

    fn transaction_created(
        &self,
        _transaction: &Arc<Transaction>,
        _request: &Request,
    ) -> TransactionDisposition {
        if let Some(status) = *self.reject_with.lock() {
            return TransactionDisposition::Reject(status);
        }
        match self.accept.lock().clone() {
            Some(owner) => TransactionDisposition::Accept(Arc::new(owner)),
            None => TransactionDisposition::Default,
        }
    }

    fn out_of_context_message(&self, message: &Message, _context: &InboundContext) {
        self.out_of_context.lock().push(message.clone());
    }

    fn forked_invite_response(&self, _transaction: &Arc<Transaction>, response: &Response) {
        self.forked.lock().push(response.clone());
    }
}

pub struct TestEnvironment {
    pub transport: Arc<MockTransport>,
    pub policy: Arc<RecordingPolicy>,
    pub manager: TransactionManager,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(TransactionConfig::default())
    }

    pub fn with_config(config: TransactionConfig) -> Self {
        Self::build(MockTransport::new(), config)
    }

    pub fn build(transport: Arc<MockTransport>, config: TransactionConfig) -> Self {
        Self::assemble(transport, config, None)
    }

    /// Environment whose manager checks credentials with `authenticator`
    pub fn with_authenticator(authenticator: Arc<dyn Authenticator>) -> Self {
        Self::assemble(MockTransport::new(), TransactionConfig::default(), Some(authenticator))
    }

    fn assemble(
        transport: Arc<MockTransport>,
        config: TransactionConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        init_test_logging();
        let policy = RecordingPolicy::new();
        let mut builder = TransactionManagerBuilder::new(transport.clone())
            .config(config)
            .policy(policy.clone());
        if let Some(authenticator) = authenticator {
            builder = builder.authenticator(authenticator);
        }
        let manager = builder.build();
        Self {
            transport,
            policy,
            manager,
        }
    }

    /// Inbound context of a message from the peer over UDP
    pub fn from_peer(&self) -> InboundContext {
        InboundContext::new(addr(LOCAL_ADDR), addr(PEER_ADDR), TransportKind::Udp)
    }

    pub fn from_peer_tcp(&self) -> InboundContext {
        InboundContext::new(addr(LOCAL_ADDR), addr(PEER_ADDR), TransportKind::Tcp)
    }

    pub fn deliver(&self, message: impl Into<Message>) -> Result<()> {
        self.manager.receive_message(message.into(), self.from_peer())
    }

    /// A client transaction reporting to a channel
    pub fn client(&self) -> (Arc<Transaction>, mpsc::UnboundedReceiver<TransactionEvent>) {
        let (owner, events) = ChannelOwner::new();
        let transaction = self
            .manager
            .create_transaction(Arc::new(owner))
            .expect("client transaction");
        transaction.set_from(Party::new("sip:alice@example.com")).unwrap();
        transaction.set_to(Party::new("sip:bob@example.com")).unwrap();
        (transaction, events)
    }

    /// Sends `method` from a fresh client transaction and returns it with the
    /// request as it went out
    pub fn send(&self, method: Method) -> (Arc<Transaction>, mpsc::UnboundedReceiver<TransactionEvent>, Request) {
        let (transaction, events) = self.client();
        transaction
            .send_request(method.clone(), "sip:bob@example.com")
            .expect("request sent");
        let request = self.transport.last_request(method).expect("request on the wire");
        (transaction, events, request)
    }
}

/// An INVITE the peer sends us
pub fn peer_invite(branch: &str, call_id: &str) -> Request {
    peer_request(Method::Invite, branch, call_id, 1)
}

pub fn peer_request(method: Method, branch: &str, call_id: &str, cseq: u32) -> Request {
    Request::new(method, "sip:bob@127.0.0.1:5060")
        .with_via(Via::new(TransportKind::Udp, PEER_SENT_BY, Some(branch.to_string())))
        .with_from(Party::new("sip:alice@example.com").with_tag("peer-tag"))
        .with_to(Party::new("sip:bob@example.com"))
        .with_call_id(call_id)
        .with_cseq(cseq)
        .with_contact("sip:alice@10.0.0.2:5060")
}

/// The CANCEL the peer sends for `request`
pub fn peer_cancel(request: &Request) -> Request {
    let mut cancel = request.clone();
    cancel.method = Method::Cancel;
    cancel.headers.cseq = request.cseq().map(|c| CSeq::new(c.seq, Method::Cancel));
    cancel.body = Default::default();
    cancel
}

/// The ACK the peer sends for a non-2xx `response` to `invite`
pub fn peer_ack(invite: &Request, response: &Response) -> Request {
    let mut ack = invite.clone();
    ack.method = Method::Ack;
    ack.headers.to = response.headers.to.clone();
    ack.headers.cseq = invite.cseq().map(|c| CSeq::new(c.seq, Method::Ack));
    ack.body = Default::default();
    ack
}

/// A response from the peer to a request we sent
pub fn reply(request: &Request, status: u16, to_tag: Option<&str>) -> Response {
    let response = Response::for_request(request, status);
    match to_tag {
        Some(tag) => response.with_to_tag(tag),
        None => response,
    }
}

pub fn drain(events: &mut mpsc::UnboundedReceiver<TransactionEvent>) -> Vec<TransactionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// States reported for `id`, in order
pub fn states_of(events: &[TransactionEvent], id: TransactionId) -> Vec<TransactionState> {
    events
        .iter()
        .filter_map(|event| match event {
            TransactionEvent::StateChanged { id: event_id, state, .. } if *event_id == id => {
                Some(*state)
            }
            _ => None,
        })
        .collect()
}

pub fn last_reason(events: &[TransactionEvent], id: TransactionId) -> Option<StateChangeReason> {
    events.iter().rev().find_map(|event| match event {
        TransactionEvent::StateChanged { id: event_id, reason, .. } if *event_id == id => {
            Some(*reason)
        }
        _ => None,
    })
}

/// Lets time pass on a paused clock and gives spawned timers a chance to run
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
