//! Transport collaborator boundary.
//!
//! The engine never touches sockets. It asks a [`Transport`] to resolve the
//! candidate destinations of a request and to send an encoded message to one
//! of them. Calls into the transport are made with the transaction guard
//! released.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Message, Request};

/// Transport protocol of a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Sctp,
}

impl TransportKind {
    /// Reliable transports do not need retransmissions or lingering states
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportKind::Udp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Sctp => "SCTP",
        };
        f.write_str(name)
    }
}

/// One candidate destination produced by address resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub addr: SocketAddr,
    pub transport: TransportKind,
}

impl ResolvedAddress {
    pub fn new(addr: SocketAddr, transport: TransportKind) -> Self {
        Self { addr, transport }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.transport)
    }
}

/// Connection a message went out on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    pub id: u64,
    pub remote: SocketAddr,
    pub transport: TransportKind,
}

/// Result of a successful send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Set for connection oriented transports
    pub connection: Option<ConnectionInfo>,
    /// Whether the connection was opened for this message
    pub new_connection: bool,
}

/// Where an inbound message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundContext {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub transport: TransportKind,
}

impl InboundContext {
    pub fn new(local: SocketAddr, remote: SocketAddr, transport: TransportKind) -> Self {
        Self {
            local,
            remote,
            transport,
        }
    }

    /// Destination for responses to a request received in this context
    pub fn reply_address(&self) -> ResolvedAddress {
        ResolvedAddress::new(self.remote, self.transport)
    }
}

/// Error types reported by the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to send message to the specified address
    #[error("Failed to send message to {0}: {1}")]
    SendFailed(SocketAddr, String),

    /// Destination refused or unreachable
    #[error("Destination unreachable: {0}")]
    Unreachable(SocketAddr),

    /// Address resolution failed
    #[error("DNS resolution failed: {0}")]
    ResolutionFailed(String),

    /// Transport is closed
    #[error("Transport closed")]
    Closed,
}

/// Network side of the engine
pub trait Transport: Send + Sync {
    /// Resolves the ordered candidate destinations for a request
    fn resolve(&self, request: &Request) -> Result<Vec<ResolvedAddress>, TransportError>;

    /// Sends one message to one destination
    fn send(
        &self,
        message: &Message,
        destination: &ResolvedAddress,
    ) -> Result<SendReceipt, TransportError>;

    /// host[:port] to place in the Via sent-by of requests using `transport`
    fn sent_by(&self, transport: TransportKind) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability() {
        assert!(!TransportKind::Udp.is_reliable());
        assert!(TransportKind::Tcp.is_reliable());
        assert!(TransportKind::Tls.is_reliable());
    }

    #[test]
    fn test_reply_address() {
        let ctx = InboundContext::new(
            "127.0.0.1:5060".parse().unwrap(),
            "127.0.0.1:5070".parse().unwrap(),
            TransportKind::Tcp,
        );
        assert_eq!(ctx.reply_address().to_string(), "127.0.0.1:5070/TCP");
    }
}
