//! Timer identifiers and durations.
//!
//! The base retransmission interval (T1) is 500ms, doubling with each
//! retransmission up to T2 for non-INVITE requests and INVITE responses.
//! Reliable transports skip retransmission and linger timers entirely.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A SIP transaction timer.
///
/// Letters follow RFC 3261 section 17; the remaining variants cover engine
/// timers that the RFC leaves to the transaction user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// INVITE request retransmission (client)
    A,
    /// INVITE transaction timeout (client)
    B,
    /// Wait for response retransmissions after ACKing a non-2xx (client)
    D,
    /// Non-INVITE request retransmission (client)
    E,
    /// Non-INVITE transaction timeout (client)
    F,
    /// INVITE final response retransmission (server)
    G,
    /// Wait for ACK (server)
    H,
    /// Absorb ACK retransmissions (server)
    I,
    /// Absorb request retransmissions after a non-INVITE final response (server)
    J,
    /// Absorb response retransmissions after a non-INVITE final response (client)
    K,
    /// No final response arrived while proceeding
    ProvisionalTimeout,
    /// No final response arrived after sending CANCEL
    CancelTimeout,
    /// Reliable provisional response retransmission (RFC 3262)
    ReliableProvisional,
    /// No PRACK arrived for a reliable provisional response
    ReliableProvisionalTimeout,
    /// Owner never acknowledged a final INVITE response
    AwaitAck,
    /// Window for forked 2xx responses after ACKing a 2xx
    ForkWindow,
    /// Lifetime of a proxy forwarding 2xx responses
    Proxy2xx,
}

impl TimerType {
    /// Whether expiry resends a message rather than moving the state machine
    pub fn is_retransmission(&self) -> bool {
        matches!(
            self,
            TimerType::A | TimerType::E | TimerType::G | TimerType::ReliableProvisional
        )
    }
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerType::A => write!(f, "A"),
            TimerType::B => write!(f, "B"),
            TimerType::D => write!(f, "D"),
            TimerType::E => write!(f, "E"),
            TimerType::F => write!(f, "F"),
            TimerType::G => write!(f, "G"),
            TimerType::H => write!(f, "H"),
            TimerType::I => write!(f, "I"),
            TimerType::J => write!(f, "J"),
            TimerType::K => write!(f, "K"),
            TimerType::ProvisionalTimeout => write!(f, "ProvisionalTimeout"),
            TimerType::CancelTimeout => write!(f, "CancelTimeout"),
            TimerType::ReliableProvisional => write!(f, "ReliableProvisional"),
            TimerType::ReliableProvisionalTimeout => write!(f, "ReliableProvisionalTimeout"),
            TimerType::AwaitAck => write!(f, "AwaitAck"),
            TimerType::ForkWindow => write!(f, "ForkWindow"),
            TimerType::Proxy2xx => write!(f, "Proxy2xx"),
        }
    }
}

/// Timer durations used by every transaction of a manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// **T1: RTT estimate (default 500 ms).** Initial retransmission interval.
    pub t1: Duration,

    /// **T2: maximum retransmission interval (default 4 s).**
    pub t2: Duration,

    /// **T4: maximum message lifetime in the network (default 5 s).**
    pub t4: Duration,

    /// Timers B and F (default 64 * T1)
    pub transaction_timeout: Duration,

    /// Timer D (default 32 s)
    pub wait_time_d: Duration,

    /// Timer H (default 64 * T1)
    pub wait_time_h: Duration,

    /// Timer I (default T4)
    pub wait_time_i: Duration,

    /// Timer J (default 64 * T1)
    pub wait_time_j: Duration,

    /// Timer K (default T4)
    pub wait_time_k: Duration,

    /// Limit on the proceeding phase of a client INVITE. `None` waits forever.
    pub provisional_timeout: Option<Duration>,

    /// Wait for a final response to an INVITE after sending CANCEL
    pub cancel_invite_timeout: Duration,

    /// Wait for a final response to a non-INVITE after sending CANCEL
    pub cancel_general_timeout: Duration,

    /// Give up on a reliable provisional response without PRACK (default 64 * T1)
    pub reliable_provisional_timeout: Duration,

    /// Keep a client INVITE alive after ACKing a 2xx to catch forked answers
    pub fork_window: Duration,
}

impl TimerSettings {
    /// Next retransmission interval after `current`, capped at T2 when `capped`
    pub fn next_interval(&self, current: Duration, capped: bool) -> Duration {
        let doubled = current.saturating_mul(2);
        if capped { doubled.min(self.t2) } else { doubled }
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            transaction_timeout: Duration::from_secs(32), // 64 * T1
            wait_time_d: Duration::from_secs(32),
            wait_time_h: Duration::from_secs(32),         // 64 * T1
            wait_time_i: Duration::from_secs(5),          // T4
            wait_time_j: Duration::from_secs(32),         // 64 * T1
            wait_time_k: Duration::from_secs(5),          // T4
            provisional_timeout: None,
            cancel_invite_timeout: Duration::from_secs(32),
            cancel_general_timeout: Duration::from_secs(32),
            reliable_provisional_timeout: Duration::from_secs(32),
            fork_window: Duration::from_secs(32),
        }
    }
}
