//! SIP transaction engine for the rvoip stack
//!
//! This crate implements the transaction layer of RFC 3261 section 17, with
//! the CANCEL rules of section 9 and reliable provisional responses from
//! RFC 3262. A [`TransactionManager`] matches every message the transport
//! delivers to a [`Transaction`], runs the transaction state machines and
//! their timers, and reports progress to each transaction's
//! [`TransactionOwner`] through synchronous callbacks.
//!
//! Callbacks run with the transaction's lock released, so an owner may call
//! back into the transaction (respond, cancel, terminate) from inside any
//! callback. A transaction terminated from a callback reports
//! [`Error::Destructed`] to the code that triggered the callback.
//!
//! ## Modules
//!
//! - [`transaction`]: the transaction, its key, states and owner callbacks
//! - [`manager`]: the table, inbound matching and the manager policy
//! - [`timer`]: RFC 3261 timers and their settings
//! - [`message`]: the SIP message model the engine works on
//! - [`transport`]: the transport seam the engine sends through
//! - [`auth`]: server-side digest credential checking
//!
//! Client operations live in `client`, server operations in `server`, and the
//! CANCEL and PRACK methods in `method`; all of them are methods on
//! [`Transaction`].

mod client;
pub mod auth;
pub mod config;
pub mod error;
pub mod manager;
pub mod message;
mod method;
mod server;
pub mod timer;
pub mod transaction;
pub mod transport;
pub mod utils;

pub use auth::{AuthAction, Authenticator, Challenge, Credentials};
pub use config::TransactionConfig;
pub use error::{Error, Result};
pub use manager::{
    DefaultPolicy, ManagerPolicy, TransactionDisposition, TransactionManager,
    TransactionManagerBuilder,
};
pub use message::{Message, Method, Party, Request, Response, Uri, Via};
pub use timer::{TimerSettings, TimerType};
pub use transaction::{
    ChannelOwner, Direction, NoOwner, OwnerKind, StateChangeReason, Transaction, TransactionEvent,
    TransactionId, TransactionKey, TransactionOwner, TransactionState,
};
pub use transport::{InboundContext, ResolvedAddress, Transport, TransportError, TransportKind};

/// Error type alias for users that import several crates' errors
pub type TransactionError = Error;

pub mod prelude {
    pub use crate::auth::{AuthAction, Authenticator, Challenge, Credentials};
    pub use crate::config::TransactionConfig;
    pub use crate::error::{Error, Result};
    pub use crate::manager::{
        DefaultPolicy, ManagerPolicy, TransactionDisposition, TransactionManager,
        TransactionManagerBuilder,
    };
    pub use crate::message::{Headers, Message, Method, Party, Request, Response, Uri, Via};
    pub use crate::transaction::{
        ChannelOwner, Direction, NoOwner, OwnerKind, PrackParameters, StateChangeReason,
        Transaction, TransactionEvent, TransactionId, TransactionKey, TransactionOwner,
        TransactionState,
    };
    pub use crate::transport::{
        ConnectionInfo, InboundContext, ResolvedAddress, SendReceipt, Transport, TransportError,
        TransportKind,
    };
}
