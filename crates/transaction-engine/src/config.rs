//! Manager-wide configuration.

use serde::{Deserialize, Serialize};

use crate::timer::TimerSettings;

/// Settings shared by a [`TransactionManager`](crate::TransactionManager)
/// and every transaction it creates.
///
/// ```
/// use rvoip_transaction_engine::TransactionConfig;
///
/// let config: TransactionConfig = serde_json::from_str(r#"{ "is_proxy": true }"#).unwrap();
/// assert!(config.is_proxy);
/// assert_eq!(config.max_transactions, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub timers: TimerSettings,

    /// Upper bound on live transactions; creation beyond it fails with
    /// `OutOfResources`
    pub max_transactions: usize,

    /// Max-Forwards placed on requests that carry none
    pub max_forwards: u8,

    /// Length of generated To tags
    pub local_tag_length: usize,

    /// Proxy behavior: 2xx pass-through states, CANCEL left to the owner
    pub is_proxy: bool,

    /// The owner sends PRACKs and answers received PRACKs itself
    pub manual_prack: bool,

    /// The owner answers a cancelled INVITE itself instead of the automatic 487
    pub manual_cancel_response: bool,

    /// Report an expired provisional timeout as `InviteProceedingTimeout`
    /// instead of terminating the INVITE
    pub enable_proceeding_timeout_state: bool,

    /// Skip merged-request detection (RFC 3261 section 8.2.2.2)
    pub disable_merging: bool,

    /// Answer a CANCEL that matches nothing with a stateless 481
    pub reject_unmatched_cancel: bool,

    /// Accept and send reliable provisional responses (RFC 3262)
    pub support_100rel: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            max_transactions: 10_000,
            max_forwards: 70,
            local_tag_length: 10,
            is_proxy: false,
            manual_prack: false,
            manual_cancel_response: false,
            enable_proceeding_timeout_state: false,
            disable_merging: false,
            reject_unmatched_cancel: true,
            support_100rel: true,
        }
    }
}
