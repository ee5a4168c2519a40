use std::fmt;

/// State of a transaction.
///
/// The machine has one branch per role and method family. The common states
/// serve generic (non-INVITE) requests on both sides; INVITE, CANCEL and PRACK
/// add their own states on top.
///
/// ```text
///  client generic           client INVITE                   server INVITE
///
///     Idle                      Idle                           Idle
///       |request                  |request                       |INVITE
///       v                         v                              v
///  GenRequestSent             InviteCalling                 InviteRequestRcvd
///       |1xx                      |1xx                           |reliable 1xx
///       v                         v                              v
///  GenProceeding              InviteProceeding          InviteRelProvResponseSent
///       |final                    |final                         |PRACK
///       v                         v                              v
///  GenFinalResponseRcvd       InviteFinalResponseRcvd      InvitePrackCompleted
///       |                         |ack()                         |final
///       v                         v                              v
///   Terminated                InviteAckSent               InviteFinalResponseSent
///                                 |                              |ACK
///                                 v                              v
///                             Terminated                     InviteAckRcvd
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created, nothing sent or received yet
    Idle,
    /// Not determined (reported for transactions that were never started)
    Undefined,
    Terminated,

    // Client, generic requests
    GenRequestSent,
    GenProceeding,
    GenFinalResponseRcvd,
    GenCancelling,

    // Client, INVITE
    InviteCalling,
    InviteProceeding,
    /// The proceeding phase ran out of time and the owner must decide
    InviteProceedingTimeout,
    InviteCancelling,
    InviteFinalResponseRcvd,
    InviteAckSent,
    InviteProxy2xxResponseRcvd,

    // Client, CANCEL
    CancelSent,
    CancelProceeding,
    CancelFinalResponseRcvd,

    /// Client send failed or a 503 arrived; failover is possible from here
    MsgSendFailure,

    // Server, generic requests
    GenRequestRcvd,
    GenFinalResponseSent,

    // Server, INVITE
    InviteRequestRcvd,
    InviteRelProvResponseSent,
    InvitePrackCompleted,
    InviteFinalResponseSent,
    InviteAckRcvd,
    InviteProxy2xxResponseSent,

    // Server, CANCEL
    CancelRequestRcvd,
    CancelFinalResponseSent,

    // Server, PRACK
    PrackFinalResponseSent,
}

impl TransactionState {
    pub fn is_terminated(&self) -> bool {
        *self == TransactionState::Terminated
    }

    /// A server transaction that has received its request but not answered it
    pub fn awaits_final_response(&self) -> bool {
        matches!(
            self,
            TransactionState::GenRequestRcvd
                | TransactionState::InviteRequestRcvd
                | TransactionState::InviteRelProvResponseSent
                | TransactionState::InvitePrackCompleted
                | TransactionState::CancelRequestRcvd
        )
    }

    /// A client transaction still waiting for its final response
    pub fn awaits_response(&self) -> bool {
        matches!(
            self,
            TransactionState::GenRequestSent
                | TransactionState::GenProceeding
                | TransactionState::GenCancelling
                | TransactionState::InviteCalling
                | TransactionState::InviteProceeding
                | TransactionState::InviteProceedingTimeout
                | TransactionState::InviteCancelling
                | TransactionState::CancelSent
                | TransactionState::CancelProceeding
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a state change happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChangeReason {
    Undefined,
    /// An API call made by the owner
    UserCommand,
    /// An action the engine took on its own
    TransactionCommand,
    NormalTermination,
    /// The transport failed to deliver a message
    NetworkError,
    TimeOut,
    OutOfResources,
    /// The exchange was cancelled by a CANCEL request
    TransactionCancelled,
    RequestReceived,
    ProvisionalResponseReceived,
    ResponseSuccessfulReceived,
    ResponseRedirectionReceived,
    ResponseRequestFailureReceived,
    ResponseServerFailureReceived,
    ResponseGlobalFailureReceived,
    Received503,
    AckReceived,
    PrackReceived,
    /// The transaction was replaced by a clone targeting the next address
    ContinueDns,
    RelProvResponseTimeout,
    Error,
}

impl StateChangeReason {
    /// Reason reported for a response with `status`
    pub fn for_response(status: u16) -> Self {
        match status {
            100..=199 => StateChangeReason::ProvisionalResponseReceived,
            200..=299 => StateChangeReason::ResponseSuccessfulReceived,
            300..=399 => StateChangeReason::ResponseRedirectionReceived,
            400..=499 => StateChangeReason::ResponseRequestFailureReceived,
            500..=599 => StateChangeReason::ResponseServerFailureReceived,
            _ => StateChangeReason::ResponseGlobalFailureReceived,
        }
    }
}

impl fmt::Display for StateChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_for_response() {
        assert_eq!(
            StateChangeReason::for_response(180),
            StateChangeReason::ProvisionalResponseReceived
        );
        assert_eq!(
            StateChangeReason::for_response(302),
            StateChangeReason::ResponseRedirectionReceived
        );
        assert_eq!(
            StateChangeReason::for_response(603),
            StateChangeReason::ResponseGlobalFailureReceived
        );
    }

    #[test]
    fn test_state_groups() {
        assert!(TransactionState::InviteRelProvResponseSent.awaits_final_response());
        assert!(!TransactionState::InviteFinalResponseSent.awaits_final_response());
        assert!(TransactionState::InviteCancelling.awaits_response());
        assert!(!TransactionState::MsgSendFailure.awaits_response());
        assert_eq!(TransactionState::InviteAckRcvd.to_string(), "InviteAckRcvd");
    }
}
