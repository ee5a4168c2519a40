/// Server transaction tests (RFC 3261 sections 17.2.1 and 17.2.2, RFC 3262)
///
/// Requests are injected as if they came from a peer at 10.0.0.2 and the
/// responses the engine sends are read back from the mock transport:
///
/// 1. INVITE non-2xx: timer G retransmission, ACK absorption, timer I, timer H
/// 2. INVITE 2xx: the transaction ends and the 2xx belongs to the dialog layer
/// 3. non-INVITE: retransmitted requests get the last response, timer J
/// 4. default handling: 486, 501 and 481 answers, policy rejection
/// 5. merged requests, refused requests, RFC 2543 matching
/// 6. reliable provisional responses and PRACK

mod transaction_test_utils;

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;

use rvoip_transaction_engine::message::{RAck, OPTION_TAG_100REL};
use rvoip_transaction_engine::prelude::*;

use transaction_test_utils::*;

fn only_transaction(env: &TestEnvironment) -> Arc<Transaction> {
    let transactions = env.manager.transactions();
    assert_eq!(transactions.len(), 1, "expected a single live transaction");
    transactions[0].clone()
}

fn server_for(env: &TestEnvironment, method: Method) -> Arc<Transaction> {
    env.manager
        .transactions()
        .into_iter()
        .find(|tx| tx.direction() == Direction::Server && tx.method() == method)
        .expect("server transaction")
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_invite_non_2xx_waits_for_ack() {
    let env = TestEnvironment::new();
    let mut events = env.policy.accept_with_channel(true);
    let invite = peer_invite("z9hG4bK-inv-1", "call-1");
    env.deliver(invite.clone()).unwrap();

    let tx = only_transaction(&env);
    assert_eq!(tx.state(), TransactionState::InviteRequestRcvd);
    assert_eq!(tx.owner_kind(), OwnerKind::Application);
    assert_eq!(tx.destination(), Some(udp(PEER_ADDR)));

    tx.respond(180).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteRequestRcvd);
    let ringing = env.transport.last_response().unwrap();
    assert_eq!(ringing.status, 180);
    assert_eq!(ringing.to_tag().map(str::to_string), tx.local_tag());

    tx.respond(486).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteFinalResponseSent);

    // A retransmitted INVITE gets the final response again
    env.deliver(invite.clone()).unwrap();
    assert_eq!(env.transport.responses_with_status(486).len(), 2);
    assert_eq!(env.manager.transaction_count(), 1);

    // Timer G
    advance(Duration::from_millis(600)).await;
    assert_eq!(env.transport.responses_with_status(486).len(), 3);

    let busy = env.transport.last_response().unwrap();
    env.deliver(peer_ack(&invite, &busy)).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteAckRcvd);

    // Retransmissions stop, further ACKs are absorbed
    advance(Duration::from_secs(2)).await;
    assert_eq!(env.transport.responses_with_status(486).len(), 3);
    env.deliver(peer_ack(&invite, &busy)).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteAckRcvd);

    // Timer I
    advance(Duration::from_secs(5)).await;
    assert!(tx.is_terminated());
    assert_eq!(env.manager.transaction_count(), 0);

    let events = drain(&mut events);
    assert_eq!(
        states_of(&events, tx.id()),
        vec![
            TransactionState::InviteRequestRcvd,
            TransactionState::InviteFinalResponseSent,
            TransactionState::InviteAckRcvd,
            TransactionState::Terminated,
        ]
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_invite_timer_h_gives_up_on_ack() {
    let env = TestEnvironment::new();
    let mut events = env.policy.accept_with_channel(true);
    env.deliver(peer_invite("z9hG4bK-inv-h", "call-h")).unwrap();
    let tx = only_transaction(&env);
    tx.respond(603).unwrap();

    advance(Duration::from_secs(33)).await;
    assert!(tx.is_terminated());
    assert_eq!(
        last_reason(&drain(&mut events), tx.id()),
        Some(StateChangeReason::TimeOut)
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_invite_2xx_ends_the_transaction() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    let invite = peer_invite("z9hG4bK-inv-ok", "call-ok");
    env.deliver(invite.clone()).unwrap();
    let tx = only_transaction(&env);

    tx.send_response(Response::for_request(&invite, 200).with_contact("sip:bob@127.0.0.1:5060"))
        .unwrap();
    assert!(tx.is_terminated());
    assert_eq!(env.manager.transaction_count(), 0);

    // The ACK for the 2xx matches nothing
    let ok = env.transport.last_response().unwrap();
    let mut ack = peer_ack(&invite, &ok);
    ack.headers.via[0].branch = Some("z9hG4bK-ack-2xx".to_string());
    env.deliver(ack).unwrap();
    assert_eq!(env.policy.out_of_context_count(), 1);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_non_invite_retransmission_and_timer_j() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    let request = peer_request(Method::Options, "z9hG4bK-opt", "call-opt", 1);
    env.deliver(request.clone()).unwrap();
    let tx = only_transaction(&env);
    assert_eq!(tx.state(), TransactionState::GenRequestRcvd);

    // Nothing to resend before the first response
    env.deliver(request.clone()).unwrap();
    assert!(env.transport.sent_responses().is_empty());

    tx.respond(200).unwrap();
    assert_eq!(tx.state(), TransactionState::GenFinalResponseSent);
    env.deliver(request.clone()).unwrap();
    assert_eq!(env.transport.responses_with_status(200).len(), 2);

    assert!(matches!(tx.respond(200), Err(Error::IllegalState { .. })));

    advance(Duration::from_secs(33)).await;
    assert!(tx.is_terminated());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_reliable_transport_terminates_at_once() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    let request = peer_request(Method::Options, "z9hG4bK-opt-tcp", "call-tcp", 1);
    env.manager
        .receive_message(request.into(), env.from_peer_tcp())
        .unwrap();
    let tx = only_transaction(&env);
    tx.respond(200).unwrap();
    assert!(tx.is_terminated());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_default_answers() {
    let env = TestEnvironment::new();

    env.deliver(peer_invite("z9hG4bK-d1", "call-d1")).unwrap();
    env.deliver(peer_request(Method::Options, "z9hG4bK-d2", "call-d2", 1))
        .unwrap();
    let mut in_dialog = peer_request(Method::Info, "z9hG4bK-d3", "call-d3", 5);
    in_dialog.headers.to = Some(Party::new("sip:bob@example.com").with_tag("gone"));
    env.deliver(in_dialog).unwrap();

    let statuses: Vec<u16> = env.transport.sent_responses().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![486, 501, 481]);

    // An in-dialog request keeps the To tag it came with
    let last = env.transport.last_response().unwrap();
    assert_eq!(last.to_tag(), Some("gone"));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_policy_rejects_with_code() {
    let env = TestEnvironment::new();
    env.policy.reject_with(403);
    env.deliver(peer_request(Method::Message, "z9hG4bK-rej", "call-rej", 1))
        .unwrap();

    let response = env.transport.last_response().unwrap();
    assert_eq!(response.status, 403);
    assert!(response.to_tag().is_some());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_merged_request_gets_482() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    env.deliver(peer_invite("z9hG4bK-path-a", "call-merge")).unwrap();
    env.deliver(peer_invite("z9hG4bK-path-b", "call-merge")).unwrap();

    assert_eq!(env.manager.transaction_count(), 1);
    let response = env.transport.last_response().unwrap();
    assert_eq!(response.status, 482);
    assert_eq!(response.branch(), Some("z9hG4bK-path-b"));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_merging_can_be_disabled() {
    let config = TransactionConfig {
        disable_merging: true,
        ..Default::default()
    };
    let env = TestEnvironment::with_config(config);
    let _events = env.policy.accept_with_channel(true);
    env.deliver(peer_invite("z9hG4bK-path-a", "call-merge")).unwrap();
    env.deliver(peer_invite("z9hG4bK-path-b", "call-merge")).unwrap();
    assert_eq!(env.manager.transaction_count(), 2);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_refused_request_is_out_of_context() {
    let env = TestEnvironment::new();
    env.policy.refuse_new_requests();
    env.deliver(peer_invite("z9hG4bK-refused", "call-refused")).unwrap();
    assert_eq!(env.manager.transaction_count(), 0);
    assert_eq!(env.policy.out_of_context_count(), 1);
    assert!(env.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_rfc2543_ack_matches_owner_supplied_tag() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    let mut invite = peer_invite("ignored", "call-2543");
    invite.headers.via[0].branch = None;
    env.deliver(invite.clone()).unwrap();
    let tx = only_transaction(&env);

    // A retransmission without branch still matches on tags and CSeq
    env.deliver(invite.clone()).unwrap();
    assert_eq!(env.manager.transaction_count(), 1);

    tx.send_response(Response::for_request(&invite, 480).with_to_tag("owner-tag"))
        .unwrap();
    assert_eq!(tx.local_tag().as_deref(), Some("owner-tag"));

    let response = env.transport.last_response().unwrap();
    let mut wrong = peer_ack(&invite, &response);
    wrong.headers.to = Some(Party::new("sip:bob@example.com").with_tag("someone-else"));
    env.deliver(wrong).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteFinalResponseSent);

    env.deliver(peer_ack(&invite, &response)).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteAckRcvd);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_response_validation() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    env.deliver(peer_invite("z9hG4bK-val", "call-val")).unwrap();
    let tx = only_transaction(&env);

    assert!(matches!(tx.respond(99), Err(Error::InvalidArgument(_))));
    assert!(matches!(tx.respond(700), Err(Error::InvalidArgument(_))));
    assert!(matches!(tx.ack(), Err(Error::IllegalState { .. })));
    assert!(matches!(tx.cancel(), Err(Error::IllegalState { .. })));
    assert_eq!(tx.state(), TransactionState::InviteRequestRcvd);
}

fn invite_with_100rel(branch: &str, call_id: &str) -> Request {
    let mut invite = peer_invite(branch, call_id);
    invite.headers.supported.push(OPTION_TAG_100REL.to_string());
    invite
}

fn prack_for(invite: &Request, provisional: &Response, rseq: u32) -> Request {
    let mut prack = peer_request(Method::Prack, "z9hG4bK-prack", invite.call_id().unwrap(), 2);
    prack.headers.to = provisional.headers.to.clone();
    prack.headers.rack = Some(RAck {
        rseq,
        cseq: invite.cseq().unwrap().seq,
        method: Method::Invite,
    });
    prack
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_reliable_provisional_until_prack() {
    let env = TestEnvironment::new();
    let mut events = env.policy.accept_with_channel(true);
    let invite = invite_with_100rel("z9hG4bK-rel", "call-rel");
    env.deliver(invite.clone()).unwrap();
    let tx = only_transaction(&env);

    tx.respond_reliable(183).unwrap();
    assert_eq!(tx.state(), TransactionState::InviteRelProvResponseSent);
    let progress = env.transport.last_response().unwrap();
    assert!(progress.is_reliable_provisional());
    let rseq = progress.headers.rseq.unwrap();

    // Only one reliable provisional response may be outstanding
    assert!(matches!(tx.respond(180), Err(Error::IllegalState { .. })));

    advance(Duration::from_millis(600)).await;
    assert_eq!(env.transport.responses_with_status(183).len(), 2);

    env.deliver(prack_for(&invite, &progress, rseq)).unwrap();
    assert_eq!(tx.state(), TransactionState::InvitePrackCompleted);

    let prack_ok = env.transport.last_response().unwrap();
    assert_eq!(prack_ok.status, 200);
    assert_eq!(prack_ok.cseq().map(|c| c.method.clone()), Some(Method::Prack));

    advance(Duration::from_secs(4)).await;
    assert_eq!(env.transport.responses_with_status(183).len(), 2);

    // The next reliable response carries the next RSeq
    tx.respond_reliable(180).unwrap();
    assert_eq!(env.transport.last_response().unwrap().headers.rseq, Some(rseq + 1));

    let events = drain(&mut events);
    assert!(states_of(&events, tx.id()).contains(&TransactionState::InvitePrackCompleted));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_prack_with_wrong_rseq_gets_481() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    let invite = invite_with_100rel("z9hG4bK-rel-2", "call-rel-2");
    env.deliver(invite.clone()).unwrap();
    let tx = server_for(&env, Method::Invite);
    tx.respond_reliable(183).unwrap();
    let progress = env.transport.last_response().unwrap();
    let rseq = progress.headers.rseq.unwrap();

    env.deliver(prack_for(&invite, &progress, rseq.wrapping_add(7))).unwrap();
    assert_eq!(env.transport.last_response().unwrap().status, 481);
    assert_eq!(tx.state(), TransactionState::InviteRelProvResponseSent);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_reliable_provisional_needs_peer_support() {
    let env = TestEnvironment::new();
    let _events = env.policy.accept_with_channel(true);
    env.deliver(peer_invite("z9hG4bK-norel", "call-norel")).unwrap();
    let tx = only_transaction(&env);
    assert!(matches!(tx.respond_reliable(183), Err(Error::Unsupported(_))));
    assert!(matches!(tx.respond_reliable(200), Err(Error::InvalidArgument(_)) | Err(Error::Unsupported(_))));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_unacknowledged_reliable_provisional_times_out() {
    let env = TestEnvironment::new();
    let mut events = env.policy.accept_with_channel(true);
    env.deliver(invite_with_100rel("z9hG4bK-rel-to", "call-rel-to")).unwrap();
    let tx = only_transaction(&env);
    tx.respond_reliable(183).unwrap();

    advance(Duration::from_secs(33)).await;
    assert!(tx.is_terminated());
    assert_eq!(
        last_reason(&drain(&mut events), tx.id()),
        Some(StateChangeReason::RelProvResponseTimeout)
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_response_send_failure_terminates() {
    let env = TestEnvironment::new();
    let mut events = env.policy.accept_with_channel(true);
    env.deliver(peer_invite("z9hG4bK-unreachable", "call-unreachable"))
        .unwrap();
    let tx = only_transaction(&env);
    env.transport.fail_address(addr(PEER_ADDR));

    assert!(matches!(tx.respond(486), Err(Error::Transport(_))));
    assert!(tx.is_terminated());
    assert_eq!(
        last_reason(&drain(&mut events), tx.id()),
        Some(StateChangeReason::NetworkError)
    );
    assert_eq!(env.manager.transaction_count(), 0);

    // Nothing more can be sent
    assert!(matches!(tx.respond(486), Err(Error::Terminated)));
}
