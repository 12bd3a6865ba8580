use onchess_ledger::codec::{self, MAX_ENCODABLE_ID};
use onchess_ledger::{
    accept_rematch, AuthorizationError, EndReason, Identity, LedgerError, LedgerSettings,
    RematchOffer, SelfJoinPolicy, SessionLedger, Side, SyncAgent, SyncConfig, Transition,
    ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const FEN_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

fn ledger(rate: u128) -> Arc<SessionLedger> {
    let mut settings = LedgerSettings::new(id("owner"));
    settings.fee_rate = rate;
    settings.self_join = SelfJoinPolicy::Reject;
    Arc::new(SessionLedger::new(settings))
}

fn fast() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(20),
        backoff_initial: Duration::from_millis(5),
        backoff_max: Duration::from_millis(40),
        resubscribe_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_reference_scenario() {
    let ledger = ledger(5);
    let (a, b) = (id("alice"), id("bob"));

    let game = ledger.create_session(a.clone()).await;
    assert_eq!(game, 0);
    let session = ledger.get_session(game).await.unwrap();
    assert_eq!(session.player_b, None);
    assert_eq!(session.turn, Side::A);
    assert!(session.active);

    assert_eq!(ledger.join_session(game, &b).await.unwrap().player_b, Some(b.clone()));

    let after_move = ledger.submit_move(game, &a, "e2", "e4", FEN_E4, 5).await.unwrap();
    assert_eq!(after_move.turn, Side::B);

    assert_eq!(
        ledger.submit_move(game, &a, "d2", "d4", "other", 5).await,
        Err(LedgerError::Validation(ValidationError::NotYourTurn))
    );
    assert_eq!(ledger.get_session(game).await.unwrap(), after_move);

    let ended = ledger.resign(game, &b).await.unwrap();
    assert!(!ended.active);
    assert_eq!(ended.winner, Some(a.clone()));
    assert_eq!(ended.end_reason, Some(EndReason::Resignation));

    assert_eq!(ledger.fee_account().accumulated, 5);
    assert_eq!(
        ledger.withdraw(&a),
        Err(LedgerError::Authorization(AuthorizationError::NotAdmin))
    );
    assert_eq!(ledger.withdraw(&id("owner")), Ok(5));
}

#[tokio::test]
async fn test_rematch_scenario_both_agents_transition_once() {
    let ledger = ledger(0);

    // Game 0 between the same players, already over
    let first = ledger.create_session(id("alice")).await;
    ledger.join_session(first, &id("bob")).await.unwrap();
    ledger.resign(first, &id("alice")).await.unwrap();

    // Alice offers, Bob accepts through the shared code
    let offer = RematchOffer::create(ledger.clone(), &id("alice"), fast())
        .await
        .unwrap();
    assert_eq!(offer.session_id(), 1);
    let code = offer.code().to_string();
    let alice_waiting = tokio::spawn(offer.accepted());

    let mut bob = timeout(
        Duration::from_secs(2),
        accept_rematch(ledger.clone(), &code, &id("bob"), fast()),
    )
    .await
    .unwrap()
    .unwrap();
    let mut alice = timeout(Duration::from_secs(2), alice_waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(alice.session.player_b, Some(id("bob")));
    assert_eq!(bob.session.player_a, id("alice"));

    // A third observer joining late sees the pairing once as well
    let mut late = SyncAgent::spawn(ledger.clone(), 1, fast());
    let first_seen = timeout(Duration::from_secs(2), late.next_transition())
        .await
        .unwrap();
    assert!(matches!(first_seen, Some(Transition::OpponentJoined { .. })));

    // No observer reports the join a second time
    for handle in [&mut alice.handle, &mut bob.handle, &mut late] {
        assert!(timeout(Duration::from_millis(100), handle.next_transition())
            .await
            .is_err());
    }

    // Play continues and both sides see the end
    ledger.submit_move(1, &id("alice"), "e2", "e4", FEN_E4, 0).await.unwrap();
    ledger.resign(1, &id("bob")).await.unwrap();

    for handle in [&mut alice.handle, &mut bob.handle] {
        let mut ended = None;
        while let Some(transition) = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap()
        {
            if let Transition::GameEnded { winner, .. } = transition {
                ended = Some(winner);
            }
        }
        assert_eq!(ended, Some(Some(id("alice"))));
    }
    late.cancel().await;
}

#[test]
fn test_codes_cover_the_supported_range_only() {
    for session_id in [0, 1, 35, 36, 1_295, 46_655, MAX_ENCODABLE_ID] {
        let code = codec::encode(session_id).unwrap();
        assert_eq!(code.as_str().len(), codec::JOIN_CODE_LEN);
        assert_eq!(codec::decode(code.as_str()), Ok(session_id));
    }
    assert_eq!(
        codec::encode(MAX_ENCODABLE_ID + 1),
        Err(ValidationError::CodeUnrepresentable(MAX_ENCODABLE_ID + 1))
    );
}

#[tokio::test]
async fn test_rate_change_applies_to_later_moves() {
    let ledger = ledger(1);
    let game = ledger.create_session(id("alice")).await;
    ledger.join_session(game, &id("bob")).await.unwrap();

    ledger.submit_move(game, &id("alice"), "e2", "e4", FEN_E4, 1).await.unwrap();
    ledger.set_rate(&id("owner"), 3).unwrap();

    assert_eq!(
        ledger.submit_move(game, &id("bob"), "e7", "e5", "p", 1).await,
        Err(LedgerError::Validation(ValidationError::IncorrectFee {
            expected: 3,
            paid: 1
        }))
    );
    ledger.submit_move(game, &id("bob"), "e7", "e5", "p", 3).await.unwrap();
    assert_eq!(ledger.fee_account().accumulated, 4);
}
