use super::*;
use crate::config::Config;
use crate::judge::{JudgeVerdict, MockJudge};
use crate::store::MemoryStore;
use shared::{Position, ProfileView, Role, ServerMessage, SubjectView};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use toron_core::clock::FakeClock;
use toron_core::judgment::SideVerdict;

struct Harness {
    app: Arc<AppState>,
    store: Arc<MemoryStore>,
    clock: Arc<FakeClock>,
}

fn subject() -> SubjectView {
    SubjectView {
        id: "s1".to_string(),
        title: "인공지능은 인간의 일자리를 대체할 것이다".to_string(),
        body: "찬성과 반대로 나뉘어 토론합니다.".to_string(),
    }
}

fn judge_verdict(agree: u32, disagree: u32, winner: &str) -> JudgeVerdict {
    JudgeVerdict {
        agree: SideVerdict {
            score: agree,
            good: "좋았던 점".to_string(),
            bad: "아쉬운 점".to_string(),
        },
        disagree: SideVerdict {
            score: disagree,
            good: "좋았던 점".to_string(),
            bad: "아쉬운 점".to_string(),
        },
        winner: winner.to_string(),
    }
}

fn harness_with_judge(judge: MockJudge) -> Harness {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject()]));
    let clock = Arc::new(FakeClock::new(0));
    let app = Arc::new(AppState::new(
        Config::for_tests(),
        store.clone(),
        Arc::new(judge),
        clock.clone(),
    ));
    Harness { app, store, clock }
}

fn harness() -> Harness {
    harness_with_judge(MockJudge::new())
}

fn connect(app: &AppState, conn_id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    app.fanout.register(conn_id, tx);
    rx
}

async fn expect_msg_timeout(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_millis(2_000), rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Channel closed")
}

/// Discards queued messages until `pred` matches.
async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<ServerMessage>, mut pred: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    loop {
        let msg = expect_msg_timeout(rx).await;
        if pred(&msg) {
            return msg;
        }
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        seen.push(msg);
    }
    seen
}

async fn seed_player(h: &Harness, user_id: &str, name: &str, is_admin: bool) {
    h.store
        .seed_profile(ProfileView {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
            rating: 1_500.0,
            wins: 0,
            loses: 0,
            is_admin,
            avatar_url: None,
        })
        .await;
}

fn only_room_id(app: &AppState) -> String {
    app.rooms
        .iter()
        .next()
        .expect("a room should exist")
        .key()
        .clone()
}

/// Creates a room for u1/u2, picks positions, readies both and walks the
/// pair into the first speaking turn.
async fn setup_match(
    h: &Harness,
) -> (
    String,
    mpsc::UnboundedReceiver<ServerMessage>,
    mpsc::UnboundedReceiver<ServerMessage>,
) {
    let mut rx1 = connect(&h.app, "c1");
    let mut rx2 = connect(&h.app, "c2");
    seed_player(h, "u1", "철수", false).await;
    seed_player(h, "u2", "영희", false).await;

    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);
    h.app.handle_join_room("c2", &room_id, "u2").await;

    h.app
        .handle_select_position("c1", &room_id, "u1", Some(Position::Agree))
        .await;
    h.app
        .handle_select_position("c2", &room_id, "u2", Some(Position::Disagree))
        .await;
    h.app.handle_player_ready("c1", &room_id, "u1").await;
    h.app.handle_player_ready("c2", &room_id, "u2").await;
    wait_for(&mut rx2, |m| matches!(m, ServerMessage::BattleStart { .. })).await;

    h.app.handle_join_discussion_room("c1", &room_id, "u1").await;
    h.app.handle_join_discussion_room("c2", &room_id, "u2").await;
    h.app
        .clone()
        .handle_discussion_view_ready("c1", &room_id, "u1")
        .await;
    h.app
        .clone()
        .handle_discussion_view_ready("c2", &room_id, "u2")
        .await;

    // First turn opens after the settling delay.
    wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::TurnInfo { stage: 1, .. })
    })
    .await;
    drain(&mut rx1);
    (room_id, rx1, rx2)
}

/// The nine-turn script of the protocol, in speaking order.
fn protocol_script() -> [(&'static str, &'static str, &'static str); 9] {
    [
        ("c1", "u1", "A1"),
        ("c2", "u2", "D1"),
        ("c2", "u2", "D2"),
        ("c1", "u1", "A2"),
        ("c2", "u2", "D3"),
        ("c1", "u1", "A3"),
        ("c2", "u2", "D4"),
        ("c1", "u1", "A4"),
        ("c2", "u2", "D5"),
    ]
}

#[tokio::test]
async fn test_happy_path_without_referee() {
    let h = harness_with_judge(MockJudge::with_verdict(judge_verdict(80, 70, "agree")));
    let (room_id, mut rx1, mut rx2) = setup_match(&h).await;

    for (conn, user, text) in protocol_script() {
        h.app
            .clone()
            .handle_send_message(conn, &room_id, user, text)
            .await;
    }

    let result = wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::BattleResult { .. })
    })
    .await;
    let ServerMessage::BattleResult { verdict } = result else {
        unreachable!();
    };
    assert_eq!(verdict.winner_user_id, "u1");
    assert_eq!(verdict.agree.score, 80);
    assert_eq!(verdict.disagree.score, 70);

    // The judge narration reached the room as a judge message.
    wait_for(&mut rx1, |m| {
        matches!(m, ServerMessage::AiJudgeMessage { stage: 10, .. })
    })
    .await;

    let battles = h.store.battles().await;
    assert_eq!(battles.len(), 1);
    assert_eq!(battles[0].winner_id, "u1");
    assert_eq!(battles[0].player1, "u1");
    assert_eq!(battles[0].player2, "u2");
    assert!(battles[0].log_json.contains("A1"));

    let winner = h.store.profile("u1").await.unwrap();
    let loser = h.store.profile("u2").await.unwrap();
    assert!(winner.rating > 1_500.0);
    assert!(loser.rating < 1_500.0);
    // Equal starting ratings move by the same magnitude.
    let winner_delta = winner.rating - 1_500.0;
    let loser_delta = 1_500.0 - loser.rating;
    assert!((winner_delta - loser_delta).abs() < 1e-9);
    assert_eq!(winner.wins, 1);
    assert_eq!(loser.loses, 1);

    // The match is torn down.
    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    assert!(room.battle.is_none());
    assert!(room.is_completed);
}

#[tokio::test]
async fn test_penalty_forfeit_after_six_overflows() {
    let h = harness();
    let (_room_id, mut rx1, mut rx2) = setup_match(&h).await;

    // The agree speaker never sends. Each advance past a budget boundary
    // yields exactly one penalty from the match ticker.
    h.clock.advance(120_001);
    for _ in 0..6 {
        let msg = wait_for(&mut rx2, |m| {
            matches!(m, ServerMessage::PenaltyApplied { .. })
        })
        .await;
        let ServerMessage::PenaltyApplied { user_id, .. } = &msg else {
            unreachable!();
        };
        assert_eq!(user_id, "u1");
        h.clock.advance(30_001);
    }

    let result = wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::BattleResult { .. })
    })
    .await;
    let ServerMessage::BattleResult { verdict } = result else {
        unreachable!();
    };
    assert_eq!(verdict.winner_user_id, "u2");
    assert_eq!(verdict.disagree.score, 100);
    assert_eq!(verdict.agree.score, 0);

    // Exactly one record and one set of rating updates.
    let battles = h.store.battles().await;
    assert_eq!(battles.len(), 1);
    assert_eq!(battles[0].winner_id, "u2");
    let winner = h.store.profile("u2").await.unwrap();
    let loser = h.store.profile("u1").await.unwrap();
    assert_eq!(winner.wins, 1);
    assert_eq!(loser.loses, 1);
    assert!(winner.rating > 1_500.0);

    // The forfeited side also saw the judge's notice before the result.
    let seen = drain(&mut rx1);
    assert!(seen.iter().any(|m| matches!(
        m,
        ServerMessage::MessagesUpdated { messages }
            if messages.iter().any(|msg| msg.text.contains("몰수패"))
    )));
}

#[tokio::test]
async fn test_client_reported_overflow_is_validated() {
    let h = harness();
    let (room_id, _rx1, mut rx2) = setup_match(&h).await;

    // Within budget: the report is dropped.
    h.app.handle_time_overflow("c1", &room_id, "u1").await;
    let entry = h.app.rooms.get(&room_id).unwrap();
    {
        let room = entry.read().await;
        let timer = room.battle.as_ref().unwrap().timer_of("u1").unwrap();
        assert_eq!(timer.penalty_count, 0);
    }

    // Past the budget it applies (ticker or report, whichever first).
    h.clock.advance(120_001);
    h.app.handle_time_overflow("c1", &room_id, "u1").await;
    wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::PenaltyApplied { .. })
    })
    .await;
    {
        let room = entry.read().await;
        let timer = room.battle.as_ref().unwrap().timer_of("u1").unwrap();
        assert_eq!(timer.penalty_count, 1);
        assert_eq!(timer.penalty_points, 3);
        assert!(timer.is_overtime);
    }
}

#[tokio::test]
async fn test_reconnect_mid_match_rebinds_and_resyncs() {
    let h = harness();
    let (room_id, mut rx1, _rx2) = setup_match(&h).await;

    // Play to stage 4 (agree answering).
    for (conn, user, text) in &protocol_script()[..3] {
        h.app
            .clone()
            .handle_send_message(conn, &room_id, user, text)
            .await;
    }

    // u1 drops and comes back on a fresh connection.
    h.app.drop_connection("c1");
    let mut rx1b = connect(&h.app, "c1b");
    h.app
        .handle_join_discussion_room("c1b", &room_id, "u1")
        .await;
    h.app.handle_get_room_state("c1b", &room_id, "u1").await;

    let msg = wait_for(&mut rx1b, |m| {
        matches!(m, ServerMessage::RoomStateUpdated { .. })
    })
    .await;
    let ServerMessage::RoomStateUpdated { snapshot } = msg else {
        unreachable!();
    };
    assert_eq!(snapshot.stage, 4);
    assert_eq!(snapshot.current_turn_user_id.as_deref(), Some("u1"));
    assert!(snapshot.is_my_turn);
    assert!(!snapshot.messages.is_empty());
    let timer = snapshot.timer.expect("live timer for the active speaker");
    assert_eq!(timer.current_player_id, "u1");
    assert!(timer.round_time_remaining_sec <= timer.round_limit_sec);
    assert_eq!(snapshot.players.len(), 2);

    // No duplicate participant slot was created.
    {
        let entry = h.app.rooms.get(&room_id).unwrap();
        let room = entry.read().await;
        assert_eq!(room.participants.len(), 2);
        assert_eq!(room.participant("u1").unwrap().connection_id, "c1b");
    }

    // Subsequent engine events reach the new connection, not the old one.
    drain(&mut rx1);
    drain(&mut rx1b);
    h.app
        .clone()
        .handle_send_message("c1b", &room_id, "u1", "A2")
        .await;
    wait_for(&mut rx1b, |m| {
        matches!(m, ServerMessage::MessagesUpdated { .. })
    })
    .await;
    assert!(drain(&mut rx1).is_empty());
}

#[tokio::test]
async fn test_referee_scores_blend_into_final_verdict() {
    let h = harness_with_judge(MockJudge::with_verdict(judge_verdict(60, 80, "disagree")));
    let mut rx3 = connect(&h.app, "c3");
    let mut rx1 = connect(&h.app, "c1");
    let mut rx2 = connect(&h.app, "c2");
    seed_player(&h, "u3", "심판", true).await;
    seed_player(&h, "u1", "철수", false).await;
    seed_player(&h, "u2", "영희", false).await;

    // Admin creator becomes the referee.
    h.app.handle_create_room("c3", "u3", "s1").await;
    let room_id = only_room_id(&h.app);
    h.app.handle_join_room("c1", &room_id, "u1").await;
    h.app.handle_join_room("c2", &room_id, "u2").await;
    {
        let entry = h.app.rooms.get(&room_id).unwrap();
        let room = entry.read().await;
        assert!(room.has_referee);
        assert_eq!(room.participant("u3").unwrap().role, Role::Referee);
        assert_eq!(room.participant("u1").unwrap().role, Role::Player);
        assert_eq!(room.participant("u2").unwrap().role, Role::Player);
    }

    h.app
        .handle_select_position("c1", &room_id, "u1", Some(Position::Agree))
        .await;
    h.app
        .handle_select_position("c2", &room_id, "u2", Some(Position::Disagree))
        .await;
    h.app.handle_player_ready("c1", &room_id, "u1").await;
    h.app.handle_player_ready("c2", &room_id, "u2").await;
    h.app.handle_join_discussion_room("c1", &room_id, "u1").await;
    h.app.handle_join_discussion_room("c2", &room_id, "u2").await;
    h.app.handle_join_discussion_room("c3", &room_id, "u3").await;
    h.app
        .clone()
        .handle_discussion_view_ready("c1", &room_id, "u1")
        .await;
    h.app
        .clone()
        .handle_discussion_view_ready("c2", &room_id, "u2")
        .await;
    wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::TurnInfo { stage: 1, .. })
    })
    .await;

    for (conn, user, text) in protocol_script() {
        h.app
            .clone()
            .handle_send_message(conn, &room_id, user, text)
            .await;
    }

    // The modal goes to the referee only; the result waits for the scores.
    wait_for(&mut rx3, |m| {
        matches!(m, ServerMessage::ShowRefereeScoreModal { .. })
    })
    .await;
    assert!(!drain(&mut rx1)
        .iter()
        .any(|m| matches!(m, ServerMessage::BattleResult { .. })));

    h.app
        .handle_referee_submit_scores(
            "c3",
            &room_id,
            toron_core::judgment::SideScores {
                agree: 90,
                disagree: 50,
            },
            "u3",
        )
        .await;

    let result = wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::BattleResult { .. })
    })
    .await;
    let ServerMessage::BattleResult { verdict } = result else {
        unreachable!();
    };
    assert_eq!(verdict.agree.score, 78);
    assert_eq!(verdict.disagree.score, 62);
    assert_eq!(verdict.winner_user_id, "u1");

    let battles = h.store.battles().await;
    assert_eq!(battles.len(), 1);
    assert!(battles[0].verdict_json.contains("78"));
    assert_eq!(battles[0].winner_id, "u1");
}

#[tokio::test]
async fn test_judge_failure_ends_match_without_stats() {
    let h = harness_with_judge(MockJudge::failing());
    let (room_id, _rx1, mut rx2) = setup_match(&h).await;

    for (conn, user, text) in protocol_script() {
        h.app
            .clone()
            .handle_send_message(conn, &room_id, user, text)
            .await;
    }

    wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::BattleError { .. })
    })
    .await;

    assert!(h.store.battles().await.is_empty());
    let p1 = h.store.profile("u1").await.unwrap();
    assert_eq!(p1.wins, 0);
    assert_eq!(p1.loses, 0);
    assert!((p1.rating - 1_500.0).abs() < f64::EPSILON);

    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    assert!(room.battle.is_none());
    assert!(room.is_completed);
}

#[tokio::test]
async fn test_subjects_fall_back_to_builtin_list() {
    let h = harness();
    let mut rx = connect(&h.app, "c1");

    h.store.set_subjects_failing(true);
    h.app.handle_get_subjects("c1").await;
    let msg = expect_msg_timeout(&mut rx).await;
    let ServerMessage::Subjects { subjects } = msg else {
        panic!("expected subjects, got {msg:?}");
    };
    assert_eq!(subjects.len(), 5);

    // Store recovers: live data again.
    h.store.set_subjects_failing(false);
    h.app.handle_get_subjects("c1").await;
    let msg = expect_msg_timeout(&mut rx).await;
    let ServerMessage::Subjects { subjects } = msg else {
        panic!("expected subjects, got {msg:?}");
    };
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].id, "s1");
}

#[tokio::test]
async fn test_duplicate_inflight_requests_are_refused() {
    let h = harness();
    assert!(h.app.deduper.begin("c1", "create_room"));
    assert!(!h.app.deduper.begin("c1", "create_room"));
    // A different op or connection is its own token.
    assert!(h.app.deduper.begin("c1", "join_room"));
    assert!(h.app.deduper.begin("c2", "create_room"));

    h.app.deduper.end("c1", "create_room");
    assert!(h.app.deduper.begin("c1", "create_room"));

    h.app.deduper.cleanup("c1");
    assert_eq!(h.app.deduper.outstanding("c1"), 0);
    assert!(h.app.deduper.begin("c1", "join_room"));
}

#[tokio::test]
async fn test_position_reselection_clears_it() {
    let h = harness();
    let mut rx1 = connect(&h.app, "c1");
    seed_player(&h, "u1", "철수", false).await;
    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);

    h.app
        .handle_select_position("c1", &room_id, "u1", Some(Position::Agree))
        .await;
    h.app
        .handle_select_position("c1", &room_id, "u1", Some(Position::Agree))
        .await;

    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    assert_eq!(room.participant("u1").unwrap().position, None);
    drop(room);

    let seen = drain(&mut rx1);
    let positions: Vec<_> = seen
        .iter()
        .filter_map(|m| match m {
            ServerMessage::PositionSelected { position, .. } => Some(*position),
            _ => None,
        })
        .collect();
    assert_eq!(positions, vec![Some(Position::Agree), None]);
}

#[tokio::test]
async fn test_taking_the_opponents_position_is_rejected() {
    let h = harness();
    let _rx1 = connect(&h.app, "c1");
    let mut rx2 = connect(&h.app, "c2");
    seed_player(&h, "u1", "철수", false).await;
    seed_player(&h, "u2", "영희", false).await;
    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);
    h.app.handle_join_room("c2", &room_id, "u2").await;

    h.app
        .handle_select_position("c1", &room_id, "u1", Some(Position::Agree))
        .await;
    drain(&mut rx2);
    h.app
        .handle_select_position("c2", &room_id, "u2", Some(Position::Agree))
        .await;

    let seen = drain(&mut rx2);
    assert!(seen
        .iter()
        .any(|m| matches!(m, ServerMessage::RequestError { .. })));
    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    assert_eq!(room.participant("u2").unwrap().position, None);
}

#[tokio::test]
async fn test_ready_toggle_is_an_involution() {
    let h = harness();
    let _rx1 = connect(&h.app, "c1");
    seed_player(&h, "u1", "철수", false).await;
    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);

    h.app.handle_player_ready("c1", &room_id, "u1").await;
    {
        let entry = h.app.rooms.get(&room_id).unwrap();
        let room = entry.read().await;
        assert!(room.participant("u1").unwrap().is_ready);
        assert!(!room.battle_started);
    }
    h.app.handle_player_ready("c1", &room_id, "u1").await;
    {
        let entry = h.app.rooms.get(&room_id).unwrap();
        let room = entry.read().await;
        assert!(!room.participant("u1").unwrap().is_ready);
    }
}

#[tokio::test]
async fn test_third_joiner_becomes_spectator_and_started_room_rejects() {
    let h = harness();
    let _rx1 = connect(&h.app, "c1");
    let _rx2 = connect(&h.app, "c2");
    let _rx3 = connect(&h.app, "c3");
    let mut rx4 = connect(&h.app, "c4");
    for user in ["u1", "u2", "u3", "u4"] {
        seed_player(&h, user, user, false).await;
    }

    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);
    h.app.handle_join_room("c2", &room_id, "u2").await;
    h.app.handle_join_room("c3", &room_id, "u3").await;
    {
        let entry = h.app.rooms.get(&room_id).unwrap();
        let room = entry.read().await;
        assert_eq!(room.participant("u3").unwrap().role, Role::Spectator);
    }

    h.app.handle_player_ready("c1", &room_id, "u1").await;
    h.app.handle_player_ready("c2", &room_id, "u2").await;
    h.app.handle_join_room("c4", &room_id, "u4").await;
    let seen = drain(&mut rx4);
    assert!(seen
        .iter()
        .any(|m| matches!(m, ServerMessage::RequestError { .. })));
}

#[tokio::test]
async fn test_non_admin_cannot_take_referee_role() {
    let h = harness();
    let mut rx1 = connect(&h.app, "c1");
    seed_player(&h, "u1", "철수", false).await;
    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);
    drain(&mut rx1);

    h.app
        .handle_select_role("c1", &room_id, "u1", Role::Referee)
        .await;
    let seen = drain(&mut rx1);
    assert!(seen
        .iter()
        .any(|m| matches!(m, ServerMessage::RoleError { .. })));
    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    assert_eq!(room.participant("u1").unwrap().role, Role::Player);
    assert!(!room.has_referee);
}

#[tokio::test]
async fn test_out_of_turn_messages_are_silently_ignored() {
    let h = harness();
    let (room_id, _rx1, mut rx2) = setup_match(&h).await;
    drain(&mut rx2);

    h.app
        .clone()
        .handle_send_message("c2", &room_id, "u2", "끼어들기")
        .await;

    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    let battle = room.battle.as_ref().unwrap();
    assert_eq!(battle.stage, 1);
    assert!(battle.log.is_empty());
    drop(room);
    // No broadcast resulted.
    assert!(!drain(&mut rx2)
        .iter()
        .any(|m| matches!(m, ServerMessage::MessagesUpdated { .. })));
}

#[tokio::test]
async fn test_positions_are_complemented_at_entry() {
    let h = harness();
    let _rx1 = connect(&h.app, "c1");
    let mut rx2 = connect(&h.app, "c2");
    seed_player(&h, "u1", "철수", false).await;
    seed_player(&h, "u2", "영희", false).await;

    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);
    h.app.handle_join_room("c2", &room_id, "u2").await;
    // Only u2 picks a side; u1 gets the complement at entry.
    h.app
        .handle_select_position("c2", &room_id, "u2", Some(Position::Agree))
        .await;
    h.app.handle_player_ready("c1", &room_id, "u1").await;
    h.app.handle_player_ready("c2", &room_id, "u2").await;
    h.app.handle_join_discussion_room("c1", &room_id, "u1").await;
    h.app.handle_join_discussion_room("c2", &room_id, "u2").await;
    h.app
        .clone()
        .handle_discussion_view_ready("c1", &room_id, "u1")
        .await;
    h.app
        .clone()
        .handle_discussion_view_ready("c2", &room_id, "u2")
        .await;

    let msg = wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::TurnInfo { stage: 1, .. })
    })
    .await;
    let ServerMessage::TurnInfo {
        current_player_id, ..
    } = msg
    else {
        unreachable!();
    };
    // u2 is agree, so u2 opens.
    assert_eq!(current_player_id.as_deref(), Some("u2"));

    let entry = h.app.rooms.get(&room_id).unwrap();
    let room = entry.read().await;
    assert_eq!(
        room.participant("u1").unwrap().position,
        Some(Position::Disagree)
    );
    let battle = room.battle.as_ref().unwrap();
    assert_eq!(battle.agree_user_id, "u2");
    assert_eq!(battle.disagree_user_id, "u1");
}

#[tokio::test]
async fn test_leaving_an_active_match_concedes_it() {
    let h = harness();
    let (room_id, _rx1, mut rx2) = setup_match(&h).await;

    h.app.handle_leave_room("c1", &room_id, "u1").await;

    let result = wait_for(&mut rx2, |m| {
        matches!(m, ServerMessage::BattleResult { .. })
    })
    .await;
    let ServerMessage::BattleResult { verdict } = result else {
        unreachable!();
    };
    assert_eq!(verdict.winner_user_id, "u2");

    let battles = h.store.battles().await;
    assert_eq!(battles.len(), 1);
    assert_eq!(battles[0].winner_id, "u2");
}

#[tokio::test]
async fn test_last_leaver_tears_the_room_down() {
    let h = harness();
    let _rx1 = connect(&h.app, "c1");
    seed_player(&h, "u1", "철수", false).await;
    h.app.handle_create_room("c1", "u1", "s1").await;
    let room_id = only_room_id(&h.app);

    h.app.handle_leave_room("c1", &room_id, "u1").await;
    assert!(h.app.rooms.get(&room_id).is_none());
}

#[tokio::test]
async fn test_my_room_lookup() {
    let h = harness();
    let mut rx1 = connect(&h.app, "c1");
    seed_player(&h, "u1", "철수", false).await;

    h.app.handle_get_my_room("c1", "u1").await;
    let msg = expect_msg_timeout(&mut rx1).await;
    assert!(matches!(msg, ServerMessage::MyRoom { room: None }));

    h.app.handle_create_room("c1", "u1", "s1").await;
    drain(&mut rx1);
    h.app.handle_get_my_room("c1", "u1").await;
    let msg = wait_for(&mut rx1, |m| matches!(m, ServerMessage::MyRoom { .. })).await;
    let ServerMessage::MyRoom { room } = msg else {
        unreachable!();
    };
    assert!(room.is_some());
}
