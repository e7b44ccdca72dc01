use toron_core::battle::{BattleState, TurnAdvance};
use toron_core::judgment::{blend, SideScores, SideVerdict, Verdict};
use toron_core::log::Sender;
use toron_core::phase::{STAGE_EVALUATION, STAGE_PENALTY_TERMINAL};
use toron_core::timer::{OverflowKind, TimerSettings};

fn ai_verdict(agree: u32, disagree: u32, winner: &str) -> Verdict {
    Verdict {
        agree: SideVerdict {
            score: agree,
            good: String::new(),
            bad: String::new(),
        },
        disagree: SideVerdict {
            score: disagree,
            good: String::new(),
            bad: String::new(),
        },
        winner_user_id: winner.to_string(),
    }
}

#[test]
fn test_full_protocol_reaches_evaluation_with_nine_entries() {
    let mut battle = BattleState::new("p-agree", "p-disagree", TimerSettings::default());
    battle.begin(0);

    let script = [
        ("p-agree", "A1"),
        ("p-disagree", "D1"),
        ("p-disagree", "D2"),
        ("p-agree", "A2"),
        ("p-disagree", "D3"),
        ("p-agree", "A3"),
        ("p-disagree", "D4"),
        ("p-agree", "A4"),
        ("p-disagree", "D5"),
    ];

    let mut now = 0;
    let mut last = None;
    for (speaker, text) in script {
        now += 30_000;
        last = Some(battle.accept_message(speaker, text, now).unwrap());
    }
    assert_eq!(last, Some(TurnAdvance::Evaluation));
    assert_eq!(battle.stage, STAGE_EVALUATION);
    assert_eq!(battle.log.len(), 9);

    let (agree, disagree) = battle.transcripts();
    assert_eq!(agree, "A1\nA2\nA3\nA4");
    assert_eq!(disagree, "D1\nD2\nD3\nD4\nD5");

    // 4 turns of 30s each for agree, 5 for disagree.
    assert_eq!(battle.timer_of("p-agree").unwrap().total_time_used_ms, 120_000);
    assert_eq!(
        battle.timer_of("p-disagree").unwrap().total_time_used_ms,
        150_000
    );
}

#[test]
fn test_silent_speaker_forfeits_after_six_overflows() {
    let settings = TimerSettings::default();
    let mut battle = BattleState::new("p-agree", "p-disagree", settings.clone());
    battle.begin(0);

    let mut now = 0;
    let mut forfeits = 0;
    // First overflow: round budget. Five more: overtime windows.
    for round in 0..6 {
        now = if round == 0 {
            settings.round_limit_ms + 1
        } else {
            now + settings.overtime_limit_ms + 1
        };
        let events = battle.tick(now);
        assert!(events.overflow.is_some(), "round {round} should overflow");
        let (offender, outcome) = battle.apply_speaker_overflow(now).unwrap();
        assert_eq!(offender, "p-agree");
        if outcome.forfeit {
            forfeits += 1;
            battle.mark_penalty_terminal();
            break;
        }
    }
    assert_eq!(forfeits, 1);
    assert_eq!(battle.stage, STAGE_PENALTY_TERMINAL);
    assert_eq!(battle.timer_of("p-agree").unwrap().penalty_count, 6);

    // Terminal stage has no speaker; ticks are inert.
    let events = battle.tick(now + 60_000);
    assert!(events.timer_update.is_none());
    assert!(events.overflow.is_none());
}

#[test]
fn test_boundary_message_at_round_limit_carries_no_penalty() {
    let settings = TimerSettings::default();
    let mut battle = BattleState::new("p-agree", "p-disagree", settings.clone());
    battle.begin(0);

    // Exactly at the limit: no overflow is pending.
    let events = battle.tick(settings.round_limit_ms);
    assert_eq!(events.overflow, None);
    battle
        .accept_message("p-agree", "아슬아슬한 발언", settings.round_limit_ms)
        .unwrap();
    assert_eq!(battle.timer_of("p-agree").unwrap().penalty_points, 0);

    // One millisecond past the limit the next tick reports the overflow.
    let mut late = BattleState::new("p-agree", "p-disagree", settings.clone());
    late.begin(0);
    let events = late.tick(settings.round_limit_ms + 1);
    assert_eq!(events.overflow, Some(OverflowKind::Round));
}

#[test]
fn test_engine_messages_dedup_across_reentry() {
    let mut battle = BattleState::new("p-agree", "p-disagree", TimerSettings::default());
    battle.begin(0);
    let announcement = "찬성측 철수님의 대표발언 차례입니다.";
    assert!(battle.append_message(Sender::System, announcement, 0));
    assert!(!battle.append_message(Sender::System, announcement, 5_000));
    assert_eq!(battle.messages.len(), 1);
}

#[test]
fn test_blended_verdict_switches_winner() {
    let battle = BattleState::new("p-agree", "p-disagree", TimerSettings::default());
    let ai = ai_verdict(60, 80, "p-disagree");
    let blended = blend(
        &ai,
        SideScores {
            agree: 90,
            disagree: 50,
        },
        &battle.agree_user_id,
        &battle.disagree_user_id,
    );
    assert_eq!(blended.agree.score, 78);
    assert_eq!(blended.disagree.score, 62);
    assert_eq!(blended.winner_user_id, "p-agree");
}
