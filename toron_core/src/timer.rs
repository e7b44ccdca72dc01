use serde::{Deserialize, Serialize};

/// Time budgets and penalty tariffs for one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    pub round_limit_ms: i64,
    pub total_limit_ms: i64,
    pub overtime_limit_ms: i64,
    pub penalty_step: u32,
    pub penalty_max: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            round_limit_ms: 120_000,
            total_limit_ms: 300_000,
            overtime_limit_ms: 30_000,
            penalty_step: 3,
            penalty_max: 18,
        }
    }
}

/// Per-player time accounting. `round_time_used_ms` is reset when the
/// player's turn starts; `total_time_used_ms` accumulates across turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerTimer {
    pub total_time_used_ms: i64,
    pub round_time_used_ms: i64,
    pub penalty_points: u32,
    pub penalty_count: u32,
    pub is_overtime: bool,
    pub overtime_started_at: Option<i64>,
}

/// What kind of budget was blown. `Overtime` is reported by clients whose
/// local countdown expired inside the grace window; the engine treats it the
/// same as a round overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowKind {
    Round,
    Total,
    Overtime,
}

/// Result of applying one overflow to a player.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyOutcome {
    pub penalty_points: u32,
    pub penalty_count: u32,
    pub forfeit: bool,
}

/// Once-per-second broadcast payload. Field names are the wire names the
/// clients already consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub current_player_id: String,
    pub round_time_remaining_sec: i64,
    pub total_time_remaining_sec: i64,
    pub is_overtime: bool,
    pub overtime_remaining_sec: i64,
    pub round_limit_sec: i64,
    pub total_limit_sec: i64,
}

fn remaining_sec(remaining_ms: i64) -> i64 {
    (remaining_ms.max(0) + 999) / 1000
}

/// Remaining-time view for the active speaker. `turn_started_at` is the
/// stamp of the running turn, if any.
#[must_use]
pub fn compute_snapshot(
    timer: &PlayerTimer,
    turn_started_at: Option<i64>,
    now_ms: i64,
    settings: &TimerSettings,
    current_player_id: &str,
) -> TimerSnapshot {
    let elapsed = turn_started_at.map_or(0, |t| (now_ms - t).max(0));
    let round_used = timer.round_time_used_ms + elapsed;
    let total_used = timer.total_time_used_ms + elapsed;
    let overtime_remaining = if timer.is_overtime {
        timer
            .overtime_started_at
            .map_or(0, |t| settings.overtime_limit_ms - (now_ms - t))
    } else {
        0
    };
    TimerSnapshot {
        current_player_id: current_player_id.to_string(),
        round_time_remaining_sec: remaining_sec(settings.round_limit_ms - round_used),
        total_time_remaining_sec: remaining_sec(settings.total_limit_ms - total_used),
        is_overtime: timer.is_overtime,
        overtime_remaining_sec: remaining_sec(overtime_remaining),
        round_limit_sec: settings.round_limit_ms / 1000,
        total_limit_sec: settings.total_limit_ms / 1000,
    }
}

/// Checks the running turn against the three budgets. Comparisons are
/// strict: sitting exactly on a limit is not an overflow.
#[must_use]
pub fn detect_overflow(
    timer: &PlayerTimer,
    turn_started_at: Option<i64>,
    now_ms: i64,
    settings: &TimerSettings,
) -> Option<OverflowKind> {
    let elapsed = turn_started_at.map_or(0, |t| (now_ms - t).max(0));
    if timer.is_overtime {
        let exhausted = timer
            .overtime_started_at
            .is_some_and(|t| now_ms - t > settings.overtime_limit_ms);
        return exhausted.then_some(OverflowKind::Round);
    }
    if timer.round_time_used_ms + elapsed > settings.round_limit_ms {
        return Some(OverflowKind::Round);
    }
    if timer.total_time_used_ms + elapsed > settings.total_limit_ms {
        return Some(OverflowKind::Total);
    }
    None
}

/// Adds one penalty step and opens a fresh overtime window. The overflow
/// that applies the penalty is also the one that grants the grace window;
/// a later overflow inside that window lands here again.
pub fn apply_overflow(
    timer: &mut PlayerTimer,
    now_ms: i64,
    settings: &TimerSettings,
) -> PenaltyOutcome {
    timer.penalty_points = (timer.penalty_points + settings.penalty_step).min(settings.penalty_max);
    timer.penalty_count += 1;
    timer.is_overtime = true;
    timer.overtime_started_at = Some(now_ms);
    PenaltyOutcome {
        penalty_points: timer.penalty_points,
        penalty_count: timer.penalty_count,
        forfeit: timer.penalty_points >= settings.penalty_max,
    }
}
