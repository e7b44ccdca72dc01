use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::judgment::{SideScores, Verdict};
use crate::log::{DiscussionEntry, MessageLog, Sender};
use crate::phase::{
    speaker_side, Side, STAGE_EVALUATION, STAGE_FIRST_TURN, STAGE_PENALTY_TERMINAL, STAGE_WAITING,
};
use crate::timer::{
    apply_overflow, compute_snapshot, detect_overflow, OverflowKind, PenaltyOutcome, PlayerTimer,
    TimerSettings, TimerSnapshot,
};

/// Why a `send_message` was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRejection {
    /// Sender is not the current speaker. Rejected silently upstream.
    NotCurrentSpeaker,
    /// No speaking turn is active (waiting, evaluation or terminal stage).
    NoActiveTurn,
}

/// What an accepted message caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAdvance {
    /// The next speaker's turn has started.
    NextTurn { next_user_id: String, stage: u8 },
    /// All nine turns are spoken; the evaluation handshake begins.
    Evaluation,
}

/// One tick of the match clock.
#[derive(Debug, Clone, Default)]
pub struct TickEvents {
    /// Present when a whole-second remaining value changed.
    pub timer_update: Option<TimerSnapshot>,
    /// Present when the speaker blew a budget; the caller applies it.
    pub overflow: Option<OverflowKind>,
}

/// Serialised state of one running match. All mutation goes through the
/// room's exclusive lock; this struct itself is single-threaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleState {
    pub stage: u8,
    pub agree_user_id: String,
    pub disagree_user_id: String,
    pub log: Vec<DiscussionEntry>,
    #[serde(skip)]
    pub messages: MessageLog,
    pub timers: HashMap<String, PlayerTimer>,
    pub turn_started_at: Option<i64>,
    pub settings: TimerSettings,
    pub ended_by_penalty: bool,
    pub ai_verdict: Option<Verdict>,
    pub human_scores: Option<SideScores>,
    #[serde(skip)]
    last_timer_broadcast: Option<(i64, i64, i64)>,
}

impl BattleState {
    #[must_use]
    pub fn new(agree_user_id: &str, disagree_user_id: &str, settings: TimerSettings) -> Self {
        let mut timers = HashMap::new();
        timers.insert(agree_user_id.to_string(), PlayerTimer::default());
        timers.insert(disagree_user_id.to_string(), PlayerTimer::default());
        Self {
            stage: STAGE_WAITING,
            agree_user_id: agree_user_id.to_string(),
            disagree_user_id: disagree_user_id.to_string(),
            log: Vec::new(),
            messages: MessageLog::new(),
            timers,
            turn_started_at: None,
            settings,
            ended_by_penalty: false,
            ai_verdict: None,
            human_scores: None,
            last_timer_broadcast: None,
        }
    }

    #[must_use]
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if user_id == self.agree_user_id {
            Some(Side::Agree)
        } else if user_id == self.disagree_user_id {
            Some(Side::Disagree)
        } else {
            None
        }
    }

    #[must_use]
    pub fn user_of(&self, side: Side) -> &str {
        match side {
            Side::Agree => &self.agree_user_id,
            Side::Disagree => &self.disagree_user_id,
        }
    }

    #[must_use]
    pub fn opponent_of(&self, user_id: &str) -> Option<&str> {
        match self.side_of(user_id)? {
            Side::Agree => Some(&self.disagree_user_id),
            Side::Disagree => Some(&self.agree_user_id),
        }
    }

    /// The user whose turn it is, if a speaking turn is active.
    #[must_use]
    pub fn current_speaker(&self) -> Option<&str> {
        speaker_side(self.stage).map(|side| self.user_of(side))
    }

    #[must_use]
    pub fn timer_of(&self, user_id: &str) -> Option<&PlayerTimer> {
        self.timers.get(user_id)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage >= STAGE_PENALTY_TERMINAL
    }

    /// 0→1 transition. Starts the agree side's opening turn.
    pub fn begin(&mut self, now_ms: i64) -> TurnAdvance {
        debug_assert_eq!(self.stage, STAGE_WAITING);
        self.stage = STAGE_FIRST_TURN;
        let first = self.agree_user_id.clone();
        self.start_turn(&first, now_ms);
        TurnAdvance::NextTurn {
            next_user_id: first,
            stage: self.stage,
        }
    }

    fn start_turn(&mut self, user_id: &str, now_ms: i64) {
        if let Some(timer) = self.timers.get_mut(user_id) {
            timer.round_time_used_ms = 0;
            timer.is_overtime = false;
            timer.overtime_started_at = None;
        }
        self.turn_started_at = Some(now_ms);
        self.last_timer_broadcast = None;
    }

    /// Absorbs the running turn's elapsed time into the speaker's totals and
    /// clears the turn stamp.
    fn settle_turn(&mut self, user_id: &str, now_ms: i64) {
        let Some(started) = self.turn_started_at.take() else {
            return;
        };
        let elapsed = (now_ms - started).max(0);
        if let Some(timer) = self.timers.get_mut(user_id) {
            timer.round_time_used_ms += elapsed;
            timer.total_time_used_ms += elapsed;
        }
    }

    /// Applies a speaker message: records the turn, settles the speaker's
    /// clock, advances the stage by exactly one and starts the next turn.
    pub fn accept_message(
        &mut self,
        user_id: &str,
        text: &str,
        now_ms: i64,
    ) -> Result<TurnAdvance, MessageRejection> {
        let speaker = self
            .current_speaker()
            .ok_or(MessageRejection::NoActiveTurn)?
            .to_string();
        if speaker != user_id {
            return Err(MessageRejection::NotCurrentSpeaker);
        }

        self.log.push(DiscussionEntry {
            user_id: user_id.to_string(),
            text: text.to_string(),
            stage: self.stage,
        });
        self.settle_turn(&speaker, now_ms);
        self.stage += 1;

        if self.stage >= STAGE_EVALUATION {
            return Ok(TurnAdvance::Evaluation);
        }
        let next = self
            .current_speaker()
            .expect("stages 1..=9 always have a speaker")
            .to_string();
        self.start_turn(&next, now_ms);
        Ok(TurnAdvance::NextTurn {
            next_user_id: next,
            stage: self.stage,
        })
    }

    /// One second of match time. Pure computation; the caller emits events
    /// and applies any detected overflow.
    pub fn tick(&mut self, now_ms: i64) -> TickEvents {
        let Some(speaker) = self.current_speaker().map(str::to_string) else {
            return TickEvents::default();
        };
        let Some(timer) = self.timers.get(&speaker) else {
            return TickEvents::default();
        };

        let overflow = detect_overflow(timer, self.turn_started_at, now_ms, &self.settings);
        let snapshot =
            compute_snapshot(timer, self.turn_started_at, now_ms, &self.settings, &speaker);
        let key = (
            snapshot.round_time_remaining_sec,
            snapshot.total_time_remaining_sec,
            snapshot.overtime_remaining_sec,
        );
        let timer_update = if self.last_timer_broadcast != Some(key) {
            self.last_timer_broadcast = Some(key);
            Some(snapshot)
        } else {
            None
        };
        TickEvents {
            timer_update,
            overflow,
        }
    }

    /// Overflow pending against the current speaker, if any. Used to
    /// validate client-reported overflows against the authoritative clock.
    #[must_use]
    pub fn pending_overflow(&self, now_ms: i64) -> Option<OverflowKind> {
        let speaker = self.current_speaker()?;
        let timer = self.timers.get(speaker)?;
        detect_overflow(timer, self.turn_started_at, now_ms, &self.settings)
    }

    /// Penalises the current speaker for an overflow and opens a fresh
    /// overtime window.
    pub fn apply_speaker_overflow(&mut self, now_ms: i64) -> Option<(String, PenaltyOutcome)> {
        let speaker = self.current_speaker()?.to_string();
        let timer = self.timers.get_mut(&speaker)?;
        let outcome = apply_overflow(timer, now_ms, &self.settings);
        Some((speaker, outcome))
    }

    /// Ends the match at the sentinel stage (walkover and similar).
    pub fn mark_terminal(&mut self) {
        self.stage = STAGE_PENALTY_TERMINAL;
        self.turn_started_at = None;
    }

    /// Ends the match at the sentinel stage by penalty overflow.
    pub fn mark_penalty_terminal(&mut self) {
        self.mark_terminal();
        self.ended_by_penalty = true;
    }

    /// Referee reward: removes penalty points, clamped at zero.
    pub fn add_points(&mut self, target: &str, points: u32) -> Option<u32> {
        let timer = self.timers.get_mut(target)?;
        timer.penalty_points = timer.penalty_points.saturating_sub(points);
        Some(timer.penalty_points)
    }

    /// Referee sanction: adds penalty points, clamped at the maximum.
    /// The caller checks `forfeit` and runs the terminal path.
    pub fn deduct_points(&mut self, target: &str, points: u32) -> Option<PenaltyOutcome> {
        let max = self.settings.penalty_max;
        let timer = self.timers.get_mut(target)?;
        timer.penalty_points = (timer.penalty_points + points).min(max);
        Some(PenaltyOutcome {
            penalty_points: timer.penalty_points,
            penalty_count: timer.penalty_count,
            forfeit: timer.penalty_points >= max,
        })
    }

    /// Referee grant: gives time back by shrinking used total time.
    pub fn extend_time(&mut self, target: &str, seconds: i64) -> Option<i64> {
        let timer = self.timers.get_mut(target)?;
        timer.total_time_used_ms = (timer.total_time_used_ms - seconds * 1000).max(0);
        Some(timer.total_time_used_ms)
    }

    /// Referee sanction: burns total time.
    pub fn reduce_time(&mut self, target: &str, seconds: i64) -> Option<i64> {
        let timer = self.timers.get_mut(target)?;
        timer.total_time_used_ms += seconds * 1000;
        Some(timer.total_time_used_ms)
    }

    /// Live timer view for the active speaker, regardless of broadcast
    /// dedup. Used by the resync snapshot.
    #[must_use]
    pub fn speaker_snapshot(&self, now_ms: i64) -> Option<TimerSnapshot> {
        let speaker = self.current_speaker()?;
        let timer = self.timers.get(speaker)?;
        Some(compute_snapshot(
            timer,
            self.turn_started_at,
            now_ms,
            &self.settings,
            speaker,
        ))
    }

    /// Concatenated transcript per side for the judge's structured pass.
    #[must_use]
    pub fn transcripts(&self) -> (String, String) {
        let mut agree = String::new();
        let mut disagree = String::new();
        for entry in &self.log {
            let buffer = if entry.user_id == self.agree_user_id {
                &mut agree
            } else {
                &mut disagree
            };
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(&entry.text);
        }
        (agree, disagree)
    }

    /// Normalises the judge's winner token to a user id.
    #[must_use]
    pub fn resolve_winner(&self, winner_token: &str) -> String {
        match winner_token {
            "agree" => self.agree_user_id.clone(),
            "disagree" => self.disagree_user_id.clone(),
            other => other.to_string(),
        }
    }

    pub fn append_message(&mut self, sender: Sender, text: &str, now_ms: i64) -> bool {
        self.messages.append(sender, text, now_ms)
    }
}
