use std::sync::Arc;
use std::time::Duration;

use shared::ServerMessage;
use toron_core::battle::{BattleState, MessageRejection, TurnAdvance};
use toron_core::judgment::{forfeit_verdict, Verdict};
use toron_core::log::Sender;
use toron_core::phase::{
    speaker_side, stage_description, turn_announcement, Side, STAGE_EVALUATION, STAGE_WAITING,
};
use toron_core::timer::TimerSettings;

use crate::room_manager::session::{Participant, Room};
use crate::room_manager::AppState;
use crate::store::{BattleRecord, ProfilePatch};

impl AppState {
    /// Rebinds a participant's connection and re-subscribes it to the room
    /// channel. Safe to repeat; the participant count never changes here.
    pub async fn handle_join_discussion_room(&self, conn_id: &str, room_id: &str, user_id: &str) {
        self.bind_session(conn_id, user_id);
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        let Some(participant) = room.participant_mut(user_id) else {
            return;
        };
        let old_conn = std::mem::replace(&mut participant.connection_id, conn_id.to_string());
        if old_conn != conn_id {
            self.fanout.leave_channel(room_id, &old_conn);
            tracing::info!(room_id = %room_id, user_id = %user_id, "connection rebound");
        }
        self.fanout.join_channel(room_id, conn_id);
        let view = room.view();
        self.fanout
            .send(conn_id, ServerMessage::RoomUpdate { room: view });
    }

    /// Both players signalling view-readiness starts the match: positions
    /// are filled, the roster is broadcast, and after a short settling
    /// delay the first turn begins.
    pub async fn handle_discussion_view_ready(
        self: Arc<Self>,
        conn_id: &str,
        room_id: &str,
        user_id: &str,
    ) {
        self.bind_session(conn_id, user_id);
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        let Some(participant) = room.participant_mut(user_id) else {
            return;
        };
        participant.discussion_view_ready = true;

        if !room.battle_started || room.battle.is_some() {
            return;
        }
        let players: Vec<_> = room.players().collect();
        if players.len() != 2 || !players.iter().all(|p| p.discussion_view_ready) {
            return;
        }

        room.assign_positions();
        let Some((agree_id, disagree_id)) = room.position_pair() else {
            tracing::error!(room_id = %room_id, "cannot start: players share a position");
            return;
        };
        room.battle = Some(BattleState::new(
            &agree_id,
            &disagree_id,
            TimerSettings::default(),
        ));
        tracing::info!(
            room_id = %room_id,
            agree = %agree_id,
            disagree = %disagree_id,
            "match created"
        );
        self.fanout.broadcast(
            room_id,
            &ServerMessage::PlayerListUpdated {
                players: room.participant_views(),
            },
        );
        drop(room);
        drop(entry);

        let state = Arc::clone(&self);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(state.config.settle_delay_ms)).await;
            state.begin_battle(room_id).await;
        });
    }

    async fn begin_battle(self: Arc<Self>, room_id: String) {
        {
            let Some(entry) = self.rooms.get(&room_id) else {
                return;
            };
            let mut room = entry.write().await;
            let now = self.clock.now_ms();
            let Some(battle) = room.battle.as_mut() else {
                return;
            };
            if battle.stage != STAGE_WAITING {
                return;
            }
            let TurnAdvance::NextTurn {
                next_user_id,
                stage,
            } = battle.begin(now)
            else {
                return;
            };
            self.announce_turn(&mut room, &next_user_id, stage, now);
        }
        self.spawn_ticker(room_id);
    }

    /// System announcement + `turn_info` for a new speaking turn. The
    /// announcement goes through the deduplicating log, so a re-entered
    /// phase repeats the event but not the message.
    fn announce_turn(&self, room: &mut Room, user_id: &str, stage: u8, now_ms: i64) {
        let Some(side) = speaker_side(stage) else {
            return;
        };
        let name = room
            .participant(user_id)
            .map_or_else(|| user_id.to_string(), |p| p.display_name.clone());
        let text = turn_announcement(side, &name);
        let room_id = room.room_id.clone();
        if let Some(battle) = room.battle.as_mut() {
            battle.append_message(Sender::System, &text, now_ms);
            self.fanout.broadcast(
                &room_id,
                &ServerMessage::MessagesUpdated {
                    messages: battle.messages.snapshot(),
                },
            );
        }
        self.fanout.broadcast(
            &room_id,
            &ServerMessage::TurnInfo {
                current_player_id: Some(user_id.to_string()),
                stage,
                message: text,
                stage_description: stage_description(stage).to_string(),
            },
        );
    }

    /// One ticker per match. Exits as soon as the match is gone.
    fn spawn_ticker(self: Arc<Self>, room_id: String) {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(entry) = self.rooms.get(&room_id) else {
                    break;
                };
                let mut room = entry.write().await;
                let now = self.clock.now_ms();
                let events = {
                    let Some(battle) = room.battle.as_mut() else {
                        break;
                    };
                    battle.tick(now)
                };
                if let Some(snapshot) = events.timer_update {
                    self.fanout
                        .broadcast(&room_id, &ServerMessage::TimerUpdate(snapshot));
                }
                if events.overflow.is_some() {
                    self.apply_overflow_and_emit(&mut room, now).await;
                }
            }
            tracing::debug!(room_id = %room_id, "ticker stopped");
        });
    }

    /// A message from the current speaker advances the protocol; anyone
    /// else is ignored.
    pub async fn handle_send_message(
        self: Arc<Self>,
        _conn_id: &str,
        room_id: &str,
        user_id: &str,
        text: &str,
    ) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        let now = self.clock.now_ms();
        let Some(battle) = room.battle.as_mut() else {
            return;
        };

        let advance = match battle.accept_message(user_id, text, now) {
            Ok(advance) => advance,
            Err(MessageRejection::NotCurrentSpeaker | MessageRejection::NoActiveTurn) => {
                tracing::debug!(room_id = %room_id, user_id = %user_id, "message out of turn, ignored");
                return;
            }
        };

        let sender = match battle.side_of(user_id) {
            Some(Side::Agree) => Sender::Agree,
            Some(Side::Disagree) => Sender::Disagree,
            None => return,
        };
        battle.append_message(sender, text, now);
        self.fanout.broadcast(
            room_id,
            &ServerMessage::MessagesUpdated {
                messages: battle.messages.snapshot(),
            },
        );

        match advance {
            TurnAdvance::NextTurn {
                next_user_id,
                stage,
            } => {
                self.announce_turn(&mut room, &next_user_id, stage, now);
            }
            TurnAdvance::Evaluation => {
                let closing = "모든 발언이 끝났습니다. 잠시 후 AI 심판의 판정이 공개됩니다.";
                battle.append_message(Sender::System, closing, now);
                self.fanout.broadcast(
                    room_id,
                    &ServerMessage::MessagesUpdated {
                        messages: battle.messages.snapshot(),
                    },
                );
                self.fanout.broadcast(
                    room_id,
                    &ServerMessage::TurnInfo {
                        current_player_id: None,
                        stage: STAGE_EVALUATION,
                        message: closing.to_string(),
                        stage_description: stage_description(STAGE_EVALUATION).to_string(),
                    },
                );
                drop(room);
                drop(entry);
                self.spawn_evaluation(room_id.to_string());
            }
        }
    }

    /// Judge handshake, off the room lock. A late completion finding the
    /// match gone is dropped.
    fn spawn_evaluation(self: Arc<Self>, room_id: String) {
        tokio::spawn(async move {
            let inputs = {
                let Some(entry) = self.rooms.get(&room_id) else {
                    return;
                };
                let room = entry.read().await;
                let Some(battle) = room.battle.as_ref() else {
                    return;
                };
                let (agree_turns, disagree_turns) = battle.transcripts();
                (room.subject.title.clone(), agree_turns, disagree_turns)
            };

            let (subject_title, agree_turns, disagree_turns) = inputs;
            let outcome = match self
                .judge
                .evaluate(&subject_title, &agree_turns, &disagree_turns)
                .await
            {
                Ok(judged) => match self.judge.narrate(&judged).await {
                    Ok(narration) => Ok((judged, narration)),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };

            let Some(entry) = self.rooms.get(&room_id) else {
                return;
            };
            let mut room = entry.write().await;
            if room.battle.is_none() {
                tracing::debug!(room_id = %room_id, "judge result for a dead match dropped");
                return;
            }
            let now = self.clock.now_ms();

            let (judged, narration) = match outcome {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(room_id = %room_id, error = %err, "judge evaluation failed");
                    self.fanout.broadcast(
                        &room_id,
                        &ServerMessage::BattleError {
                            message: "AI 판정에 실패하여 토론이 종료되었습니다.".to_string(),
                        },
                    );
                    room.battle = None;
                    room.is_completed = true;
                    return;
                }
            };

            let Some(battle) = room.battle.as_mut() else {
                return;
            };
            let verdict = Verdict {
                winner_user_id: battle.resolve_winner(&judged.winner),
                agree: judged.agree,
                disagree: judged.disagree,
            };
            battle.ai_verdict = Some(verdict.clone());
            battle.append_message(Sender::Judge, &narration, now);
            self.fanout.broadcast(
                &room_id,
                &ServerMessage::MessagesUpdated {
                    messages: battle.messages.snapshot(),
                },
            );
            self.fanout.broadcast(
                &room_id,
                &ServerMessage::AiJudgeMessage {
                    message: narration,
                    stage: STAGE_EVALUATION,
                },
            );

            match room.referee() {
                Some(referee) => {
                    // Gate on the human scores; the modal goes only to the
                    // referee's live connection.
                    let referee_conn = self
                        .conn_of_user(&referee.user_id)
                        .unwrap_or_else(|| referee.connection_id.clone());
                    self.fanout.send(
                        &referee_conn,
                        ServerMessage::ShowRefereeScoreModal {
                            room_id: room_id.clone(),
                        },
                    );
                }
                None => self.finalize_match(&mut room, verdict).await,
            }
        });
    }

    /// Client-reported overflow. The authoritative clock has the final say;
    /// an unconfirmed report is dropped.
    pub async fn handle_time_overflow(&self, _conn_id: &str, room_id: &str, user_id: &str) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        let now = self.clock.now_ms();
        let confirmed = room.battle.as_ref().is_some_and(|battle| {
            battle.current_speaker() == Some(user_id) && battle.pending_overflow(now).is_some()
        });
        if !confirmed {
            tracing::debug!(room_id = %room_id, user_id = %user_id, "reported overflow not confirmed");
            return;
        }
        self.apply_overflow_and_emit(&mut room, now).await;
    }

    /// Penalty + fresh overtime for the current speaker; forfeit when the
    /// ceiling is reached. `penalty_applied` always precedes any resulting
    /// `battle_result`.
    pub(crate) async fn apply_overflow_and_emit(&self, room: &mut Room, now_ms: i64) {
        let room_id = room.room_id.clone();
        let (offender, outcome, overtime_seconds) = {
            let Some(battle) = room.battle.as_mut() else {
                return;
            };
            let Some((offender, outcome)) = battle.apply_speaker_overflow(now_ms) else {
                return;
            };
            (offender, outcome, battle.settings.overtime_limit_ms / 1000)
        };
        tracing::info!(
            room_id = %room_id,
            user_id = %offender,
            points = outcome.penalty_points,
            "penalty applied"
        );
        self.fanout.broadcast(
            &room_id,
            &ServerMessage::PenaltyApplied {
                user_id: offender.clone(),
                penalty_points: outcome.penalty_points,
                penalty_count: outcome.penalty_count,
            },
        );
        self.fanout.broadcast(
            &room_id,
            &ServerMessage::OvertimeGranted {
                user_id: offender.clone(),
                overtime_seconds,
            },
        );
        if outcome.forfeit {
            self.penalty_forfeit(room, &offender, now_ms).await;
        }
    }

    /// Automatic defeat: 100/0 to the non-offender, a judge notice, then
    /// the normal terminal path.
    pub(crate) async fn penalty_forfeit(&self, room: &mut Room, offender: &str, now_ms: i64) {
        let room_id = room.room_id.clone();
        let (winner_id, winner_is_agree, penalty_max) = {
            let Some(battle) = room.battle.as_mut() else {
                return;
            };
            let Some(winner_id) = battle.opponent_of(offender).map(str::to_string) else {
                return;
            };
            battle.mark_penalty_terminal();
            let winner_is_agree = winner_id == battle.agree_user_id;
            (winner_id, winner_is_agree, battle.settings.penalty_max)
        };
        let offender_name = room
            .participant(offender)
            .map_or_else(|| offender.to_string(), |p| p.display_name.clone());
        let notice = format!(
            "{offender_name}님이 벌점 {penalty_max}점에 도달하여 몰수패 처리되었습니다."
        );
        if let Some(battle) = room.battle.as_mut() {
            battle.append_message(Sender::Judge, &notice, now_ms);
            self.fanout.broadcast(
                &room_id,
                &ServerMessage::MessagesUpdated {
                    messages: battle.messages.snapshot(),
                },
            );
        }
        let verdict = forfeit_verdict(&winner_id, winner_is_agree, &notice);
        self.finalize_match(room, verdict).await;
    }

    /// Walkover: a match player left mid-match; the opponent wins.
    pub(crate) async fn conclude_walkover(&self, room: &mut Room, leaver: &Participant) {
        let room_id = room.room_id.clone();
        let now = self.clock.now_ms();
        let Some(winner_id) = room
            .battle
            .as_ref()
            .and_then(|b| b.opponent_of(&leaver.user_id).map(str::to_string))
        else {
            return;
        };
        let winner_name = room
            .participant(&winner_id)
            .map_or_else(|| winner_id.clone(), |p| p.display_name.clone());
        let notice = format!(
            "{}님이 퇴장하여 {winner_name}님의 승리로 처리되었습니다.",
            leaver.display_name
        );
        let Some(battle) = room.battle.as_mut() else {
            return;
        };
        battle.mark_terminal();
        let winner_is_agree = winner_id == battle.agree_user_id;
        battle.append_message(Sender::Judge, &notice, now);
        self.fanout.broadcast(
            &room_id,
            &ServerMessage::MessagesUpdated {
                messages: battle.messages.snapshot(),
            },
        );
        let verdict = forfeit_verdict(&winner_id, winner_is_agree, "상대방 퇴장");
        self.finalize_match(room, verdict).await;
    }

    /// Terminal processing: broadcast the verdict, persist the record,
    /// apply Elo once, then tear the match down. Nothing is emitted for
    /// this room after the teardown.
    pub(crate) async fn finalize_match(&self, room: &mut Room, verdict: Verdict) {
        let Some(battle) = room.battle.as_ref() else {
            return;
        };
        let room_id = room.room_id.clone();
        let winner_id = verdict.winner_user_id.clone();
        let loser_id = battle
            .opponent_of(&winner_id)
            .map_or_else(|| battle.disagree_user_id.clone(), str::to_string);
        let record = BattleRecord {
            player1: battle.agree_user_id.clone(),
            player2: battle.disagree_user_id.clone(),
            winner_id: winner_id.clone(),
            subject_id: room.subject.id.clone(),
            log_json: serde_json::to_string(&battle.log).unwrap_or_default(),
            verdict_json: serde_json::to_string(&verdict).unwrap_or_default(),
            created_at_ms: self.clock.now_ms(),
        };

        self.fanout.broadcast(
            &room_id,
            &ServerMessage::BattleResult {
                verdict: verdict.clone(),
            },
        );
        tracing::info!(room_id = %room_id, winner = %winner_id, "match finished");

        if let Err(err) = self.store.insert_battle(record).await {
            tracing::warn!(room_id = %room_id, error = %err, "failed to persist match record");
        }
        self.apply_elo(&winner_id, &loser_id).await;

        room.battle = None;
        room.is_completed = true;
    }

    async fn apply_elo(&self, winner_id: &str, loser_id: &str) {
        let (winner, loser) = match (
            self.store.get_profile(winner_id).await,
            self.store.get_profile(loser_id).await,
        ) {
            (Ok(winner), Ok(loser)) => (winner, loser),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "failed to load profiles for rating update");
                return;
            }
        };
        let update = toron_core::elo::apply(winner.rating, loser.rating);
        let winner_patch = ProfilePatch {
            rating: Some(update.winner_new),
            wins: Some(winner.wins + 1),
            ..ProfilePatch::default()
        };
        let loser_patch = ProfilePatch {
            rating: Some(update.loser_new),
            loses: Some(loser.loses + 1),
            ..ProfilePatch::default()
        };
        if let Err(err) = self.store.update_profile(winner_id, winner_patch).await {
            tracing::warn!(user_id = %winner_id, error = %err, "rating update failed");
        }
        if let Err(err) = self.store.update_profile(loser_id, loser_patch).await {
            tracing::warn!(user_id = %loser_id, error = %err, "rating update failed");
        }
    }
}
