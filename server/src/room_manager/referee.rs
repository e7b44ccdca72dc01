use shared::{Role, ServerMessage};
use toron_core::judgment::{blend, SideScores};

use crate::room_manager::{AppState, Room};

impl AppState {
    /// Validates a referee request against the room. Failures are targeted
    /// to the requester only.
    fn referee_check(&self, conn_id: &str, room: &Room, referee_id: &str) -> bool {
        let is_referee = room
            .participant(referee_id)
            .is_some_and(|p| p.role == Role::Referee);
        if !is_referee {
            self.fanout.send(
                conn_id,
                ServerMessage::RefereeError {
                    error: "심판만 사용할 수 있는 기능입니다.".to_string(),
                },
            );
            return false;
        }
        if room.battle.is_none() {
            self.fanout.send(
                conn_id,
                ServerMessage::RefereeError {
                    error: "진행 중인 토론이 없습니다.".to_string(),
                },
            );
            return false;
        }
        true
    }

    pub async fn handle_referee_add_points(
        &self,
        conn_id: &str,
        room_id: &str,
        target_user_id: &str,
        points: u32,
        referee_id: &str,
    ) {
        if !self.deduper.begin(conn_id, "referee_add_points") {
            return;
        }
        self.referee_add_points_inner(conn_id, room_id, target_user_id, points, referee_id)
            .await;
        self.deduper.end(conn_id, "referee_add_points");
    }

    async fn referee_add_points_inner(
        &self,
        conn_id: &str,
        room_id: &str,
        target_user_id: &str,
        points: u32,
        referee_id: &str,
    ) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        if !self.referee_check(conn_id, &room, referee_id) {
            return;
        }
        let Some(battle) = room.battle.as_mut() else {
            return;
        };
        let Some(penalty_points) = battle.add_points(target_user_id, points) else {
            return;
        };
        let penalty_count = battle
            .timer_of(target_user_id)
            .map_or(0, |t| t.penalty_count);
        tracing::info!(
            room_id = %room_id,
            target = %target_user_id,
            points,
            "referee restored points"
        );
        self.fanout.broadcast(
            room_id,
            &ServerMessage::PenaltyApplied {
                user_id: target_user_id.to_string(),
                penalty_points,
                penalty_count,
            },
        );
    }

    pub async fn handle_referee_deduct_points(
        &self,
        conn_id: &str,
        room_id: &str,
        target_user_id: &str,
        points: u32,
        referee_id: &str,
    ) {
        if !self.deduper.begin(conn_id, "referee_deduct_points") {
            return;
        }
        self.referee_deduct_points_inner(conn_id, room_id, target_user_id, points, referee_id)
            .await;
        self.deduper.end(conn_id, "referee_deduct_points");
    }

    async fn referee_deduct_points_inner(
        &self,
        conn_id: &str,
        room_id: &str,
        target_user_id: &str,
        points: u32,
        referee_id: &str,
    ) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        if !self.referee_check(conn_id, &room, referee_id) {
            return;
        }
        let outcome = {
            let Some(battle) = room.battle.as_mut() else {
                return;
            };
            let Some(outcome) = battle.deduct_points(target_user_id, points) else {
                return;
            };
            outcome
        };
        tracing::info!(
            room_id = %room_id,
            target = %target_user_id,
            points,
            "referee deducted points"
        );
        self.fanout.broadcast(
            room_id,
            &ServerMessage::PenaltyApplied {
                user_id: target_user_id.to_string(),
                penalty_points: outcome.penalty_points,
                penalty_count: outcome.penalty_count,
            },
        );
        if outcome.forfeit {
            let now = self.clock.now_ms();
            self.penalty_forfeit(&mut room, target_user_id, now).await;
        }
    }

    pub async fn handle_referee_extend_time(
        &self,
        conn_id: &str,
        room_id: &str,
        target_user_id: &str,
        seconds: i64,
        referee_id: &str,
    ) {
        if !self.deduper.begin(conn_id, "referee_extend_time") {
            return;
        }
        let Some(entry) = self.rooms.get(room_id) else {
            self.deduper.end(conn_id, "referee_extend_time");
            return;
        };
        let mut room = entry.write().await;
        if self.referee_check(conn_id, &room, referee_id) {
            if let Some(total_used) = room
                .battle
                .as_mut()
                .and_then(|b| b.extend_time(target_user_id, seconds))
            {
                self.fanout.broadcast(
                    room_id,
                    &ServerMessage::TimeExtended {
                        user_id: target_user_id.to_string(),
                        seconds,
                        total_time_used_sec: total_used / 1000,
                    },
                );
            }
        }
        drop(room);
        self.deduper.end(conn_id, "referee_extend_time");
    }

    pub async fn handle_referee_reduce_time(
        &self,
        conn_id: &str,
        room_id: &str,
        target_user_id: &str,
        seconds: i64,
        referee_id: &str,
    ) {
        if !self.deduper.begin(conn_id, "referee_reduce_time") {
            return;
        }
        let Some(entry) = self.rooms.get(room_id) else {
            self.deduper.end(conn_id, "referee_reduce_time");
            return;
        };
        let mut room = entry.write().await;
        if self.referee_check(conn_id, &room, referee_id) {
            if let Some(total_used) = room
                .battle
                .as_mut()
                .and_then(|b| b.reduce_time(target_user_id, seconds))
            {
                self.fanout.broadcast(
                    room_id,
                    &ServerMessage::TimeReduced {
                        user_id: target_user_id.to_string(),
                        seconds,
                        total_time_used_sec: total_used / 1000,
                    },
                );
            }
        }
        drop(room);
        self.deduper.end(conn_id, "referee_reduce_time");
    }

    /// Human scores blend into the AI verdict and close the match.
    pub async fn handle_referee_submit_scores(
        &self,
        conn_id: &str,
        room_id: &str,
        scores: SideScores,
        referee_id: &str,
    ) {
        if !self.deduper.begin(conn_id, "referee_submit_scores") {
            return;
        }
        self.referee_submit_scores_inner(conn_id, room_id, scores, referee_id)
            .await;
        self.deduper.end(conn_id, "referee_submit_scores");
    }

    async fn referee_submit_scores_inner(
        &self,
        conn_id: &str,
        room_id: &str,
        scores: SideScores,
        referee_id: &str,
    ) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        if !self.referee_check(conn_id, &room, referee_id) {
            return;
        }
        let blended = {
            let Some(battle) = room.battle.as_mut() else {
                return;
            };
            let Some(ai_verdict) = battle.ai_verdict.as_ref() else {
                self.fanout.send(
                    conn_id,
                    ServerMessage::RefereeError {
                        error: "AI 판정이 아직 도착하지 않았습니다.".to_string(),
                    },
                );
                return;
            };
            battle.human_scores = Some(scores);
            blend(
                ai_verdict,
                scores,
                &battle.agree_user_id,
                &battle.disagree_user_id,
            )
        };
        tracing::info!(room_id = %room_id, "referee scores submitted, blending verdict");
        self.finalize_match(&mut room, blended).await;
    }
}
