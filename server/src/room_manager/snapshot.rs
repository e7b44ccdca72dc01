use shared::{RoomSnapshot, ServerMessage};
use toron_core::phase::{stage_description, STAGE_PENALTY_TERMINAL};

use crate::room_manager::registry::RequestFailure;
use crate::room_manager::AppState;

impl AppState {
    /// Full message list for the room, targeted to the requester.
    pub async fn handle_get_messages(&self, conn_id: &str, room_id: &str) {
        let Some(entry) = self.rooms.get(room_id) else {
            self.reject(
                conn_id,
                RequestFailure::NotFound("존재하지 않는 방입니다.".to_string()),
            );
            return;
        };
        let room = entry.read().await;
        let messages = room
            .battle
            .as_ref()
            .map(|b| b.messages.snapshot())
            .unwrap_or_default();
        self.fanout
            .send(conn_id, ServerMessage::MessagesUpdated { messages });
    }

    /// Consolidated resync snapshot for a (re)joining client. Without a
    /// running match this answers with a terminal-looking state.
    pub async fn handle_get_room_state(&self, conn_id: &str, room_id: &str, user_id: &str) {
        self.bind_session(conn_id, user_id);
        let Some(entry) = self.rooms.get(room_id) else {
            self.reject(
                conn_id,
                RequestFailure::NotFound("존재하지 않는 방입니다.".to_string()),
            );
            return;
        };
        let room = entry.read().await;
        let players = room.participant_views();
        let now = self.clock.now_ms();

        let snapshot = match room.battle.as_ref() {
            Some(battle) if !battle.is_terminal() => {
                let current = battle.current_speaker().map(str::to_string);
                let my_penalty_count = battle.timer_of(user_id).map_or(0, |t| t.penalty_count);
                let opponent_penalty_count = battle
                    .opponent_of(user_id)
                    .and_then(|opponent| battle.timer_of(opponent))
                    .map_or(0, |t| t.penalty_count);
                RoomSnapshot {
                    room_id: room.room_id.clone(),
                    stage: battle.stage,
                    stage_description: stage_description(battle.stage).to_string(),
                    messages: battle.messages.snapshot(),
                    is_my_turn: current.as_deref() == Some(user_id),
                    current_turn_user_id: current,
                    timer: battle.speaker_snapshot(now),
                    my_penalty_count,
                    opponent_penalty_count,
                    players,
                    battle_finished: false,
                }
            }
            _ => RoomSnapshot {
                room_id: room.room_id.clone(),
                stage: STAGE_PENALTY_TERMINAL,
                stage_description: stage_description(STAGE_PENALTY_TERMINAL).to_string(),
                messages: Vec::new(),
                current_turn_user_id: None,
                is_my_turn: false,
                timer: None,
                my_penalty_count: 0,
                opponent_penalty_count: 0,
                players,
                battle_finished: true,
            },
        };
        self.fanout
            .send(conn_id, ServerMessage::RoomStateUpdated { snapshot });
    }
}
