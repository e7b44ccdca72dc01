use shared::{Position, Role, RoomView, ServerMessage, SubjectView};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::room_manager::session::{Participant, Room};
use crate::room_manager::AppState;
use crate::store::StoreError;

/// Request-boundary failure. Everything here is recovered by answering the
/// requester; no state changes on the failing path.
#[derive(Debug)]
pub enum RequestFailure {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
}

impl From<StoreError> for RequestFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => RequestFailure::NotFound(what),
            StoreError::Conflict(what) => RequestFailure::Conflict(what),
            StoreError::Transient(what) => RequestFailure::BadRequest(what),
        }
    }
}

/// Served when the subject store is down (`get_subjects` only).
pub fn builtin_subjects() -> Vec<SubjectView> {
    let topics = [
        ("1", "인공지능은 인간의 일자리를 대체할 것이다"),
        ("2", "사형제도는 폐지되어야 한다"),
        ("3", "청소년의 SNS 사용은 제한되어야 한다"),
        ("4", "동물원은 폐지되어야 한다"),
        ("5", "주 4일 근무제를 도입해야 한다"),
    ];
    topics
        .into_iter()
        .map(|(id, title)| SubjectView {
            id: id.to_string(),
            title: title.to_string(),
            body: format!("'{title}'를 주제로 찬성과 반대로 나뉘어 토론합니다."),
        })
        .collect()
}

impl AppState {
    pub(crate) fn reject(&self, conn_id: &str, failure: RequestFailure) {
        let msg = match failure {
            RequestFailure::BadRequest(error)
            | RequestFailure::NotFound(error)
            | RequestFailure::Conflict(error) => ServerMessage::RequestError { error },
            RequestFailure::Forbidden(error) => ServerMessage::RoleError { error },
        };
        self.fanout.send(conn_id, msg);
    }

    fn duplicate_request(&self, conn_id: &str) {
        self.reject(
            conn_id,
            RequestFailure::Conflict("이미 처리 중인 요청입니다.".to_string()),
        );
    }

    /// Public room enumeration for the lobby.
    pub async fn rooms_index(&self) -> Vec<RoomView> {
        let mut rooms = Vec::new();
        for entry in self.rooms.iter() {
            let room = entry.value().read().await;
            if !room.is_completed {
                rooms.push(room.view());
            }
        }
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    async fn broadcast_rooms_update(&self) {
        let rooms = self.rooms_index().await;
        self.fanout
            .broadcast_all(&ServerMessage::RoomsUpdate { rooms });
    }

    pub async fn handle_get_subjects(&self, conn_id: &str) {
        let subjects = match self.store.list_subjects().await {
            Ok(subjects) if !subjects.is_empty() => subjects,
            Ok(_) => builtin_subjects(),
            Err(StoreError::Transient(reason)) => {
                tracing::warn!(%reason, "subject store unavailable, serving built-in list");
                builtin_subjects()
            }
            Err(err) => {
                self.reject(conn_id, err.into());
                return;
            }
        };
        self.fanout
            .send(conn_id, ServerMessage::Subjects { subjects });
    }

    pub async fn handle_get_rooms(&self, conn_id: &str) {
        let rooms = self.rooms_index().await;
        self.fanout
            .send(conn_id, ServerMessage::RoomsUpdate { rooms });
    }

    pub async fn handle_get_my_room(&self, conn_id: &str, user_id: &str) {
        self.bind_session(conn_id, user_id);
        let mut found = None;
        for entry in self.rooms.iter() {
            let room = entry.value().read().await;
            if !room.is_completed && room.participant(user_id).is_some() {
                found = Some(room.view());
                break;
            }
        }
        self.fanout
            .send(conn_id, ServerMessage::MyRoom { room: found });
    }

    pub async fn handle_get_user_profile(&self, conn_id: &str, user_id: &str) {
        self.bind_session(conn_id, user_id);
        match self.store.get_profile(user_id).await {
            Ok(profile) => {
                self.fanout.send(
                    conn_id,
                    ServerMessage::UserProfile {
                        profile: Some(profile),
                    },
                );
            }
            Err(StoreError::NotFound(_)) => {
                self.fanout
                    .send(conn_id, ServerMessage::UserProfile { profile: None });
            }
            Err(err) => self.reject(conn_id, err.into()),
        }
    }

    pub async fn handle_create_room(&self, conn_id: &str, user_id: &str, subject_id: &str) {
        if !self.deduper.begin(conn_id, "create_room") {
            self.duplicate_request(conn_id);
            return;
        }
        let result = self.create_room_inner(conn_id, user_id, subject_id).await;
        self.deduper.end(conn_id, "create_room");
        if let Err(failure) = result {
            self.reject(conn_id, failure);
        }
    }

    async fn create_room_inner(
        &self,
        conn_id: &str,
        user_id: &str,
        subject_id: &str,
    ) -> Result<(), RequestFailure> {
        self.bind_session(conn_id, user_id);
        let profile = self.store.get_profile(user_id).await?;
        let subject = self.store.get_subject(subject_id).await?;

        let room_id = Uuid::new_v4().to_string();
        let role = if profile.is_admin {
            Role::Referee
        } else {
            Role::Player
        };
        let mut room = Room::new(&room_id, subject);
        room.participants
            .push(Participant::from_profile(&profile, conn_id, role));
        room.recompute_referee_flag();
        let view = room.view();

        tracing::info!(room_id = %room_id, user_id = %user_id, "room created");
        self.rooms.insert(room_id.clone(), RwLock::new(room));
        self.fanout.join_channel(&room_id, conn_id);
        self.fanout
            .send(conn_id, ServerMessage::RoomUpdate { room: view });
        self.broadcast_rooms_update().await;
        Ok(())
    }

    pub async fn handle_join_room(&self, conn_id: &str, room_id: &str, user_id: &str) {
        if !self.deduper.begin(conn_id, "join_room") {
            self.duplicate_request(conn_id);
            return;
        }
        let result = self.join_room_inner(conn_id, room_id, user_id).await;
        self.deduper.end(conn_id, "join_room");
        if let Err(failure) = result {
            self.reject(conn_id, failure);
        }
    }

    async fn join_room_inner(
        &self,
        conn_id: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), RequestFailure> {
        self.bind_session(conn_id, user_id);
        let profile = self.store.get_profile(user_id).await?;
        let entry = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RequestFailure::NotFound("존재하지 않는 방입니다.".to_string()))?;
        let mut room = entry.write().await;

        let view = if let Some(existing) = room.participant_mut(user_id) {
            // Already present: refresh the connection binding only.
            let old_conn = std::mem::replace(&mut existing.connection_id, conn_id.to_string());
            self.fanout.leave_channel(room_id, &old_conn);
            room.view()
        } else {
            if room.battle_started {
                return Err(RequestFailure::Conflict(
                    "이미 시작된 토론입니다.".to_string(),
                ));
            }
            let role = if room.players().count() < 2 {
                Role::Player
            } else {
                Role::Spectator
            };
            room.participants
                .push(Participant::from_profile(&profile, conn_id, role));
            room.view()
        };

        self.fanout.join_channel(room_id, conn_id);
        self.fanout
            .broadcast(room_id, &ServerMessage::RoomUpdate { room: view });
        drop(room);
        drop(entry);
        self.broadcast_rooms_update().await;
        Ok(())
    }

    pub async fn handle_leave_room(&self, conn_id: &str, room_id: &str, user_id: &str) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let mut room = entry.write().await;
        let Some(index) = room.participants.iter().position(|p| p.user_id == user_id) else {
            return;
        };
        let leaver = room.participants.remove(index);
        self.fanout.leave_channel(room_id, &leaver.connection_id);
        self.fanout.leave_channel(room_id, conn_id);
        tracing::info!(room_id = %room_id, user_id = %user_id, "participant left");

        if room.participants.is_empty() {
            room.battle = None;
            drop(room);
            drop(entry);
            self.rooms.remove(room_id);
            self.fanout.drop_channel(room_id);
            self.broadcast_rooms_update().await;
            return;
        }

        let was_match_player = room
            .battle
            .as_ref()
            .is_some_and(|b| b.side_of(&leaver.user_id).is_some() && !b.is_terminal());
        if was_match_player {
            self.conclude_walkover(&mut room, &leaver).await;
        } else {
            for p in &mut room.participants {
                p.is_ready = false;
            }
        }
        room.recompute_referee_flag();

        // A referee leaving after the AI verdict stops gating the result.
        if !room.has_referee {
            let pending = room
                .battle
                .as_ref()
                .filter(|b| !b.is_terminal())
                .and_then(|b| b.ai_verdict.clone());
            if let Some(verdict) = pending {
                self.finalize_match(&mut room, verdict).await;
            }
        }

        let view = room.view();
        self.fanout
            .broadcast(room_id, &ServerMessage::RoomUpdate { room: view });
        drop(room);
        drop(entry);
        self.broadcast_rooms_update().await;
    }

    pub async fn handle_select_role(&self, conn_id: &str, room_id: &str, user_id: &str, role: Role) {
        if !self.deduper.begin(conn_id, "select_role") {
            self.duplicate_request(conn_id);
            return;
        }
        let result = self.select_role_inner(room_id, user_id, role).await;
        self.deduper.end(conn_id, "select_role");
        if let Err(failure) = result {
            self.reject(conn_id, failure);
        }
    }

    async fn select_role_inner(
        &self,
        room_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), RequestFailure> {
        let entry = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RequestFailure::NotFound("존재하지 않는 방입니다.".to_string()))?;
        let mut room = entry.write().await;
        let participant = room
            .participant(user_id)
            .ok_or_else(|| RequestFailure::NotFound("방에 참가하지 않았습니다.".to_string()))?;

        if role == Role::Referee {
            if !participant.is_admin {
                return Err(RequestFailure::Forbidden(
                    "심판은 관리자만 맡을 수 있습니다.".to_string(),
                ));
            }
            if room.referee().is_some_and(|r| r.user_id != user_id) {
                return Err(RequestFailure::Forbidden(
                    "이미 심판이 있는 방입니다.".to_string(),
                ));
            }
        }

        if let Some(p) = room.participant_mut(user_id) {
            p.role = role;
            p.position = None;
            p.is_ready = false;
        }
        room.recompute_referee_flag();
        let view = room.view();
        self.fanout.broadcast(
            room_id,
            &ServerMessage::RoleSelected {
                user_id: user_id.to_string(),
                role,
            },
        );
        self.fanout
            .broadcast(room_id, &ServerMessage::RoomUpdate { room: view });
        Ok(())
    }

    pub async fn handle_select_position(
        &self,
        conn_id: &str,
        room_id: &str,
        user_id: &str,
        position: Option<Position>,
    ) {
        if !self.deduper.begin(conn_id, "select_position") {
            self.duplicate_request(conn_id);
            return;
        }
        let result = self.select_position_inner(room_id, user_id, position).await;
        self.deduper.end(conn_id, "select_position");
        if let Err(failure) = result {
            self.reject(conn_id, failure);
        }
    }

    async fn select_position_inner(
        &self,
        room_id: &str,
        user_id: &str,
        position: Option<Position>,
    ) -> Result<(), RequestFailure> {
        let entry = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RequestFailure::NotFound("존재하지 않는 방입니다.".to_string()))?;
        let mut room = entry.write().await;
        let participant = room
            .participant(user_id)
            .ok_or_else(|| RequestFailure::NotFound("방에 참가하지 않았습니다.".to_string()))?;
        if participant.role != Role::Player {
            return Err(RequestFailure::Forbidden(
                "토론자만 입장을 선택할 수 있습니다.".to_string(),
            ));
        }

        let held = participant.position;
        let new_position = match position {
            // Re-selecting the held position clears it.
            Some(p) if held == Some(p) => None,
            Some(p) => {
                let taken_by_other = room
                    .players()
                    .any(|other| other.user_id != user_id && other.position == Some(p));
                if taken_by_other {
                    return Err(RequestFailure::BadRequest(
                        "이미 선택된 입장입니다.".to_string(),
                    ));
                }
                Some(p)
            }
            None => None,
        };

        if let Some(p) = room.participant_mut(user_id) {
            p.position = new_position;
        }
        let view = room.view();
        self.fanout.broadcast(
            room_id,
            &ServerMessage::PositionSelected {
                user_id: user_id.to_string(),
                position: new_position,
            },
        );
        self.fanout
            .broadcast(room_id, &ServerMessage::RoomUpdate { room: view });
        Ok(())
    }

    pub async fn handle_player_ready(&self, conn_id: &str, room_id: &str, user_id: &str) {
        if !self.deduper.begin(conn_id, "player_ready") {
            self.duplicate_request(conn_id);
            return;
        }
        let result = self.player_ready_inner(room_id, user_id).await;
        self.deduper.end(conn_id, "player_ready");
        if let Err(failure) = result {
            self.reject(conn_id, failure);
        }
    }

    async fn player_ready_inner(&self, room_id: &str, user_id: &str) -> Result<(), RequestFailure> {
        let entry = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RequestFailure::NotFound("존재하지 않는 방입니다.".to_string()))?;
        let mut room = entry.write().await;
        {
            let participant = room
                .participant_mut(user_id)
                .ok_or_else(|| RequestFailure::NotFound("방에 참가하지 않았습니다.".to_string()))?;
            participant.is_ready = !participant.is_ready;
        }

        let ready_players = room
            .players()
            .filter(|p| p.is_ready)
            .count();
        let starting = !room.battle_started && ready_players >= 2;
        if starting {
            room.battle_started = true;
            tracing::info!(room_id = %room_id, "battle starting");
        }
        let view = room.view();
        self.fanout
            .broadcast(room_id, &ServerMessage::RoomUpdate { room: view.clone() });
        if starting {
            self.fanout
                .broadcast(room_id, &ServerMessage::BattleStart { room: view });
        }
        drop(room);
        drop(entry);
        if starting {
            self.broadcast_rooms_update().await;
        }
        Ok(())
    }
}
