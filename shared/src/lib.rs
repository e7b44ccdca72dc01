use serde::{Deserialize, Serialize};

use toron_core::judgment::{SideScores, Verdict};
use toron_core::log::ChatMessage;
use toron_core::timer::{OverflowKind, TimerSnapshot};

/// What a participant is in a room. A referee slot requires an admin user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Spectator,
    Referee,
}

/// Debate position of a Player. Absent means not chosen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Agree,
    Disagree,
}

impl Position {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Position::Agree => Position::Disagree,
            Position::Disagree => Position::Agree,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectView {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub user_id: String,
    pub display_name: String,
    pub rating: f64,
    pub wins: u32,
    pub loses: u32,
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub position: Option<Position>,
    pub is_ready: bool,
    pub rating: f64,
    pub wins: u32,
    pub loses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: String,
    pub subject: SubjectView,
    pub participants: Vec<ParticipantView>,
    pub battle_started: bool,
    pub is_completed: bool,
    pub has_referee: bool,
}

/// Consolidated resync state for a late joiner or reconnecting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub stage: u8,
    pub stage_description: String,
    pub messages: Vec<ChatMessage>,
    pub current_turn_user_id: Option<String>,
    pub is_my_turn: bool,
    pub timer: Option<TimerSnapshot>,
    pub my_penalty_count: u32,
    pub opponent_penalty_count: u32,
    pub players: Vec<ParticipantView>,
    pub battle_finished: bool,
}

/// Client → server events, one variant per named operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    GetSubjects,
    GetRooms,
    GetMyRoom {
        #[serde(rename = "userId")]
        user_id: String,
    },
    GetUserProfile {
        #[serde(rename = "userId")]
        user_id: String,
    },
    CreateRoom {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    SelectRole {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        role: Role,
    },
    SelectPosition {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        position: Option<Position>,
    },
    PlayerReady {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    JoinDiscussionRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    DiscussionViewReady {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    SendMessage {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        message: String,
    },
    TimeOverflow {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "type")]
        kind: OverflowKind,
    },
    GetMessages {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    GetRoomState {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    RefereeAddPoints {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        points: u32,
        #[serde(rename = "refereeId")]
        referee_id: String,
    },
    RefereeDeductPoints {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        points: u32,
        #[serde(rename = "refereeId")]
        referee_id: String,
    },
    RefereeExtendTime {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        seconds: i64,
        #[serde(rename = "refereeId")]
        referee_id: String,
    },
    RefereeReduceTime {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        seconds: i64,
        #[serde(rename = "refereeId")]
        referee_id: String,
    },
    RefereeSubmitScores {
        #[serde(rename = "roomId")]
        room_id: String,
        scores: SideScores,
        #[serde(rename = "refereeId")]
        referee_id: String,
    },
}

/// Server → client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Subjects {
        subjects: Vec<SubjectView>,
    },
    RoomsUpdate {
        rooms: Vec<RoomView>,
    },
    MyRoom {
        room: Option<RoomView>,
    },
    UserProfile {
        profile: Option<ProfileView>,
    },
    RoomUpdate {
        room: RoomView,
    },
    RequestError {
        error: String,
    },
    RoleError {
        error: String,
    },
    RefereeError {
        error: String,
    },
    BattleStart {
        room: RoomView,
    },
    BattleError {
        message: String,
    },
    AiJudgeMessage {
        message: String,
        stage: u8,
    },
    MessagesUpdated {
        messages: Vec<ChatMessage>,
    },
    TurnInfo {
        #[serde(rename = "currentPlayerId")]
        current_player_id: Option<String>,
        stage: u8,
        message: String,
        #[serde(rename = "stageDescription")]
        stage_description: String,
    },
    TimerUpdate(TimerSnapshot),
    PenaltyApplied {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "penaltyPoints")]
        penalty_points: u32,
        #[serde(rename = "penaltyCount")]
        penalty_count: u32,
    },
    OvertimeGranted {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "overtimeSeconds")]
        overtime_seconds: i64,
    },
    TimeExtended {
        #[serde(rename = "userId")]
        user_id: String,
        seconds: i64,
        #[serde(rename = "totalTimeUsedSec")]
        total_time_used_sec: i64,
    },
    TimeReduced {
        #[serde(rename = "userId")]
        user_id: String,
        seconds: i64,
        #[serde(rename = "totalTimeUsedSec")]
        total_time_used_sec: i64,
    },
    PlayerListUpdated {
        players: Vec<ParticipantView>,
    },
    PositionSelected {
        #[serde(rename = "userId")]
        user_id: String,
        position: Option<Position>,
    },
    RoleSelected {
        #[serde(rename = "userId")]
        user_id: String,
        role: Role,
    },
    BattleResult {
        verdict: Verdict,
    },
    ShowRefereeScoreModal {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    RoomStateUpdated {
        snapshot: RoomSnapshot,
    },
}
