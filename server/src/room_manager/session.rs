use shared::{ParticipantView, Position, ProfileView, Role, RoomView, SubjectView};
use toron_core::battle::BattleState;

/// One user's slot in a room. A user holds at most one slot per room;
/// reconnection rebinds `connection_id` in place.
#[derive(Debug, Clone)]
pub struct Participant {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: String,
    pub is_admin: bool,
    pub role: Role,
    pub position: Option<Position>,
    pub is_ready: bool,
    pub discussion_view_ready: bool,
    pub rating_snapshot: f64,
    pub wins_snapshot: u32,
    pub loses_snapshot: u32,
}

impl Participant {
    pub fn from_profile(profile: &ProfileView, connection_id: &str, role: Role) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            user_id: profile.user_id.clone(),
            display_name: profile.display_name.clone(),
            is_admin: profile.is_admin,
            role,
            position: None,
            is_ready: false,
            discussion_view_ready: false,
            rating_snapshot: profile.rating,
            wins_snapshot: profile.wins,
            loses_snapshot: profile.loses,
        }
    }

    pub fn view(&self) -> ParticipantView {
        ParticipantView {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            position: self.position,
            is_ready: self.is_ready,
            rating: self.rating_snapshot,
            wins: self.wins_snapshot,
            loses: self.loses_snapshot,
        }
    }
}

/// A debate room. Owns its participants; the running match holds player
/// references by user id only.
pub struct Room {
    pub room_id: String,
    pub subject: SubjectView,
    pub participants: Vec<Participant>,
    pub battle_started: bool,
    pub is_completed: bool,
    pub has_referee: bool,
    pub battle: Option<BattleState>,
}

impl Room {
    pub fn new(room_id: &str, subject: SubjectView) -> Self {
        Self {
            room_id: room_id.to_string(),
            subject,
            participants: Vec::new(),
            battle_started: false,
            is_completed: false,
            has_referee: false,
            battle: None,
        }
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// Players in join order.
    pub fn players(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.role == Role::Player)
    }

    pub fn referee(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.role == Role::Referee)
    }

    pub fn recompute_referee_flag(&mut self) {
        self.has_referee = self.referee().is_some();
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            room_id: self.room_id.clone(),
            subject: self.subject.clone(),
            participants: self.participants.iter().map(Participant::view).collect(),
            battle_started: self.battle_started,
            is_completed: self.is_completed,
            has_referee: self.has_referee,
        }
    }

    pub fn participant_views(&self) -> Vec<ParticipantView> {
        self.participants.iter().map(Participant::view).collect()
    }

    /// Fills missing player positions ahead of the 0→1 transition: the
    /// complement when one side is chosen, join order otherwise.
    pub fn assign_positions(&mut self) {
        let taken = self.players().find_map(|p| p.position);
        // First joiner opens as agree when nobody picked a side.
        let mut fill = taken.map_or(Position::Agree, Position::opposite);
        for p in self
            .participants
            .iter_mut()
            .filter(|p| p.role == Role::Player)
        {
            if p.position.is_none() {
                p.position = Some(fill);
                fill = fill.opposite();
            }
        }
    }

    /// The (agree, disagree) player pair once positions are assigned.
    pub fn position_pair(&self) -> Option<(String, String)> {
        let agree = self
            .players()
            .find(|p| p.position == Some(Position::Agree))?
            .user_id
            .clone();
        let disagree = self
            .players()
            .find(|p| p.position == Some(Position::Disagree))?
            .user_id
            .clone();
        Some((agree, disagree))
    }
}
