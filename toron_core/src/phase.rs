use serde::{Deserialize, Serialize};

/// Debate side. Serialised as the wire tokens "agree"/"disagree".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Agree,
    Disagree,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::Agree => Side::Disagree,
            Side::Disagree => Side::Agree,
        }
    }

    /// Korean label used in user-facing text.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Side::Agree => "찬성",
            Side::Disagree => "반대",
        }
    }
}

/// Stage indices of the turn protocol. 0 is the pre-debate waiting stage,
/// 1..=9 are speaking turns, 10 is the AI evaluation stage and 11 is the
/// sentinel for a match terminated by penalty overflow.
pub const STAGE_WAITING: u8 = 0;
pub const STAGE_FIRST_TURN: u8 = 1;
pub const STAGE_LAST_TURN: u8 = 9;
pub const STAGE_EVALUATION: u8 = 10;
pub const STAGE_PENALTY_TERMINAL: u8 = 11;

/// Which side speaks at a given stage. `None` outside speaking turns.
#[must_use]
pub fn speaker_side(stage: u8) -> Option<Side> {
    match stage {
        1 | 4 | 6 | 8 => Some(Side::Agree),
        2 | 3 | 5 | 7 | 9 => Some(Side::Disagree),
        _ => None,
    }
}

#[must_use]
pub fn stage_description(stage: u8) -> &'static str {
    match stage {
        0 => "대기 중",
        1 => "찬성측 입론",
        2 => "반대측 입론",
        3 => "반대측 질의",
        4 => "찬성측 답변 및 질의",
        5 => "반대측 답변 및 질의",
        6 => "찬성측 답변 및 질의",
        7 => "반대측 답변",
        8 => "찬성측 최종변론",
        9 => "반대측 최종변론",
        10 => "AI 판정",
        _ => "토론 종료",
    }
}

/// System announcement for the start of a speaking turn.
#[must_use]
pub fn turn_announcement(side: Side, display_name: &str) -> String {
    format!("{}측 {}님의 대표발언 차례입니다.", side.label(), display_name)
}
