use serde::{Deserialize, Serialize};

/// Per-side evaluation: a 0..=100 score plus prose strengths/weaknesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideVerdict {
    pub score: u32,
    #[serde(default)]
    pub good: String,
    #[serde(default)]
    pub bad: String,
}

/// Final evaluation of a match. `winner_user_id` is always a user id; the
/// judge's "agree"/"disagree" tokens are normalised before this is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub agree: SideVerdict,
    pub disagree: SideVerdict,
    pub winner_user_id: String,
}

/// Referee score submission, one raw score per side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideScores {
    pub agree: u32,
    pub disagree: u32,
}

fn blend_score(ai: u32, human: u32) -> u32 {
    let blended = (f64::from(ai) * 0.4 + f64::from(human) * 0.6).round();
    blended.clamp(0.0, 100.0) as u32
}

/// Blends the AI verdict with referee scores: `round(0.4·AI + 0.6·human)`
/// per side. The winner is recomputed from the blended scores; a tie keeps
/// the AI winner.
#[must_use]
pub fn blend(
    ai: &Verdict,
    human: SideScores,
    agree_user_id: &str,
    disagree_user_id: &str,
) -> Verdict {
    let agree_score = blend_score(ai.agree.score, human.agree);
    let disagree_score = blend_score(ai.disagree.score, human.disagree);
    let winner_user_id = if agree_score > disagree_score {
        agree_user_id.to_string()
    } else if disagree_score > agree_score {
        disagree_user_id.to_string()
    } else {
        ai.winner_user_id.clone()
    };
    Verdict {
        agree: SideVerdict {
            score: agree_score,
            ..ai.agree.clone()
        },
        disagree: SideVerdict {
            score: disagree_score,
            ..ai.disagree.clone()
        },
        winner_user_id,
    }
}

/// 100/0 verdict awarded to the non-offending side when a match ends by
/// penalty overflow or walkover.
#[must_use]
pub fn forfeit_verdict(winner_user_id: &str, winner_is_agree: bool, reason: &str) -> Verdict {
    let winning = SideVerdict {
        score: 100,
        good: String::new(),
        bad: String::new(),
    };
    let losing = SideVerdict {
        score: 0,
        good: String::new(),
        bad: reason.to_string(),
    };
    let (agree, disagree) = if winner_is_agree {
        (winning, losing)
    } else {
        (losing, winning)
    };
    Verdict {
        agree,
        disagree,
        winner_user_id: winner_user_id.to_string(),
    }
}
