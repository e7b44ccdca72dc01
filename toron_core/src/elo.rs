/// Rating update applied once per match. The K factor follows a continuous
/// logistic so that low-rated players move faster than established ones.
const K_SCALE: f64 = 35.011_579_6;
const K_MIDPOINT: f64 = 1_930.633_278_81;
const K_SLOPE: f64 = 240.648_532_94;
const K_FLOOR: f64 = 9.999_898_87;

#[must_use]
pub fn k_factor(rating: f64) -> f64 {
    K_SCALE / (1.0 + ((rating - K_MIDPOINT) / K_SLOPE).exp()) + K_FLOOR
}

#[must_use]
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

#[derive(Debug, Clone, Copy)]
pub struct EloUpdate {
    pub winner_new: f64,
    pub loser_new: f64,
}

/// New ratings after a decisive result. Ratings stay real-valued; rounding,
/// if any, happens at persistence.
#[must_use]
pub fn apply(winner_rating: f64, loser_rating: f64) -> EloUpdate {
    let winner_expected = expected_score(winner_rating, loser_rating);
    let loser_expected = expected_score(loser_rating, winner_rating);
    EloUpdate {
        winner_new: winner_rating + k_factor(winner_rating) * (1.0 - winner_expected),
        loser_new: loser_rating + k_factor(loser_rating) * (0.0 - loser_expected),
    }
}
