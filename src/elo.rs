use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{Match, MatchResult};

pub const INITIAL_RATING: f64 = 1500.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloConfig {
    pub k: f64,
    /// Rating points credited to the side that won the toss.
    pub toss_adv_pts: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            toss_adv_pts: 10.0,
        }
    }
}

/// Replays results in date order and returns each team's rating after the last match
/// played strictly before `until` (every match when `None`).
///
/// No-results carry no information and are skipped. Super-over decisions count as wins.
pub fn compute_elo(
    matches: &[Match],
    until: Option<NaiveDate>,
    cfg: EloConfig,
) -> HashMap<String, f64> {
    let mut ordered: Vec<&Match> = matches
        .iter()
        .filter(|m| until.is_none_or(|d| m.date < d))
        .filter(|m| !matches!(m.result, MatchResult::NoResult))
        .collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

    let mut elo: HashMap<String, f64> = HashMap::new();
    for m in ordered {
        let [a, b] = &m.teams;
        let ra = *elo.entry(a.clone()).or_insert(INITIAL_RATING);
        let rb = *elo.entry(b.clone()).or_insert(INITIAL_RATING);

        let toss_a = match &m.toss {
            Some(t) if t.winner == *a => cfg.toss_adv_pts,
            Some(_) => -cfg.toss_adv_pts,
            None => 0.0,
        };
        let expected_a = expected_score(ra + toss_a, rb);
        let s_a = match m.winner() {
            Some(w) if w == a => 1.0,
            Some(_) => 0.0,
            None => 0.5,
        };

        let delta = cfg.k * (s_a - expected_a);
        elo.insert(a.clone(), ra + delta);
        elo.insert(b.clone(), rb - delta);
    }

    elo
}

pub fn rating(table: &HashMap<String, f64>, team: &str) -> f64 {
    table.get(team).copied().unwrap_or(INITIAL_RATING)
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_expect_even_score() {
        assert!((expected_score(1500.0, 1500.0) - 0.5).abs() < 1e-12);
        assert!(expected_score(1600.0, 1500.0) > 0.6);
    }
}
