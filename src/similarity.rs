use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{AggregationEngine, PlayerAggregate};
use crate::error::NoDataError;
use crate::model::{PlayerId, PlayerRole};

/// Numeric profile dimensions, in vector order. Role one-hot follows.
pub const PROFILE_DIMS: [&str; 7] = [
    "batting_average",
    "strike_rate",
    "boundary_pct",
    "dot_pct",
    "economy",
    "bowling_strike_rate",
    "wickets_per_innings",
];
const NUMERIC_DIMS: usize = PROFILE_DIMS.len();
const DIMS: usize = NUMERIC_DIMS + PlayerRole::ALL.len();

/// Averages above this are treated as equal; a few high not-out scores otherwise dominate.
const AVERAGE_CAP: f64 = 100.0;
/// Bowling strike rate assigned to players who bowled without taking a wicket.
const WICKETLESS_STRIKE_RATE: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Profile {
    player: PlayerId,
    role: PlayerRole,
    innings: u32,
    raw: [f64; NUMERIC_DIMS],
    vector: [f64; DIMS],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPlayer {
    pub player: PlayerId,
    pub name: Option<String>,
    pub role: PlayerRole,
    pub similarity: f64,
    pub innings: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPlayers {
    pub player: PlayerId,
    /// The query player is below the minimum-innings threshold.
    pub low_confidence: bool,
    pub results: Vec<SimilarPlayer>,
}

/// Career style vectors for nearest-neighbour lookups.
#[derive(Debug)]
pub struct SimilarityIndex {
    profiles: Vec<Profile>,
    by_player: HashMap<PlayerId, usize>,
    names: HashMap<PlayerId, String>,
    min_innings: u32,
}

impl SimilarityIndex {
    pub fn build(aggregates: &AggregationEngine, min_innings: u32) -> Self {
        let store = aggregates.store();
        let table = aggregates.career_table();

        let mut profiles: Vec<Profile> = table
            .par_iter()
            .filter_map(|agg| {
                let role = store.player(agg.player)?.role;
                Some(Profile {
                    player: agg.player,
                    role,
                    innings: agg.innings_played(),
                    raw: raw_dims(agg),
                    vector: [0.0; DIMS],
                })
            })
            .collect();
        profiles.sort_by_key(|p| p.player);

        standardize(&mut profiles);

        let by_player = profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.player, idx))
            .collect();
        let names = store
            .players()
            .into_iter()
            .map(|p| (p.id, p.name.clone()))
            .collect();

        debug!(profiles = profiles.len(), min_innings, "similarity index built");
        Self {
            profiles,
            by_player,
            names,
            min_innings,
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn min_innings(&self) -> u32 {
        self.min_innings
    }

    /// The `k` players whose career style is closest to `player`.
    pub fn similar(
        &self,
        player: PlayerId,
        k: usize,
        role: Option<PlayerRole>,
    ) -> Result<SimilarPlayers, NoDataError> {
        let idx = *self.by_player.get(&player).ok_or_else(|| {
            if self.names.contains_key(&player) {
                NoDataError::EmptyScope {
                    entity: format!("player {player}"),
                    scope: "career".to_string(),
                }
            } else {
                NoDataError::UnknownPlayer(player)
            }
        })?;
        let subject = &self.profiles[idx];

        let mut results: Vec<SimilarPlayer> = self
            .profiles
            .iter()
            .filter(|p| p.player != player)
            .filter(|p| p.innings >= self.min_innings)
            .filter(|p| role.is_none_or(|r| p.role == r))
            .map(|p| SimilarPlayer {
                player: p.player,
                name: self.names.get(&p.player).cloned(),
                role: p.role,
                similarity: cosine(&subject.vector, &p.vector),
                innings: p.innings,
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.innings.cmp(&a.innings))
                .then(a.player.cmp(&b.player))
        });
        results.truncate(k);

        Ok(SimilarPlayers {
            player,
            low_confidence: subject.innings < self.min_innings,
            results,
        })
    }
}

fn raw_dims(agg: &PlayerAggregate) -> [f64; NUMERIC_DIMS] {
    let bat = &agg.batting;
    let bowl = &agg.bowling;
    let average = match bat.average().value() {
        Some(v) => v,
        None if bat.innings > 0 => bat.runs as f64 / bat.innings as f64,
        None => 0.0,
    }
    .min(AVERAGE_CAP);
    let bowling_sr = match bowl.strike_rate() {
        Some(v) => v,
        None if bowl.legal_balls > 0 => WICKETLESS_STRIKE_RATE.max(bowl.legal_balls as f64),
        None => 0.0,
    };
    let wickets_per_innings = if bowl.innings > 0 {
        bowl.wickets as f64 / bowl.innings as f64
    } else {
        0.0
    };
    [
        average,
        bat.strike_rate().unwrap_or(0.0),
        bat.boundary_pct().unwrap_or(0.0),
        bat.dot_pct().unwrap_or(0.0),
        bowl.economy().unwrap_or(0.0),
        bowling_sr,
        wickets_per_innings,
    ]
}

/// z-scores each numeric dimension across the pool, appends the role one-hot and
/// scales every vector to unit length.
fn standardize(profiles: &mut [Profile]) {
    if profiles.is_empty() {
        return;
    }
    let n = profiles.len() as f64;
    let mut mean = [0.0_f64; NUMERIC_DIMS];
    let mut std = [0.0_f64; NUMERIC_DIMS];
    for p in profiles.iter() {
        for (m, v) in mean.iter_mut().zip(p.raw) {
            *m += v / n;
        }
    }
    for p in profiles.iter() {
        for d in 0..NUMERIC_DIMS {
            std[d] += (p.raw[d] - mean[d]).powi(2) / n;
        }
    }
    for s in std.iter_mut() {
        *s = s.sqrt();
    }

    for p in profiles.iter_mut() {
        let mut v = [0.0_f64; DIMS];
        for d in 0..NUMERIC_DIMS {
            v[d] = if std[d] > 1e-12 {
                (p.raw[d] - mean[d]) / std[d]
            } else {
                0.0
            };
        }
        if let Some(slot) = PlayerRole::ALL.iter().position(|r| *r == p.role) {
            v[NUMERIC_DIMS + slot] = 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-12 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        p.vector = v;
    }
}

/// Vectors are unit length, so the dot product is the cosine.
fn cosine(a: &[f64; DIMS], b: &[f64; DIMS]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(player: PlayerId, raw: [f64; NUMERIC_DIMS]) -> Profile {
        Profile {
            player,
            role: PlayerRole::Batter,
            innings: 20,
            raw,
            vector: [0.0; DIMS],
        }
    }

    #[test]
    fn standardized_vectors_are_unit_length() {
        let mut ps = vec![
            profile(1, [30.0, 130.0, 15.0, 35.0, 0.0, 0.0, 0.0]),
            profile(2, [22.0, 145.0, 20.0, 30.0, 0.0, 0.0, 0.0]),
            profile(3, [12.0, 110.0, 8.0, 45.0, 7.5, 18.0, 1.2]),
        ];
        standardize(&mut ps);
        for p in &ps {
            let norm: f64 = p.vector.iter().map(|x| x * x).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
            assert!((cosine(&p.vector, &p.vector) - 1.0).abs() < 1e-9);
        }
    }
}
