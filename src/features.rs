use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::aggregate::{AggregationEngine, FormWeighting, Scope, TeamAggregate};
use crate::elo::{self, EloConfig};

/// Column order of every feature vector and model artifact. Base features come first;
/// an artifact may be fitted on the base block alone.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "win_rate_diff",
    "h2h_rate",
    "venue_rate_diff",
    "elo_diff",
    "run_rate_diff",
    "economy_diff",
    "venue_familiarity_diff",
    "form_diff",
    "momentum_diff",
];
pub const FEATURE_COUNT: usize = 9;
pub const BASE_FEATURE_COUNT: usize = 7;

const MOMENTUM_WINDOW: usize = 3;

static FEATURE_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(idx, name)| (*name, idx))
        .collect()
});

/// Column of `name` in [`FEATURE_NAMES`].
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_INDEX.get(name).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|idx| self.values[idx])
    }

    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

/// Pre-match features for a fixture, from team A's point of view.
///
/// Every input is a historical aggregate; `as_of` restricts them to matches played
/// strictly before that date so fitted models never see the result they predict.
#[derive(Debug)]
pub struct FeatureBuilder {
    aggregates: Arc<AggregationEngine>,
    elo_cfg: EloConfig,
    current_elo: HashMap<String, f64>,
    form_window: usize,
    form_decay: f64,
}

impl FeatureBuilder {
    pub fn new(
        aggregates: Arc<AggregationEngine>,
        elo_cfg: EloConfig,
        form_window: usize,
        form_decay: f64,
    ) -> Self {
        let current_elo = elo::compute_elo(aggregates.store().matches(), None, elo_cfg);
        Self {
            aggregates,
            elo_cfg,
            current_elo,
            form_window: form_window.max(1),
            form_decay,
        }
    }

    pub fn aggregates(&self) -> &AggregationEngine {
        &self.aggregates
    }

    pub fn elo(&self, team: &str) -> f64 {
        elo::rating(&self.current_elo, team)
    }

    pub fn build(&self, team_a: &str, team_b: &str, venue: &str) -> FeatureVector {
        self.build_with_elo(team_a, team_b, venue, None, &self.current_elo)
    }

    /// Features as they stood on the morning of `date`.
    pub fn build_as_of(
        &self,
        team_a: &str,
        team_b: &str,
        venue: &str,
        date: NaiveDate,
    ) -> FeatureVector {
        let elo = elo::compute_elo(self.aggregates.store().matches(), Some(date), self.elo_cfg);
        self.build_with_elo(team_a, team_b, venue, Some(date), &elo)
    }

    /// Same as [`build_as_of`](Self::build_as_of) with a caller-maintained Elo table,
    /// for replaying a whole season without recomputing ratings per fixture.
    pub fn build_with_elo(
        &self,
        team_a: &str,
        team_b: &str,
        venue: &str,
        before: Option<NaiveDate>,
        elo_table: &HashMap<String, f64>,
    ) -> FeatureVector {
        let agg = &self.aggregates;
        let record = |team: &str, scope: &Scope| -> Option<TeamAggregate> {
            match before {
                Some(d) => agg.team_before(team, scope, d).ok(),
                None => agg.team(team, scope).ok(),
            }
        };

        let career_a = record(team_a, &Scope::Career);
        let career_b = record(team_b, &Scope::Career);
        let venue_scope = Scope::Venue(venue.to_string());
        let venue_a = record(team_a, &venue_scope);
        let venue_b = record(team_b, &venue_scope);

        let rate = |t: &Option<TeamAggregate>| t.as_ref().map_or(0.5, |t| t.smoothed_win_rate());
        let run_rate = |t: &Option<TeamAggregate>| t.as_ref().and_then(|t| t.run_rate());
        let economy = |t: &Option<TeamAggregate>| t.as_ref().and_then(|t| t.economy());
        let played = |t: &Option<TeamAggregate>| t.as_ref().map_or(0, |t| t.matches) as f64;

        let h2h = agg.head_to_head(team_a, team_b, None, before);
        let weighting = FormWeighting::Exponential {
            decay: self.form_decay,
        };
        let form = |team: &str, window: usize| {
            agg.team_form(team, window, weighting, before).unwrap_or(0.5)
        };

        let form_a = form(team_a, self.form_window);
        let form_b = form(team_b, self.form_window);
        let momentum_a = form(team_a, MOMENTUM_WINDOW) - form_a;
        let momentum_b = form(team_b, MOMENTUM_WINDOW) - form_b;

        FeatureVector {
            values: [
                rate(&career_a) - rate(&career_b),
                h2h.a_share_smoothed() - 0.5,
                rate(&venue_a) - rate(&venue_b),
                (elo::rating(elo_table, team_a) - elo::rating(elo_table, team_b)) / 400.0,
                diff_or_zero(run_rate(&career_a), run_rate(&career_b)),
                diff_or_zero(economy(&career_a), economy(&career_b)),
                (1.0 + played(&venue_a)).ln() - (1.0 + played(&venue_b)).ln(),
                form_a - form_b,
                momentum_a - momentum_b,
            ],
        }
    }
}

fn diff_or_zero(a: Option<f64>, b: Option<f64>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => a - b,
        _ => 0.0,
    }
}
