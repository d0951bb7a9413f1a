use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::Scope;
use crate::calibration::{Prob3, apply_logit_calibration};
use crate::error::ModelUnavailableError;
use crate::features::{BASE_FEATURE_COUNT, FEATURE_COUNT, FEATURE_NAMES, FeatureBuilder, FeatureVector};
use crate::model::BALLS_PER_OVER;
use crate::target::{MAX_WICKETS, ResourceTableRegistry};

/// Tie/no-result share used when nothing better is known.
const BASELINE_TIE_RATE: f64 = 0.02;
/// Used when neither the venue nor the store has a completed first innings.
const FALLBACK_INNINGS_TOTAL: f64 = 160.0;
/// Scales a normal z-score onto the logistic curve.
const LOGISTIC_Z: f64 = 1.702;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
    #[serde(default)]
    pub gain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Logistic {
        intercept: f64,
        coeffs: Vec<f64>,
    },
    BoostedStumps {
        base_score: f64,
        learning_rate: f64,
        stumps: Vec<Stump>,
    },
}

/// Fitted outcome model as written by the `fit_outcome_model` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    #[serde(default)]
    pub generated_at: String,
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    #[serde(default = "default_logit_scale")]
    pub logit_scale: f64,
    #[serde(default)]
    pub tie_bias: f64,
    #[serde(default = "default_tie_rate")]
    pub tie_rate: f64,
    pub model: ModelKind,
}

fn default_logit_scale() -> f64 {
    1.0
}

fn default_tie_rate() -> f64 {
    BASELINE_TIE_RATE
}

impl ModelArtifact {
    pub fn load(path: &Path) -> Result<Self, ModelUnavailableError> {
        if !path.exists() {
            return Err(ModelUnavailableError::Missing(path.display().to_string()));
        }
        let raw = fs::read_to_string(path)?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelUnavailableError> {
        self.validate()?;
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ModelUnavailableError> {
        let n = self.feature_names.len();
        let names_match = (n == BASE_FEATURE_COUNT || n == FEATURE_COUNT)
            && self
                .feature_names
                .iter()
                .zip(FEATURE_NAMES.iter())
                .all(|(a, b)| a == b);
        if !names_match {
            return Err(ModelUnavailableError::FeatureMismatch {
                found: self.feature_names.clone(),
            });
        }
        if self.means.len() != n || self.stds.len() != n {
            return Err(ModelUnavailableError::Corrupt(format!(
                "{} features but {} means and {} stds",
                n,
                self.means.len(),
                self.stds.len()
            )));
        }
        let finite = |xs: &[f64]| xs.iter().all(|x| x.is_finite());
        if !finite(&self.means) || !finite(&self.stds) || !self.logit_scale.is_finite() {
            return Err(ModelUnavailableError::Corrupt("non-finite scaling".to_string()));
        }
        if !(0.0..0.5).contains(&self.tie_rate) {
            return Err(ModelUnavailableError::Corrupt(format!(
                "tie rate {} outside [0, 0.5)",
                self.tie_rate
            )));
        }
        match &self.model {
            ModelKind::Logistic { intercept, coeffs } => {
                if coeffs.len() != n || !finite(coeffs) || !intercept.is_finite() {
                    return Err(ModelUnavailableError::Corrupt(format!(
                        "{} coefficients for {} features",
                        coeffs.len(),
                        n
                    )));
                }
            }
            ModelKind::BoostedStumps {
                base_score,
                learning_rate,
                stumps,
            } => {
                if !base_score.is_finite() || !learning_rate.is_finite() {
                    return Err(ModelUnavailableError::Corrupt("non-finite boosting params".to_string()));
                }
                if let Some(bad) = stumps.iter().find(|s| s.feature >= n) {
                    return Err(ModelUnavailableError::Corrupt(format!(
                        "stump splits on feature {} of {}",
                        bad.feature, n
                    )));
                }
            }
        }
        Ok(())
    }

    fn standardized(&self, x: &FeatureVector) -> Vec<f64> {
        self.means
            .iter()
            .zip(&self.stds)
            .enumerate()
            .map(|(i, (mean, std))| {
                let std = if *std > 1e-9 { *std } else { 1.0 };
                (x.values[i] - mean) / std
            })
            .collect()
    }

    /// Probability that team A wins, before tie mass and calibration.
    pub fn win_probability(&self, x: &FeatureVector) -> f64 {
        let z = self.standardized(x);
        let score = match &self.model {
            ModelKind::Logistic { intercept, coeffs } => {
                intercept + coeffs.iter().zip(&z).map(|(c, v)| c * v).sum::<f64>()
            }
            ModelKind::BoostedStumps {
                base_score,
                learning_rate,
                stumps,
            } => {
                base_score
                    + learning_rate
                        * stumps
                            .iter()
                            .map(|s| if z[s.feature] <= s.threshold { s.left } else { s.right })
                            .sum::<f64>()
            }
        };
        sigmoid(score)
    }

    pub fn probabilities(&self, x: &FeatureVector) -> Prob3 {
        let raw = Prob3::from_binary(self.win_probability(x), self.tie_rate);
        apply_logit_calibration(raw, self.logit_scale, self.tie_bias).normalized()
    }

    /// Normalized feature weights, largest first.
    pub fn importance(&self) -> Vec<FeatureImportance> {
        let mut weights = vec![0.0_f64; self.feature_names.len()];
        match &self.model {
            ModelKind::Logistic { coeffs, .. } => {
                for (w, c) in weights.iter_mut().zip(coeffs) {
                    *w = c.abs();
                }
            }
            ModelKind::BoostedStumps { stumps, .. } => {
                for s in stumps {
                    weights[s.feature] += s.gain.max(0.0);
                }
            }
        }
        let total: f64 = weights.iter().sum();
        let mut out: Vec<FeatureImportance> = self
            .feature_names
            .iter()
            .zip(weights)
            .map(|(name, w)| FeatureImportance {
                name: name.clone(),
                weight: if total > 0.0 { w / total } else { 0.0 },
            })
            .collect();
        out.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    TeamA,
    TeamB,
}

/// In-play state of the fixture being predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    pub batting: Side,
    pub innings: u8,
    pub runs: u32,
    pub wickets: u8,
    pub balls_bowled: u16,
    #[serde(default)]
    pub target: Option<u32>,
    pub max_overs: u16,
}

impl LiveState {
    fn max_balls(&self) -> u16 {
        self.max_overs.max(1).saturating_mul(BALLS_PER_OVER)
    }

    /// Share of the match already played, 0 at the first ball and 1 at the last.
    pub fn progress(&self) -> f64 {
        let max = self.max_balls() as f64;
        let done = self.balls_bowled.min(self.max_balls()) as f64;
        let done = if self.innings >= 2 { max + done } else { done };
        (done / (2.0 * max)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionSource {
    Model { version: String },
    Baseline { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub team_a: String,
    pub team_b: String,
    pub venue: String,
    pub probs: Prob3,
    pub pre_match: Prob3,
    pub source: PredictionSource,
    pub importance: Vec<FeatureImportance>,
    pub features: Option<FeatureVector>,
    pub live: Option<LiveState>,
    pub confidence: u8,
}

/// The installed model, or why there is none.
#[derive(Debug, Clone)]
pub enum ModelSlot {
    Loaded(Arc<ModelArtifact>),
    Unavailable(String),
}

impl From<Result<ModelArtifact, ModelUnavailableError>> for ModelSlot {
    fn from(loaded: Result<ModelArtifact, ModelUnavailableError>) -> Self {
        match loaded {
            Ok(artifact) => ModelSlot::Loaded(Arc::new(artifact)),
            Err(err) => {
                warn!(error = %err, "outcome model unavailable; using head-to-head baseline");
                ModelSlot::Unavailable(err.to_string())
            }
        }
    }
}

/// Win/tie probabilities for a fixture, with in-play updating.
#[derive(Debug)]
pub struct OutcomePredictor {
    features: Arc<FeatureBuilder>,
    model: ModelSlot,
    tables: Arc<ResourceTableRegistry>,
    live_table: Option<String>,
}

impl OutcomePredictor {
    pub fn new(
        features: Arc<FeatureBuilder>,
        model: ModelSlot,
        tables: Arc<ResourceTableRegistry>,
        live_table: Option<String>,
    ) -> Self {
        Self {
            features,
            model,
            tables,
            live_table,
        }
    }

    pub fn model(&self) -> Option<&ModelArtifact> {
        match &self.model {
            ModelSlot::Loaded(m) => Some(m.as_ref()),
            ModelSlot::Unavailable(_) => None,
        }
    }

    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        self.model().map(|m| m.importance()).unwrap_or_default()
    }

    pub fn predict(
        &self,
        team_a: &str,
        team_b: &str,
        venue: &str,
        live: Option<&LiveState>,
    ) -> Prediction {
        let (pre_match, source, features) = self.pre_match(team_a, team_b, venue);
        let importance = match source {
            PredictionSource::Model { .. } => self.feature_importance(),
            PredictionSource::Baseline { .. } => Vec::new(),
        };

        let probs = match live {
            Some(state) => self.in_play(pre_match, state, venue),
            None => pre_match,
        };
        let confidence = confidence(&source, live, probs);

        Prediction {
            team_a: team_a.to_string(),
            team_b: team_b.to_string(),
            venue: venue.to_string(),
            probs,
            pre_match,
            source,
            importance,
            features,
            live: live.copied(),
            confidence,
        }
    }

    fn pre_match(
        &self,
        team_a: &str,
        team_b: &str,
        venue: &str,
    ) -> (Prob3, PredictionSource, Option<FeatureVector>) {
        let store = self.features.aggregates().store();
        let model = match &self.model {
            ModelSlot::Loaded(m) => m,
            ModelSlot::Unavailable(reason) => {
                return (
                    self.baseline(team_a, team_b),
                    PredictionSource::Baseline {
                        reason: reason.clone(),
                    },
                    None,
                );
            }
        };

        let unknown = [team_a, team_b]
            .into_iter()
            .find(|t| !store.has_team(t))
            .map(|t| format!("team {t} has no history"));
        let unseen = (!store.has_venue(venue))
            .then(|| ModelUnavailableError::UnseenVenue(venue.to_string()).to_string());
        if let Some(reason) = unknown.or(unseen) {
            warn!(team_a, team_b, venue, %reason, "falling back to head-to-head baseline");
            return (
                self.baseline(team_a, team_b),
                PredictionSource::Baseline { reason },
                None,
            );
        }

        let x = self.features.build(team_a, team_b, venue);
        let probs = model.probabilities(&x);
        debug!(team_a, team_b, venue, p_a = probs.team_a, "model prediction");
        (
            probs,
            PredictionSource::Model {
                version: model.version.clone(),
            },
            Some(x),
        )
    }

    /// Laplace-smoothed head-to-head share, or the ratio of overall smoothed win rates
    /// when the teams have never met.
    pub fn baseline(&self, team_a: &str, team_b: &str) -> Prob3 {
        let agg = self.features.aggregates();
        let h2h = agg.head_to_head(team_a, team_b, None, None);
        let p_a = if h2h.decided() > 0 {
            h2h.a_share_smoothed()
        } else {
            let rate = |t: &str| {
                agg.team(t, &Scope::Career)
                    .map(|t| t.smoothed_win_rate())
                    .unwrap_or(0.5)
            };
            let (a, b) = (rate(team_a), rate(team_b));
            if a + b > 0.0 { a / (a + b) } else { 0.5 }
        };
        Prob3::from_binary(p_a, BASELINE_TIE_RATE)
    }

    fn in_play(&self, pre: Prob3, state: &LiveState, venue: &str) -> Prob3 {
        if let Some(done) = terminal(state) {
            return done;
        }

        let agg = self.features.aggregates();
        let par_total = agg
            .first_innings_average(Some(venue), None)
            .or_else(|| agg.first_innings_average(None, None))
            .unwrap_or(FALLBACK_INNINGS_TOTAL);

        let balls_left = state.max_balls().saturating_sub(state.balls_bowled);
        let resource = self.resource_share(balls_left, state.wickets, state.max_overs);
        let expected_more = par_total * resource;

        // Batting side's chance from the live situation alone.
        let (p_batting, tie) = match (state.innings, state.target) {
            (2.., Some(target)) => {
                let need = target.saturating_sub(state.runs) as f64;
                let sd = 2.0 * expected_more.sqrt().max(1.0);
                let z = (expected_more - need + 0.5) / sd;
                let tie = (normal_pdf(z) / sd).clamp(0.0, 0.05);
                (sigmoid(LOGISTIC_Z * z), tie)
            }
            _ => {
                let projected = state.runs as f64 + expected_more;
                let sd = 2.0 * par_total.sqrt().max(1.0);
                let z = (projected - par_total) / sd;
                (sigmoid(LOGISTIC_Z * z), pre.tie)
            }
        };

        let live = match state.batting {
            Side::TeamA => Prob3::from_binary(p_batting, tie),
            Side::TeamB => Prob3::from_binary(p_batting, tie).swapped(),
        };

        let w = state.progress();
        Prob3 {
            team_a: (1.0 - w) * pre.team_a + w * live.team_a,
            tie: (1.0 - w) * pre.tie + w * live.tie,
            team_b: (1.0 - w) * pre.team_b + w * live.team_b,
        }
        .normalized()
    }

    /// Fraction of batting resources left, from the configured table when it covers
    /// the state and a wicket-weighted linear share otherwise.
    fn resource_share(&self, balls_left: u16, wickets: u8, max_overs: u16) -> f64 {
        if let Some(version) = &self.live_table
            && let Ok(table) = self.tables.get(version)
            && table.max_overs() == max_overs
            && let Ok(r) = table.resource(balls_left, wickets)
        {
            return r / 100.0;
        }
        let max_balls = max_overs.max(1) as f64 * BALLS_PER_OVER as f64;
        let wickets_in_hand = MAX_WICKETS.saturating_sub(wickets) as f64 / MAX_WICKETS as f64;
        (balls_left as f64 / max_balls) * wickets_in_hand.sqrt()
    }
}

/// Finished chases resolve without the model. Level scores at the end is a tie.
fn terminal(state: &LiveState) -> Option<Prob3> {
    if state.innings < 2 {
        return None;
    }
    let target = state.target?;
    let batting_won = Prob3 {
        team_a: 1.0,
        tie: 0.0,
        team_b: 0.0,
    };
    let oriented = |p: Prob3| match state.batting {
        Side::TeamA => p,
        Side::TeamB => p.swapped(),
    };

    if state.runs >= target {
        return Some(oriented(batting_won));
    }
    let finished = state.wickets >= MAX_WICKETS || state.balls_bowled >= state.max_balls();
    if !finished {
        return None;
    }
    if state.runs + 1 == target {
        return Some(Prob3 {
            team_a: 0.0,
            tie: 1.0,
            team_b: 0.0,
        });
    }
    Some(oriented(batting_won.swapped()))
}

fn confidence(source: &PredictionSource, live: Option<&LiveState>, probs: Prob3) -> u8 {
    let mut score = match source {
        PredictionSource::Model { .. } => 50.0,
        PredictionSource::Baseline { .. } => 30.0,
    };
    if let Some(state) = live {
        score += 45.0 * state.progress();
    }
    if probs.team_a.max(probs.team_b).max(probs.tie) >= 0.999 {
        score = 100.0;
    }
    score.clamp(5.0, 100.0).round() as u8
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}
