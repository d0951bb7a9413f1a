use serde::{Deserialize, Serialize};

use crate::model::{Match, MatchResult};

/// Result of a fixture from team A's point of view. Ties and no-results share a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    TeamA,
    Tie,
    TeamB,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub team_a: f64,
    pub tie: f64,
    pub team_b: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            team_a: 1.0 / 3.0,
            tie: 1.0 / 3.0,
            team_b: 1.0 / 3.0,
        }
    }

    /// Splits `1 - tie` between the sides in proportion `p_a : 1 - p_a`.
    pub fn from_binary(p_a: f64, tie: f64) -> Self {
        let tie = tie.clamp(0.0, 1.0);
        let p_a = p_a.clamp(0.0, 1.0);
        Self {
            team_a: (1.0 - tie) * p_a,
            tie,
            team_b: (1.0 - tie) * (1.0 - p_a),
        }
        .normalized()
    }

    pub fn normalized(self) -> Self {
        let a = self.team_a.max(0.0);
        let t = self.tie.max(0.0);
        let b = self.team_b.max(0.0);
        let sum = a + t + b;
        if sum <= 1e-12 {
            return Self::uniform();
        }
        Self {
            team_a: a / sum,
            tie: t / sum,
            team_b: b / sum,
        }
    }

    pub fn swapped(self) -> Self {
        Self {
            team_a: self.team_b,
            tie: self.tie,
            team_b: self.team_a,
        }
    }

    pub fn sum(&self) -> f64 {
        self.team_a + self.tie + self.team_b
    }

    fn class(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::TeamA => self.team_a,
            Outcome::Tie => self.tie,
            Outcome::TeamB => self.team_b,
        }
    }
}

/// Outcome of `m` with `m.teams[0]` as team A.
pub fn classify_match(m: &Match) -> Outcome {
    match &m.result {
        MatchResult::Win { winner, .. } | MatchResult::SuperOver { winner } => {
            if *winner == m.teams[0] {
                Outcome::TeamA
            } else {
                Outcome::TeamB
            }
        }
        MatchResult::Tie | MatchResult::NoResult => Outcome::Tie,
    }
}

fn empty_metrics() -> Metrics {
    Metrics {
        samples: 0,
        brier: 0.0,
        log_loss: 0.0,
        accuracy: 0.0,
    }
}

pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return empty_metrics();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let y = one_hot(*outcome);
        brier_sum += (p.team_a - y.team_a).powi(2)
            + (p.tie - y.tie).powi(2)
            + (p.team_b - y.team_b).powi(2);
        log_loss_sum += -p.class(*outcome).clamp(1e-12, 1.0).ln();
        if argmax(*p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

/// Sharpens (`scale > 1`) or flattens the distribution in log space and shifts the tie class.
pub fn apply_logit_calibration(prob: Prob3, logit_scale: f64, tie_bias: f64) -> Prob3 {
    let s = logit_scale.clamp(0.50, 1.80);
    let mut la = prob.team_a.clamp(1e-9, 1.0).ln();
    let mut lt = prob.tie.clamp(1e-9, 1.0).ln() + tie_bias;
    let mut lb = prob.team_b.clamp(1e-9, 1.0).ln();

    let mean = (la + lt + lb) / 3.0;
    la = (la - mean) * s;
    lt = (lt - mean) * s;
    lb = (lb - mean) * s;

    let mx = la.max(lt.max(lb));
    let ea = (la - mx).exp();
    let et = (lt - mx).exp();
    let eb = (lb - mx).exp();
    let den = (ea + et + eb).max(1e-12);

    Prob3 {
        team_a: ea / den,
        tie: et / den,
        team_b: eb / den,
    }
}

/// Grid search over (scale, tie bias) minimizing log loss. Returns the identity
/// calibration when the inputs are empty or mismatched.
pub fn fit_logit_calibration(predictions: &[Prob3], outcomes: &[Outcome]) -> (f64, f64, Metrics) {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return (1.0, 0.0, empty_metrics());
    }

    let mut best_scale = 1.0;
    let mut best_tie_bias = 0.0;
    let mut best_metrics = evaluate_probs(predictions, outcomes);

    for scale_step in 35..=65 {
        let scale = scale_step as f64 / 50.0;
        for tie_step in -30..=30 {
            let tie_bias = tie_step as f64 / 100.0;
            let calibrated: Vec<Prob3> = predictions
                .iter()
                .map(|p| apply_logit_calibration(*p, scale, tie_bias))
                .collect();
            let metrics = evaluate_probs(&calibrated, outcomes);
            if metrics.log_loss < best_metrics.log_loss {
                best_metrics = metrics;
                best_scale = scale;
                best_tie_bias = tie_bias;
            }
        }
    }

    (best_scale, best_tie_bias, best_metrics)
}

pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.class(class).clamp(0.0, 1.0);
        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

fn argmax(p: Prob3) -> Outcome {
    if p.team_a >= p.tie && p.team_a >= p.team_b {
        Outcome::TeamA
    } else if p.tie >= p.team_b {
        Outcome::Tie
    } else {
        Outcome::TeamB
    }
}

fn one_hot(outcome: Outcome) -> Prob3 {
    match outcome {
        Outcome::TeamA => Prob3 {
            team_a: 1.0,
            tie: 0.0,
            team_b: 0.0,
        },
        Outcome::Tie => Prob3 {
            team_a: 0.0,
            tie: 1.0,
            team_b: 0.0,
        },
        Outcome::TeamB => Prob3 {
            team_a: 0.0,
            tie: 0.0,
            team_b: 1.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, Prob3, apply_logit_calibration, calibration_bins, evaluate_probs};

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let preds = vec![
            Prob3 {
                team_a: 1.0,
                tie: 0.0,
                team_b: 0.0,
            },
            Prob3 {
                team_a: 0.0,
                tie: 0.0,
                team_b: 1.0,
            },
        ];
        let outcomes = vec![Outcome::TeamA, Outcome::TeamB];
        let m = evaluate_probs(&preds, &outcomes);
        assert_eq!(m.samples, 2);
        assert!(m.brier < 1e-12);
        assert!((m.accuracy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn logit_calibration_keeps_distribution_normalized() {
        let p = Prob3 {
            team_a: 0.61,
            tie: 0.02,
            team_b: 0.37,
        };
        let q = apply_logit_calibration(p, 1.12, 0.08);
        assert!((q.sum() - 1.0).abs() < 1e-9);
        assert!(q.team_a > q.team_b);
    }

    #[test]
    fn from_binary_reserves_tie_mass() {
        let p = Prob3::from_binary(0.7, 0.02);
        assert!((p.sum() - 1.0).abs() < 1e-12);
        assert!((p.tie - 0.02).abs() < 1e-12);
        assert!((p.team_a - 0.98 * 0.7).abs() < 1e-12);
    }

    #[test]
    fn bins_cover_unit_interval() {
        let preds = vec![Prob3::from_binary(0.05, 0.0), Prob3::from_binary(0.95, 0.0)];
        let bins = calibration_bins(&preds, &[Outcome::TeamB, Outcome::TeamA], Outcome::TeamA, 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[9].count, 1);
        assert!((bins[9].actual_rate - 1.0).abs() < 1e-12);
    }
}
