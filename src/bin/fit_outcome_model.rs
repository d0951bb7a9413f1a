use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;

use cricket_insights::aggregate::AggregationEngine;
use cricket_insights::calibration::{
    self, Outcome, Prob3, calibration_bins, classify_match, evaluate_probs,
};
use cricket_insights::config::EngineConfig;
use cricket_insights::elo::compute_elo;
use cricket_insights::features::{FEATURE_COUNT, FEATURE_NAMES, FeatureBuilder, FeatureVector};
use cricket_insights::predict::{ModelArtifact, ModelKind, sigmoid};
use cricket_insights::store::DeliveryStore;
use cricket_insights::{dataset, ingest, logging};

#[derive(Parser)]
#[command(name = "fit_outcome_model")]
#[command(about = "Fit the pre-match outcome model from historical matches")]
struct Args {
    /// Match documents (files or directories of .json)
    #[arg(long = "data")]
    data: Vec<PathBuf>,
    /// SQLite dataset, used when no --data is given
    #[arg(long, env = "CRICKET_DB_PATH")]
    db: Option<PathBuf>,
    #[arg(long, default_value = "assets/outcome_model_v1.json")]
    out: PathBuf,
    /// Matches replayed before the first training sample
    #[arg(long, default_value_t = 20)]
    warmup: usize,
    /// Most recent share of samples held out for calibration
    #[arg(long, default_value_t = 0.2)]
    holdout: f64,
    #[arg(long, default_value_t = 0.05)]
    l2: f64,
    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,
    #[arg(long, default_value_t = 2000)]
    epochs: usize,
}

struct Sample {
    x: FeatureVector,
    outcome: Outcome,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_tracing("info");

    let args = Args::parse();
    let config = EngineConfig::load()?;
    let store = load_store(&args)?;
    if store.matches().is_empty() {
        return Err(anyhow!("no matches to fit on"));
    }

    let aggregates = Arc::new(AggregationEngine::new(Arc::new(store)));
    let features = FeatureBuilder::new(
        Arc::clone(&aggregates),
        config.elo,
        config.form_window,
        config.form_decay,
    );
    let samples = replay(&features, args.warmup, &config);
    if samples.len() < 10 {
        return Err(anyhow!(
            "only {} samples after a warm-up of {} matches",
            samples.len(),
            args.warmup
        ));
    }

    let split = ((samples.len() as f64) * (1.0 - args.holdout.clamp(0.0, 0.5))).round() as usize;
    let (train, holdout) = samples.split_at(split.clamp(1, samples.len()));
    let (means, stds) = standardization(train);
    let decided: Vec<(Vec<f64>, f64)> = train
        .iter()
        .filter_map(|s| {
            let y = match s.outcome {
                Outcome::TeamA => 1.0,
                Outcome::TeamB => 0.0,
                Outcome::Tie => return None,
            };
            Some((standardize(&s.x, &means, &stds), y))
        })
        .collect();
    let ties = train.iter().filter(|s| s.outcome == Outcome::Tie).count();
    let tie_rate = (ties as f64 / train.len() as f64).clamp(0.005, 0.2);

    let (intercept, coeffs) = fit_logistic(&decided, args.l2, args.learning_rate, args.epochs);
    info!(train = train.len(), decided = decided.len(), holdout = holdout.len(), tie_rate, "fitted logistic model");

    let mut artifact = ModelArtifact {
        version: format!("logistic-{}", aggregates.version()),
        generated_at: chrono::Utc::now().to_rfc3339(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        means,
        stds,
        logit_scale: 1.0,
        tie_bias: 0.0,
        tie_rate,
        model: ModelKind::Logistic { intercept, coeffs },
    };

    let calibration_set = if holdout.is_empty() { train } else { holdout };
    let raw: Vec<Prob3> = calibration_set
        .iter()
        .map(|s| Prob3::from_binary(artifact.win_probability(&s.x), tie_rate))
        .collect();
    let outcomes: Vec<Outcome> = calibration_set.iter().map(|s| s.outcome).collect();
    let before = evaluate_probs(&raw, &outcomes);
    let (scale, tie_bias, after) = calibration::fit_logit_calibration(&raw, &outcomes);
    artifact.logit_scale = scale;
    artifact.tie_bias = tie_bias;

    let calibrated: Vec<Prob3> = calibration_set.iter().map(|s| artifact.probabilities(&s.x)).collect();
    for bin in calibration_bins(&calibrated, &outcomes, Outcome::TeamA, 5) {
        info!(
            from = bin.bucket_start,
            to = bin.bucket_end,
            count = bin.count,
            predicted = bin.avg_pred,
            actual = bin.actual_rate,
            "calibration bin"
        );
    }

    artifact
        .write(&args.out)
        .with_context(|| format!("write {}", args.out.display()))?;

    println!("outcome model written: {}", args.out.display());
    println!("samples: {} train, {} holdout", train.len(), holdout.len());
    println!(
        "log loss {:.4} -> {:.4}, brier {:.4} -> {:.4}, accuracy {:.3}",
        before.log_loss, after.log_loss, before.brier, after.brier, after.accuracy
    );
    println!("calibration: scale {scale:.2}, tie bias {tie_bias:.2}");
    Ok(())
}

fn load_store(args: &Args) -> Result<DeliveryStore> {
    if !args.data.is_empty() {
        return ingest::load_store(&args.data);
    }
    let db = args
        .db
        .as_ref()
        .context("pass --data or --db (or set CRICKET_DB_PATH)")?;
    let conn = dataset::open_db(db)?;
    dataset::load_store(&conn)
}

/// One sample per match, built only from matches played on earlier dates.
fn replay(features: &FeatureBuilder, warmup: usize, config: &EngineConfig) -> Vec<Sample> {
    let matches = features.aggregates().store().matches();
    let mut elo_by_date: HashMap<NaiveDate, HashMap<String, f64>> = HashMap::new();
    let mut samples = Vec::with_capacity(matches.len().saturating_sub(warmup));

    for m in matches.iter().skip(warmup) {
        let elo = elo_by_date
            .entry(m.date)
            .or_insert_with(|| compute_elo(matches, Some(m.date), config.elo));
        let [a, b] = &m.teams;
        let x = features.build_with_elo(a, b, &m.venue, Some(m.date), elo);
        samples.push(Sample {
            x,
            outcome: classify_match(m),
        });
    }
    samples
}

fn standardization(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len().max(1) as f64;
    let mut means = vec![0.0; FEATURE_COUNT];
    for s in samples {
        for (m, v) in means.iter_mut().zip(s.x.values) {
            *m += v / n;
        }
    }
    let mut stds = vec![0.0; FEATURE_COUNT];
    for s in samples {
        for ((sd, v), m) in stds.iter_mut().zip(s.x.values).zip(&means) {
            *sd += (v - m).powi(2) / n;
        }
    }
    for sd in &mut stds {
        *sd = if *sd > 1e-12 { sd.sqrt() } else { 1.0 };
    }
    (means, stds)
}

fn standardize(x: &FeatureVector, means: &[f64], stds: &[f64]) -> Vec<f64> {
    x.values
        .iter()
        .zip(means.iter().zip(stds))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

/// Batch gradient descent on L2-penalized log loss. The intercept is not penalized.
fn fit_logistic(rows: &[(Vec<f64>, f64)], l2: f64, lr: f64, epochs: usize) -> (f64, Vec<f64>) {
    let mut intercept = 0.0;
    let mut coeffs = vec![0.0; FEATURE_COUNT];
    if rows.is_empty() {
        return (intercept, coeffs);
    }
    let n = rows.len() as f64;

    for _ in 0..epochs {
        let mut g0 = 0.0;
        let mut g = vec![0.0; FEATURE_COUNT];
        for (x, y) in rows {
            let z = intercept + coeffs.iter().zip(x).map(|(c, v)| c * v).sum::<f64>();
            let err = sigmoid(z) - y;
            g0 += err;
            for (gi, xi) in g.iter_mut().zip(x) {
                *gi += err * xi;
            }
        }
        intercept -= lr * g0 / n;
        for (c, gi) in coeffs.iter_mut().zip(&g) {
            *c -= lr * (gi / n + l2 * *c);
        }
    }
    (intercept, coeffs)
}
