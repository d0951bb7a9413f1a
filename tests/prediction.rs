use cricket_insights::config::EngineConfig;
use cricket_insights::engine::Engine;
use cricket_insights::features::{FEATURE_COUNT, FEATURE_NAMES};
use cricket_insights::predict::{
    LiveState, ModelArtifact, ModelKind, ModelSlot, PredictionSource, Side,
};
use cricket_insights::synthetic::{self, SyntheticConfig};
use cricket_insights::target::ResourceTableRegistry;

fn league_engine(model: ModelSlot) -> Engine {
    let doc = synthetic::generate(&SyntheticConfig {
        matches: 60,
        ..SyntheticConfig::default()
    });
    Engine::new(
        EngineConfig::default(),
        doc.into_store().expect("synthetic league is valid"),
        model,
        ResourceTableRegistry::new(),
    )
}

fn artifact() -> ModelArtifact {
    let mut coeffs = vec![0.0; FEATURE_COUNT];
    coeffs[0] = 1.2;
    coeffs[3] = 0.4;
    ModelArtifact {
        version: "test-logistic".to_string(),
        generated_at: String::new(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        means: vec![0.0; FEATURE_COUNT],
        stds: vec![1.0; FEATURE_COUNT],
        logit_scale: 1.0,
        tie_bias: 0.0,
        tie_rate: 0.02,
        model: ModelKind::Logistic {
            intercept: 0.0,
            coeffs,
        },
    }
}

fn fixture(engine: &Engine) -> (String, String, String) {
    let snap = engine.snapshot();
    let m = &snap.store.matches()[0];
    (m.teams[0].clone(), m.teams[1].clone(), m.venue.clone())
}

fn assert_sums_to_one(p: cricket_insights::calibration::Prob3) {
    assert!((p.sum() - 1.0).abs() < 1e-9, "{p:?}");
    for v in [p.team_a, p.tie, p.team_b] {
        assert!((0.0..=1.0).contains(&v));
    }
}

#[test]
fn missing_model_falls_back_to_baseline() {
    let engine = league_engine(ModelSlot::Unavailable("no artifact".to_string()));
    let (a, b, venue) = fixture(&engine);
    let p = engine.predict(&a, &b, &venue, None);
    assert!(matches!(p.source, PredictionSource::Baseline { .. }));
    assert!(p.importance.is_empty());
    assert_sums_to_one(p.probs);
}

#[test]
fn loaded_model_predicts_known_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    artifact().write(&path).unwrap();

    let engine = league_engine(ModelSlot::from(ModelArtifact::load(&path)));
    let (a, b, venue) = fixture(&engine);
    let p = engine.predict(&a, &b, &venue, None);
    assert_eq!(
        p.source,
        PredictionSource::Model {
            version: "test-logistic".to_string()
        }
    );
    assert_sums_to_one(p.probs);
    assert_eq!(p.importance[0].name, "win_rate_diff");
    assert!(p.features.is_some());

    let swapped = engine.predict(&b, &a, &venue, None);
    assert_sums_to_one(swapped.probs);
}

#[test]
fn unseen_venue_and_unknown_team_use_baseline() {
    let engine = league_engine(ModelSlot::Loaded(std::sync::Arc::new(artifact())));
    let (a, b, _) = fixture(&engine);

    let new_ground = engine.predict(&a, &b, "Brand New Oval", None);
    assert!(matches!(new_ground.source, PredictionSource::Baseline { .. }));
    assert_sums_to_one(new_ground.probs);

    let (_, _, venue) = fixture(&engine);
    let newcomer = engine.predict(&a, "Expansion XI", &venue, None);
    assert!(matches!(newcomer.source, PredictionSource::Baseline { .. }));
    assert_sums_to_one(newcomer.probs);
}

#[test]
fn corrupt_artifact_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, "{\"version\": 3}").unwrap();
    let slot = ModelSlot::from(ModelArtifact::load(&path));
    assert!(matches!(slot, ModelSlot::Unavailable(_)));

    let missing = ModelArtifact::load(&dir.path().join("absent.json"));
    assert!(missing.is_err());
}

#[test]
fn completed_chase_is_certain() {
    let engine = league_engine(ModelSlot::Unavailable("no artifact".to_string()));
    let (a, b, venue) = fixture(&engine);
    let chased = LiveState {
        batting: Side::TeamB,
        innings: 2,
        runs: 171,
        wickets: 4,
        balls_bowled: 110,
        target: Some(170),
        max_overs: 20,
    };
    let p = engine.predict(&a, &b, &venue, Some(&chased));
    assert_eq!(p.probs.team_b, 1.0);
    assert_eq!(p.confidence, 100);

    let level = LiveState {
        runs: 169,
        balls_bowled: 120,
        ..chased
    };
    assert_eq!(engine.predict(&a, &b, &venue, Some(&level)).probs.tie, 1.0);
}

#[test]
fn live_chase_moves_toward_the_batting_side() {
    let engine = league_engine(ModelSlot::Unavailable("no artifact".to_string()));
    let (a, b, venue) = fixture(&engine);
    let cruising = LiveState {
        batting: Side::TeamA,
        innings: 2,
        runs: 120,
        wickets: 1,
        balls_bowled: 90,
        target: Some(130),
        max_overs: 20,
    };
    let struggling = LiveState {
        runs: 60,
        wickets: 8,
        ..cruising
    };
    let good = engine.predict(&a, &b, &venue, Some(&cruising));
    let bad = engine.predict(&a, &b, &venue, Some(&struggling));
    assert_sums_to_one(good.probs);
    assert_sums_to_one(bad.probs);
    assert!(good.probs.team_a > bad.probs.team_a);
    assert!(good.probs.team_a > good.pre_match.team_a);
}

#[test]
fn oversized_match_length_saturates() {
    let engine = league_engine(ModelSlot::Unavailable("no artifact".to_string()));
    let (a, b, venue) = fixture(&engine);
    let marathon = LiveState {
        batting: Side::TeamA,
        innings: 1,
        runs: 40,
        wickets: 1,
        balls_bowled: 30,
        target: None,
        max_overs: u16::MAX,
    };
    assert!((0.0..=1.0).contains(&marathon.progress()));
    assert_sums_to_one(engine.predict(&a, &b, &venue, Some(&marathon)).probs);
}
