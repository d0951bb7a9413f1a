use std::path::PathBuf;
use std::sync::Arc;

use cricket_insights::aggregate::{
    AggregateStat, AggregationEngine, Average, Discipline, Entity, FormWeighting, Scope,
};
use cricket_insights::config::EngineConfig;
use cricket_insights::engine::{Aggregate, Engine};
use cricket_insights::error::NoDataError;
use cricket_insights::ingest;
use cricket_insights::predict::ModelSlot;
use cricket_insights::store::DeliveryStore;
use cricket_insights::target::ResourceTableRegistry;

fn store() -> DeliveryStore {
    ingest::load_store(&[PathBuf::from("tests/fixtures/two_teams.json")]).expect("fixture loads")
}

fn engine() -> Engine {
    Engine::new(
        EngineConfig::default(),
        store(),
        ModelSlot::Unavailable("not needed".to_string()),
        ResourceTableRegistry::new(),
    )
}

fn player(engine: &Engine, id: u32, scope: Scope) -> cricket_insights::aggregate::PlayerAggregate {
    match engine.aggregate(&scope, &Entity::Player(id)) {
        Aggregate::Stat(AggregateStat::Player(p)) => p,
        other => panic!("expected player aggregate, got {other:?}"),
    }
}

#[test]
fn batting_average_counts_dismissals_only() {
    let p = player(&engine(), 1, Scope::Career);
    assert_eq!(p.batting.innings, 2);
    assert_eq!(p.batting.runs, 6);
    assert_eq!(p.batting.balls, 5);
    assert_eq!(p.batting.dismissals, 1);
    assert_eq!(p.batting.average(), Average::Value { value: 6.0 });
    assert_eq!(p.batting.strike_rate(), Some(120.0));
}

#[test]
fn never_dismissed_batter_reports_not_out() {
    let e = engine();
    assert_eq!(
        player(&e, 4, Scope::Career).batting.average(),
        Average::NotOut { runs: 2 }
    );
    let gus = player(&e, 13, Scope::Career);
    assert_eq!(gus.batting.average(), Average::NotOut { runs: 13 });
    assert_eq!(gus.batting.not_outs(), 2);
}

#[test]
fn wides_are_not_balls_faced() {
    let p = player(&engine(), 2, Scope::Season("2024".to_string()));
    // 12 runs from 6 faced in match 1, then bowled first ball faced in match 2.
    assert_eq!(p.batting.runs, 12);
    assert_eq!(p.batting.balls, 7);
}

#[test]
fn economy_matches_a_raw_recount() {
    let store = store();
    let (mut runs, mut balls) = (0u32, 0u32);
    for m in store.matches() {
        for innings in &m.innings {
            for d in innings.deliveries.iter().filter(|d| d.bowler == 13) {
                runs += u32::from(d.bowler_runs());
                balls += u32::from(d.is_legal());
            }
        }
    }
    assert_eq!((runs, balls), (28, 18));

    let p = player(&engine(), 13, Scope::Career);
    assert_eq!(p.bowling.runs_conceded, runs);
    assert_eq!(p.bowling.legal_balls, balls);
    assert_eq!(p.bowling.wickets, 3);
    let economy = p.bowling.economy().unwrap();
    assert!((economy - runs as f64 * 6.0 / balls as f64).abs() < 1e-12);
}

#[test]
fn run_outs_do_not_count_for_the_bowler() {
    let p = player(&engine(), 3, Scope::Venue("Test Ground".to_string()));
    assert_eq!(p.bowling.wickets, 1);
    assert_eq!(p.bowling.runs_conceded, 20);
}

#[test]
fn team_record_counts_no_results_apart() {
    let e = engine();
    let Aggregate::Stat(AggregateStat::Team(alpha)) =
        e.aggregate(&Scope::Career, &Entity::Team("Alpha".to_string()))
    else {
        panic!("expected team aggregate");
    };
    assert_eq!(alpha.matches, 3);
    assert_eq!((alpha.wins, alpha.losses, alpha.no_results), (1, 1, 1));
    assert_eq!(alpha.win_rate(), Some(0.5));
    assert_eq!(alpha.runs_scored, 29);
    assert_eq!(alpha.runs_conceded, 32);
}

#[test]
fn empty_scope_is_typed_no_data() {
    let e = engine();
    let missing = e.aggregate(
        &Scope::Season("2030".to_string()),
        &Entity::Team("Alpha".to_string()),
    );
    assert!(missing.is_no_data());
    assert!(matches!(
        e.aggregate(&Scope::Career, &Entity::Player(999)),
        Aggregate::NoData(NoDataError::UnknownPlayer(999))
    ));
}

#[test]
fn head_to_head_is_symmetric() {
    let e = engine();
    let ab = e.head_to_head("Alpha", "Bravo", None);
    let ba = e.head_to_head("Bravo", "Alpha", None);
    assert_eq!(ab.matches, 3);
    assert_eq!((ab.a_wins, ab.b_wins, ab.no_results), (1, 1, 1));
    assert_eq!((ba.a_wins, ba.b_wins), (ab.b_wins, ab.a_wins));

    let at_venue = e.head_to_head("Alpha", "Bravo", Some("Other Park"));
    assert_eq!((at_venue.matches, at_venue.b_wins), (1, 1));
}

#[test]
fn form_prefers_recent_innings() {
    let aggregates = AggregationEngine::new(Arc::new(store()));
    // Player 1 scored 5 then 1.
    let simple = aggregates
        .form(1, &Scope::Career, Discipline::Batting, 5, FormWeighting::Simple)
        .unwrap();
    assert!((simple.value - 3.0).abs() < 1e-12);
    assert_eq!(simple.innings_used, 2);

    let weighted = aggregates
        .form(
            1,
            &Scope::Career,
            Discipline::Batting,
            5,
            FormWeighting::Exponential { decay: 0.5 },
        )
        .unwrap();
    // (1 * 1 + 5 * 0.5) / 1.5
    assert!((weighted.value - 7.0 / 3.0).abs() < 1e-12);
}

#[test]
fn repeated_queries_hit_the_cache() {
    let aggregates = AggregationEngine::new(Arc::new(store()));
    let first = aggregates.player(2, &Scope::Career).unwrap();
    let entries = aggregates.cached_entries();
    let second = aggregates.player(2, &Scope::Career).unwrap();
    assert_eq!(first, second);
    assert_eq!(aggregates.cached_entries(), entries);
}
