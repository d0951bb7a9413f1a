use chrono::NaiveDate;
use cricket_insights::config::EngineConfig;
use cricket_insights::engine::Engine;
use cricket_insights::error::{InfeasibleConstraintError, NoDataError};
use cricket_insights::ingest::MatchDocument;
use cricket_insights::model::{
    BattingHand, Delivery, Innings, InningsStatus, Match, MatchResult, PlayerId,
    PlayerProfile, PlayerRole, Wicket, WicketKind,
};
use cricket_insights::predict::ModelSlot;
use cricket_insights::squad::{
    EligibilityTag, SelectionMethod, SquadCandidate, SquadConstraints, SquadOptimizer,
};
use cricket_insights::synthetic::{self, SyntheticConfig};
use cricket_insights::target::ResourceTableRegistry;

fn league() -> Engine {
    let doc = synthetic::generate(&SyntheticConfig {
        seed: 11,
        matches: 80,
        ..SyntheticConfig::default()
    });
    Engine::new(
        EngineConfig {
            min_innings: 5,
            ..EngineConfig::default()
        },
        doc.into_store().expect("synthetic league is valid"),
        ModelSlot::Unavailable("not needed".to_string()),
        ResourceTableRegistry::new(),
    )
}

const BOWLER: PlayerId = 90;

/// Three balls faced by `batter`; the last one dismisses them.
fn spell(
    match_id: u64,
    first_ball: u8,
    batter: PlayerId,
    partner: PlayerId,
    runs: [u16; 2],
) -> Vec<Delivery> {
    (0..3u8)
        .map(|i| Delivery {
            match_id,
            innings: 1,
            over: 0,
            ball: first_ball + i,
            batter,
            bowler: BOWLER,
            non_striker: partner,
            runs_off_bat: runs.get(i as usize).copied().unwrap_or(0),
            extras: None,
            wicket: (i == 2).then_some(Wicket {
                kind: WicketKind::Bowled,
                player_out: batter,
                fielder: None,
            }),
        })
        .collect()
}

fn pair_match(
    id: u64,
    (a, a_runs): (PlayerId, [u16; 2]),
    (b, b_runs): (PlayerId, [u16; 2]),
) -> Match {
    let mut deliveries = spell(id, 1, a, b, a_runs);
    deliveries.extend(spell(id, 4, b, a, b_runs));
    Match {
        id,
        season: "2024".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + chrono::Days::new(id),
        venue: "Nets".to_string(),
        teams: ["Reds".to_string(), "Blues".to_string()],
        toss: None,
        innings: vec![Innings {
            match_id: id,
            number: 1,
            batting_team: "Reds".to_string(),
            bowling_team: "Blues".to_string(),
            deliveries,
            status: InningsStatus::AllOut,
            target: None,
            allotted_overs: None,
            super_over: false,
        }],
        result: MatchResult::NoResult,
        interruption: None,
        overs_per_side: 20,
    }
}

/// Players 2, 3 and 5 bat identically; 3 has the most innings, 4 only two.
fn net_session() -> Engine {
    const STEADY: [u16; 2] = [4, 0];
    const QUERY: [u16; 2] = [6, 1];
    let mut matches = Vec::new();
    let mut id = 0;
    let mut add = |a: (PlayerId, [u16; 2]), b: (PlayerId, [u16; 2]), times: usize| {
        for _ in 0..times {
            id += 1;
            matches.push(pair_match(id, a, b));
        }
    };
    add((2, STEADY), (3, STEADY), 6);
    add((3, STEADY), (4, STEADY), 2);
    add((5, STEADY), (1, QUERY), 6);
    add((1, QUERY), (6, [1, 1]), 1);

    let players = [1, 2, 3, 4, 5, 6, BOWLER]
        .into_iter()
        .map(|pid| PlayerProfile {
            id: pid,
            name: format!("Player {pid}"),
            role: if pid == BOWLER {
                PlayerRole::Bowler
            } else {
                PlayerRole::Batter
            },
            batting_hand: BattingHand::Right,
            bowling_style: None,
        })
        .collect();
    let doc = MatchDocument { players, matches };
    Engine::new(
        EngineConfig {
            min_innings: 5,
            ..EngineConfig::default()
        },
        doc.into_store().expect("hand-built matches are valid"),
        ModelSlot::Unavailable("not needed".to_string()),
        ResourceTableRegistry::new(),
    )
}

fn cand(id: PlayerId, role: PlayerRole, score: f64) -> SquadCandidate {
    SquadCandidate {
        player_id: id,
        role,
        score,
        tags: Vec::new(),
    }
}

#[test]
fn similar_players_exclude_the_query_and_are_ranked() {
    let engine = league();
    let out = engine.similar_players(101, 5, None).unwrap();
    assert_eq!(out.player, 101);
    assert_eq!(out.results.len(), 5);
    assert!(out.results.iter().all(|r| r.player != 101));
    assert!(out.results.iter().all(|r| (-1.0 - 1e-9..=1.0 + 1e-9).contains(&r.similarity)));
    for pair in out.results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn role_filter_restricts_results() {
    let engine = league();
    let bowlers = engine
        .similar_players(108, 4, Some(PlayerRole::Bowler))
        .unwrap();
    assert!(!bowlers.results.is_empty());
    assert!(bowlers.results.iter().all(|r| r.role == PlayerRole::Bowler));
}

#[test]
fn unknown_player_has_no_neighbours() {
    assert_eq!(
        league().similar_players(99_999, 3, None).unwrap_err(),
        NoDataError::UnknownPlayer(99_999)
    );
}

#[test]
fn equal_similarity_prefers_more_innings_then_lower_id() {
    let out = net_session().similar_players(1, 10, None).unwrap();
    assert!(!out.low_confidence);

    let twins: Vec<_> = out
        .results
        .iter()
        .filter(|r| [2, 3, 5].contains(&r.player))
        .collect();
    assert_eq!(
        twins.iter().map(|r| r.player).collect::<Vec<_>>(),
        vec![3, 2, 5]
    );
    assert_eq!(
        twins.iter().map(|r| r.innings).collect::<Vec<_>>(),
        vec![8, 6, 6]
    );
    assert_eq!(twins[0].similarity, twins[1].similarity);
    assert_eq!(twins[1].similarity, twins[2].similarity);
    let first = out.results.iter().position(|r| r.player == 3).unwrap();
    assert_eq!(out.results[first + 1].player, 2);
    assert_eq!(out.results[first + 2].player, 5);
}

#[test]
fn thin_samples_are_left_out_and_flagged() {
    let engine = net_session();
    let out = engine.similar_players(1, 10, None).unwrap();
    assert!(out.results.iter().all(|r| r.player != 4 && r.player != 6));
    assert!(out.results.iter().all(|r| r.innings >= 5));

    let thin = engine.similar_players(4, 10, None).unwrap();
    assert!(thin.low_confidence);
    assert!(thin.results.iter().all(|r| r.player != 4));
    assert!(!thin.results.is_empty());
}

#[test]
fn keeper_cap_breaks_ties_by_lowest_id() {
    let mut pool: Vec<SquadCandidate> = (1..=15)
        .map(|id| cand(id, PlayerRole::Wicketkeeper, 50.0))
        .collect();
    pool.extend((101..=104).map(|id| cand(id, PlayerRole::Bowler, 45.0)));
    pool.extend((1..=10).map(|i| cand(200 + i, PlayerRole::Batter, 40.0 - i as f64)));

    let squad = SquadOptimizer::new(SquadConstraints {
        max_keepers: Some(1),
        ..SquadConstraints::default()
    })
    .select(&pool)
    .unwrap();

    assert_eq!(
        squad.ids(),
        vec![1, 101, 102, 103, 104, 201, 202, 203, 204, 205, 206]
    );
    assert_eq!(squad.keepers, 1);
    assert_eq!(squad.bowlers, 4);
    assert!((squad.total_score - (50.0 + 4.0 * 45.0 + 39.0 + 38.0 + 37.0 + 36.0 + 35.0 + 34.0)).abs() < 1e-9);
}

#[test]
fn missing_keeper_is_reported() {
    let mut pool: Vec<SquadCandidate> =
        (1..=8).map(|id| cand(id, PlayerRole::Batter, 30.0)).collect();
    pool.extend((20..=24).map(|id| cand(id, PlayerRole::Bowler, 25.0)));

    let err = SquadOptimizer::new(SquadConstraints::default())
        .select(&pool)
        .unwrap_err();
    assert_eq!(
        err,
        InfeasibleConstraintError::NotEnoughKeepers {
            available: 0,
            required: 1
        }
    );
}

#[test]
fn foreign_cap_is_respected() {
    let mut pool: Vec<SquadCandidate> = (1..=8)
        .map(|id| SquadCandidate {
            tags: vec![EligibilityTag::Foreign],
            ..cand(id, PlayerRole::Batter, 90.0)
        })
        .collect();
    pool.push(cand(20, PlayerRole::Wicketkeeper, 10.0));
    pool.extend((21..=24).map(|id| cand(id, PlayerRole::Batter, 10.0)));
    pool.extend((30..=35).map(|id| cand(id, PlayerRole::Bowler, 10.0)));

    let squad = SquadOptimizer::new(SquadConstraints::default())
        .select(&pool)
        .unwrap();
    assert_eq!(squad.foreign, 4);
    assert_eq!(squad.players.len(), 11);
    assert!(squad.keepers >= 1 && squad.bowlers >= 3 && squad.batting_depth >= 5);
}

#[test]
fn search_takes_over_when_greedy_picks_the_wrong_keeper() {
    let foreign = |c: SquadCandidate| SquadCandidate {
        tags: vec![EligibilityTag::Foreign],
        ..c
    };
    let mut pool = vec![
        foreign(cand(1, PlayerRole::Wicketkeeper, 100.0)),
        cand(2, PlayerRole::Wicketkeeper, 10.0),
    ];
    pool.extend((11..=14).map(|id| foreign(cand(id, PlayerRole::Batter, 101.0 - id as f64))));
    pool.extend((21..=23).map(|id| cand(id, PlayerRole::Batter, 51.0 - id as f64)));
    pool.extend((31..=33).map(|id| cand(id, PlayerRole::Bowler, 51.0 - id as f64)));

    // Every domestic player is needed, so the lone domestic keeper must play.
    let squad = SquadOptimizer::new(SquadConstraints {
        max_keepers: Some(1),
        ..SquadConstraints::default()
    })
    .select(&pool)
    .unwrap();

    assert!(matches!(squad.method, SelectionMethod::Backtracking { nodes } if nodes > 0));
    let mut ids = squad.ids();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 11, 12, 13, 14, 21, 22, 23, 31, 32, 33]);
    assert_eq!(squad.keepers, 1);
    assert_eq!(squad.foreign, 4);
    assert_eq!(squad.bowlers, 3);
    assert_eq!(squad.batting_depth, 8);
    assert!((squad.total_score - 508.0).abs() < 1e-9);
}

#[test]
fn engine_scores_pool_from_recent_form() {
    let engine = league();
    let pool: Vec<(PlayerId, Vec<EligibilityTag>)> = (1..=6u32)
        .flat_map(|team| (1..=11u32).map(move |slot| team * 100 + slot))
        .map(|id| (id, Vec::new()))
        .collect();
    let candidates = engine.score_candidates(&pool);
    assert_eq!(candidates.len(), 66);
    assert!(candidates.iter().any(|c| c.score > 0.0));

    let squad = engine.build_squad(&candidates, None).unwrap();
    assert_eq!(squad.players.len(), 11);
    for pair in squad.players.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}
