use std::path::Path;
use std::sync::Arc;

use cricket_insights::error::InterruptionDataError;
use cricket_insights::target::{
    Adjustment, ResourceRow, ResourceTable, ResourceTableFile, ResourceTableRegistry, Stoppage,
    TargetAdjuster, TargetRequest,
};

fn adjuster() -> TargetAdjuster {
    let mut tables = ResourceTableRegistry::new();
    tables
        .load_file(Path::new("tests/fixtures/tables/resource_table_t20.json"))
        .expect("fixture table loads");
    TargetAdjuster::new(Arc::new(tables), 5)
}

fn revised(adj: Adjustment) -> cricket_insights::target::RevisedTarget {
    match adj {
        Adjustment::Revised(r) => r,
        other => panic!("expected a revised target, got {other:?}"),
    }
}

#[test]
fn chase_cut_to_fifteen_overs_before_start() {
    let req = TargetRequest::before_start(180, 20, 15, "t20-test");
    let r = revised(adjuster().adjust(&req).unwrap());
    assert_eq!(r.target, 136);
    assert_eq!(r.allotted_balls, 90);
    assert_eq!(r.allotted_overs(), "15");
    assert!((r.team2_resources - 75.1).abs() < 1e-9);
    assert!(r.par_curve.is_empty());
}

#[test]
fn no_overs_lost_keeps_the_plain_target() {
    let req = TargetRequest::before_start(180, 20, 20, "t20-test");
    assert_eq!(revised(adjuster().adjust(&req).unwrap()).target, 181);

    let uninterrupted = TargetRequest {
        stoppages: Vec::new(),
        ..req
    };
    assert_eq!(revised(adjuster().adjust(&uninterrupted).unwrap()).target, 181);
}

#[test]
fn mid_innings_stoppage_uses_wickets_at_the_break() {
    let req = TargetRequest {
        first_innings_score: 180,
        team1_resources: None,
        original_overs: 20,
        stoppages: vec![Stoppage {
            balls_bowled: 60,
            wickets: 2,
            overs_lost: 5,
        }],
        table_version: "t20-test".to_string(),
        par_wickets: None,
    };
    let adj = adjuster();
    let r = revised(adj.adjust(&req).unwrap());
    // 100 - R(10 overs, 2 down) + R(5 overs, 2 down) = 100 - 50 + 25
    assert!((r.team2_resources - 75.0).abs() < 1e-9);
    assert_eq!(r.target, 136);
    assert_eq!(r.par_curve.len(), 15);
    assert!(r.par_curve.windows(2).all(|w| w[0].par <= w[1].par));

    assert_eq!(adj.par_score(&req, 60, 2).unwrap(), 90);
}

#[test]
fn missing_cell_is_an_error_not_an_estimate() {
    let req = TargetRequest {
        first_innings_score: 150,
        team1_resources: None,
        original_overs: 20,
        stoppages: vec![Stoppage {
            balls_bowled: 90,
            wickets: 9,
            overs_lost: 2,
        }],
        table_version: "t20-test".to_string(),
        par_wickets: None,
    };
    let err = adjuster().adjust(&req).unwrap_err();
    assert!(matches!(
        err,
        InterruptionDataError::ResourceUnavailable { wickets: 9, .. }
    ));
}

#[test]
fn chase_below_minimum_overs_has_no_result() {
    let req = TargetRequest::before_start(160, 20, 4, "t20-test");
    match adjuster().adjust(&req).unwrap() {
        Adjustment::NoResult {
            allotted_balls,
            minimum_balls,
        } => {
            assert_eq!(allotted_balls, 24);
            assert_eq!(minimum_balls, 30);
        }
        other => panic!("expected no result, got {other:?}"),
    }
}

#[test]
fn unknown_table_version_is_reported() {
    let req = TargetRequest::before_start(160, 20, 15, "odi-2002");
    assert_eq!(
        adjuster().adjust(&req).unwrap_err(),
        InterruptionDataError::UnknownTableVersion("odi-2002".to_string())
    );
}

#[test]
fn stoppages_out_of_order_are_rejected() {
    let req = TargetRequest {
        first_innings_score: 150,
        team1_resources: None,
        original_overs: 20,
        stoppages: vec![
            Stoppage {
                balls_bowled: 60,
                wickets: 1,
                overs_lost: 2,
            },
            Stoppage {
                balls_bowled: 30,
                wickets: 1,
                overs_lost: 2,
            },
        ],
        table_version: "t20-test".to_string(),
        par_wickets: None,
    };
    assert!(matches!(
        adjuster().adjust(&req),
        Err(InterruptionDataError::InvalidInterruption(_))
    ));
}

#[test]
fn huge_overs_lost_is_rejected_not_wrapped() {
    let req = TargetRequest {
        first_innings_score: 180,
        team1_resources: None,
        original_overs: 20,
        stoppages: vec![Stoppage {
            balls_bowled: 0,
            wickets: 0,
            overs_lost: 10_923,
        }],
        table_version: "t20-test".to_string(),
        par_wickets: None,
    };
    assert!(matches!(
        adjuster().adjust(&req),
        Err(InterruptionDataError::InvalidInterruption(_))
    ));
    assert!(matches!(
        adjuster().par_score(&req, 0, 0),
        Err(InterruptionDataError::InvalidInterruption(_))
    ));
}

#[test]
fn large_minimum_overs_does_not_overflow() {
    let mut tables = ResourceTableRegistry::new();
    tables
        .load_file(Path::new("tests/fixtures/tables/resource_table_t20.json"))
        .unwrap();
    let adjuster = TargetAdjuster::new(Arc::new(tables), u16::MAX);
    let req = TargetRequest::before_start(180, 20, 20, "t20-test");
    assert!(matches!(
        adjuster.adjust(&req).unwrap(),
        Adjustment::NoResult { allotted_balls: 120, .. }
    ));
}

#[test]
fn oversized_table_rows_are_rejected() {
    let file = ResourceTableFile {
        version: "wide".to_string(),
        max_overs: 20,
        average_score: None,
        rows: vec![ResourceRow {
            overs_left: 11_000,
            balls: 0,
            resources: vec![Some(50.0)],
        }],
    };
    assert!(matches!(
        ResourceTable::from_file(file),
        Err(InterruptionDataError::InvalidInterruption(_))
    ));

    let too_long = ResourceTableFile {
        version: "endless".to_string(),
        max_overs: 11_000,
        average_score: None,
        rows: Vec::new(),
    };
    assert!(ResourceTable::from_file(too_long).is_err());
}

#[test]
fn zero_first_innings_resources_is_rejected() {
    let file = ResourceTableFile {
        version: "flat".to_string(),
        max_overs: 20,
        average_score: None,
        rows: vec![
            ResourceRow {
                overs_left: 20,
                balls: 0,
                resources: vec![Some(0.0)],
            },
            ResourceRow {
                overs_left: 15,
                balls: 0,
                resources: vec![Some(0.0)],
            },
        ],
    };
    let mut tables = ResourceTableRegistry::new();
    tables.insert(ResourceTable::from_file(file).unwrap());
    let adjuster = TargetAdjuster::new(Arc::new(tables), 5);

    let req = TargetRequest::before_start(180, 20, 15, "flat");
    assert!(matches!(
        adjuster.adjust(&req),
        Err(InterruptionDataError::InvalidInterruption(_))
    ));
    assert!(matches!(
        adjuster.par_score(&req, 30, 1),
        Err(InterruptionDataError::InvalidInterruption(_))
    ));
}
