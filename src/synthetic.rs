use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ingest::MatchDocument;
use crate::model::{
    BALLS_PER_OVER, BattingHand, BowlingStyle, Delivery, ExtraKind, Extras, Innings,
    InningsStatus, Interruption, Margin, Match, MatchId, MatchResult, PlayerId, PlayerProfile,
    PlayerRole, Toss, TossDecision, Wicket, WicketKind,
};
use crate::target::ResourceTable;

const TEAM_NAMES: [&str; 8] = [
    "Northern Hawks",
    "Coastal Kings",
    "Capital Royals",
    "Desert Falcons",
    "River Titans",
    "Hill Strikers",
    "Harbour Giants",
    "Plains Riders",
];

const VENUES: [&str; 6] = [
    "Central Oval",
    "Riverside Ground",
    "Harbour Park",
    "Summit Stadium",
    "Eastfield",
    "Old Mill Ground",
];

const FIRST_NAMES: [&str; 12] = [
    "Arjun", "Ben", "Chris", "Dev", "Eli", "Faisal", "Gus", "Hari", "Imran", "Jack", "Kane",
    "Liam",
];

const LAST_NAMES: [&str; 12] = [
    "Shah", "Walker", "Patel", "Brooks", "Khan", "Reid", "Iyer", "Moore", "Das", "Hughes",
    "Malik", "Perera",
];

// 11-player template: keeper, four batters, two all-rounders, four bowlers.
const SQUAD_ROLES: [PlayerRole; 11] = [
    PlayerRole::Batter,
    PlayerRole::Wicketkeeper,
    PlayerRole::Batter,
    PlayerRole::Batter,
    PlayerRole::Batter,
    PlayerRole::AllRounder,
    PlayerRole::AllRounder,
    PlayerRole::Bowler,
    PlayerRole::Bowler,
    PlayerRole::Bowler,
    PlayerRole::Bowler,
];

const BOWLING_STYLES: [BowlingStyle; 6] = [
    BowlingStyle::RightArmFast,
    BowlingStyle::RightArmMedium,
    BowlingStyle::LeftArmFast,
    BowlingStyle::OffSpin,
    BowlingStyle::LegSpin,
    BowlingStyle::LeftArmOrthodox,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub teams: usize,
    pub matches: usize,
    pub overs_per_side: u16,
    pub start_date: NaiveDate,
    /// Share of matches where rain shortens the chase.
    pub interruption_rate: f64,
    pub no_result_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            teams: 6,
            matches: 120,
            overs_per_side: 20,
            start_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap_or_default(),
            interruption_rate: 0.05,
            no_result_rate: 0.02,
        }
    }
}

#[derive(Debug, Clone)]
struct TeamSheet {
    name: String,
    players: Vec<PlayerId>,
    /// Multiplier on boundary chances while batting.
    batting: f64,
    /// Multiplier on wicket chances while bowling.
    bowling: f64,
}

impl TeamSheet {
    fn bowlers(&self) -> &[PlayerId] {
        &self.players[5..]
    }
}

/// Longest limited-overs format the generator plays.
const MAX_LIMITED_OVERS: u16 = 50;

/// Generates a reproducible league of ball-by-ball matches. Every match passes store validation.
pub fn generate(cfg: &SyntheticConfig) -> MatchDocument {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let team_count = cfg.teams.max(2);
    let overs = cfg.overs_per_side.clamp(1, MAX_LIMITED_OVERS);

    let mut players = Vec::with_capacity(team_count * SQUAD_ROLES.len());
    let mut sheets = Vec::with_capacity(team_count);
    for t in 0..team_count {
        let name = TEAM_NAMES
            .get(t)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Team {}", t + 1));
        let mut ids = Vec::with_capacity(SQUAD_ROLES.len());
        for (slot, role) in SQUAD_ROLES.iter().enumerate() {
            let id = (t as PlayerId + 1) * 100 + slot as PlayerId + 1;
            ids.push(id);
            players.push(make_profile(&mut rng, id, *role));
        }
        sheets.push(TeamSheet {
            name,
            players: ids,
            batting: rng.gen_range(0.85..1.2),
            bowling: rng.gen_range(0.85..1.2),
        });
    }

    // Revised targets for rain-shortened chases.
    let table = ResourceTable::from_exponential_model("synthetic", overs, 0.04);

    let mut matches = Vec::with_capacity(cfg.matches);
    for i in 0..cfg.matches {
        let a = rng.gen_range(0..team_count);
        let mut b = rng.gen_range(0..team_count - 1);
        if b >= a {
            b += 1;
        }
        let date = cfg.start_date + Duration::days(2 * i as i64);
        let venue = VENUES.choose(&mut rng).copied().unwrap_or(VENUES[0]);
        matches.push(play_match(
            &mut rng,
            cfg,
            &table,
            i as MatchId + 1,
            date,
            venue,
            (&sheets[a], &sheets[b]),
            overs,
        ));
    }

    MatchDocument { players, matches }
}

fn make_profile(rng: &mut StdRng, id: PlayerId, role: PlayerRole) -> PlayerProfile {
    let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Sam");
    let last = LAST_NAMES.choose(rng).copied().unwrap_or("Smith");
    let batting_hand = if rng.gen_bool(0.3) {
        BattingHand::Left
    } else {
        BattingHand::Right
    };
    let bowling_style = match role {
        PlayerRole::Bowler | PlayerRole::AllRounder => BOWLING_STYLES.choose(rng).copied(),
        PlayerRole::Batter | PlayerRole::Wicketkeeper => None,
    };
    PlayerProfile {
        id,
        name: format!("{first} {last} {id}"),
        role,
        batting_hand,
        bowling_style,
    }
}

#[allow(clippy::too_many_arguments)]
fn play_match(
    rng: &mut StdRng,
    cfg: &SyntheticConfig,
    table: &ResourceTable,
    id: MatchId,
    date: NaiveDate,
    venue: &str,
    (home, away): (&TeamSheet, &TeamSheet),
    overs: u16,
) -> Match {
    let toss_winner = if rng.gen_bool(0.5) { home } else { away };
    let decision = if rng.gen_bool(0.6) {
        TossDecision::Field
    } else {
        TossDecision::Bat
    };
    let toss_loser = if std::ptr::eq(toss_winner, home) { away } else { home };
    let (first, second) = match decision {
        TossDecision::Bat => (toss_winner, toss_loser),
        TossDecision::Field => (toss_loser, toss_winner),
    };

    let mut m = Match {
        id,
        season: date.year().to_string(),
        date,
        venue: venue.to_string(),
        teams: [home.name.clone(), away.name.clone()],
        toss: Some(Toss {
            winner: toss_winner.name.clone(),
            decision,
        }),
        innings: Vec::new(),
        result: MatchResult::NoResult,
        interruption: None,
        overs_per_side: overs,
    };

    let first_innings = play_innings(rng, id, 1, first, second, overs, None);
    let first_total = first_innings.total_runs();
    m.innings.push(first_innings);

    if rng.gen_bool(cfg.no_result_rate.clamp(0.0, 1.0)) {
        return m;
    }

    let mut chase_overs = overs;
    let mut target = first_total + 1;
    if overs > 5 && rng.gen_bool(cfg.interruption_rate.clamp(0.0, 1.0)) {
        let lost = rng.gen_range(1..=overs / 4).max(1);
        chase_overs = overs - lost;
        target = rain_target(table, first_total, overs, chase_overs);
        m.interruption = Some(Interruption {
            overs_lost: lost,
            revised_target: Some(target),
            revised_overs: Some(chase_overs),
        });
    }

    let mut second_innings = play_innings(rng, id, 2, second, first, chase_overs, Some(target));
    if chase_overs != overs {
        second_innings.allotted_overs = Some(chase_overs);
    }
    let chased = second_innings.total_runs();
    let wickets = second_innings.wickets();
    m.innings.push(second_innings);

    m.result = if chased >= target {
        MatchResult::Win {
            winner: second.name.clone(),
            margin: Margin::Wickets(10 - wickets),
        }
    } else if chased + 1 == target {
        MatchResult::Tie
    } else {
        MatchResult::Win {
            winner: first.name.clone(),
            margin: Margin::Runs((target - 1 - chased) as u16),
        }
    };
    m
}

fn rain_target(table: &ResourceTable, score: u32, overs: u16, chase_overs: u16) -> u32 {
    let full = table.resource(overs * BALLS_PER_OVER, 0);
    let reduced = table.resource(chase_overs * BALLS_PER_OVER, 0);
    match (full, reduced) {
        (Ok(r1), Ok(r2)) if r1 > 0.0 => (f64::from(score) * r2 / r1 + 1e-9).floor() as u32 + 1,
        _ => score * u32::from(chase_overs) / u32::from(overs) + 1,
    }
}

fn play_innings(
    rng: &mut StdRng,
    match_id: MatchId,
    number: u8,
    batting: &TeamSheet,
    bowling: &TeamSheet,
    overs: u16,
    target: Option<u32>,
) -> Innings {
    let order = &batting.players;
    let bowlers = bowling.bowlers();
    let mut striker = 0usize;
    let mut non_striker = 1usize;
    let mut next_in = 2usize;
    let mut wickets = 0u8;
    let mut runs = 0u32;
    let mut deliveries = Vec::new();

    let wicket_p = 0.045 * bowling.bowling / batting.batting.max(0.5);
    let boundary_boost = batting.batting;

    'overs: for over in 0..overs {
        let bowler = bowlers[over as usize % bowlers.len()];
        let mut legal = 0u16;
        let mut ball = 0u8;
        while legal < BALLS_PER_OVER {
            ball += 1;
            let mut d = Delivery {
                match_id,
                innings: number,
                over,
                ball,
                batter: order[striker],
                bowler,
                non_striker: order[non_striker],
                runs_off_bat: 0,
                extras: None,
                wicket: None,
            };

            if ball < 12 && rng.gen_bool(0.04) {
                let kind = if rng.gen_bool(0.75) {
                    ExtraKind::Wide
                } else {
                    ExtraKind::NoBall
                };
                d.extras = Some(Extras { kind, runs: 1 });
                runs += 1;
                deliveries.push(d);
                if target.is_some_and(|t| runs >= t) {
                    break 'overs;
                }
                continue;
            }

            legal += 1;
            if rng.gen_bool(wicket_p.clamp(0.0, 0.5)) {
                let kind = match rng.gen_range(0..10) {
                    0..=4 => WicketKind::Caught,
                    5..=6 => WicketKind::Bowled,
                    7..=8 => WicketKind::Lbw,
                    _ => WicketKind::RunOut,
                };
                let fielder = match kind {
                    WicketKind::Caught | WicketKind::RunOut => {
                        bowling.players.choose(rng).copied()
                    }
                    _ => None,
                };
                d.wicket = Some(Wicket {
                    kind,
                    player_out: order[striker],
                    fielder,
                });
                deliveries.push(d);
                wickets += 1;
                if wickets >= 10 || next_in >= order.len() {
                    break 'overs;
                }
                striker = next_in;
                next_in += 1;
                continue;
            }

            let roll: f64 = rng.gen_range(0.0..1.0);
            let four = 0.10 * boundary_boost;
            let six = 0.05 * boundary_boost;
            let scored = if roll < six {
                6
            } else if roll < six + four {
                4
            } else if roll < six + four + 0.34 {
                1
            } else if roll < six + four + 0.42 {
                2
            } else if roll < six + four + 0.43 {
                3
            } else if roll < six + four + 0.45 {
                d.extras = Some(Extras {
                    kind: ExtraKind::LegBye,
                    runs: 1,
                });
                0
            } else {
                0
            };
            d.runs_off_bat = scored;
            let total = d.total_runs();
            runs += u32::from(total);
            deliveries.push(d);
            if total % 2 == 1 {
                std::mem::swap(&mut striker, &mut non_striker);
            }
            if target.is_some_and(|t| runs >= t) {
                break 'overs;
            }
        }
        std::mem::swap(&mut striker, &mut non_striker);
    }

    let status = if wickets >= 10 {
        InningsStatus::AllOut
    } else {
        InningsStatus::Completed
    };
    Innings {
        match_id,
        number,
        batting_team: batting.name.clone(),
        bowling_team: bowling.name.clone(),
        deliveries,
        status,
        target,
        allotted_overs: None,
        super_over: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_league() {
        let cfg = SyntheticConfig {
            matches: 12,
            ..SyntheticConfig::default()
        };
        let a = generate(&cfg);
        let b = generate(&cfg);
        assert_eq!(a.matches, b.matches);
        assert_eq!(a.players.len(), cfg.teams * 11);
    }

    #[test]
    fn generated_league_passes_validation() {
        let cfg = SyntheticConfig {
            matches: 40,
            interruption_rate: 0.3,
            ..SyntheticConfig::default()
        };
        let store = generate(&cfg).into_store().expect("valid synthetic data");
        assert_eq!(store.matches().len(), 40);
        for m in store.matches() {
            if let Some(chase) = m.innings.get(1)
                && let Some(target) = chase.target
            {
                assert!(chase.total_runs() < target + 6);
            }
        }
    }
}
