use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type PlayerId = u32;
pub type MatchId = u64;

pub const BALLS_PER_OVER: u16 = 6;
pub const DEFAULT_OVERS_PER_SIDE: u16 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraKind {
    Wide,
    NoBall,
    Bye,
    LegBye,
    Penalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extras {
    pub kind: ExtraKind,
    pub runs: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WicketKind {
    Bowled,
    Caught,
    CaughtAndBowled,
    Lbw,
    Stumped,
    HitWicket,
    RunOut,
    RetiredHurt,
    RetiredOut,
    ObstructingField,
    HandledBall,
    TimedOut,
}

impl WicketKind {
    pub fn credited_to_bowler(self) -> bool {
        matches!(
            self,
            WicketKind::Bowled
                | WicketKind::Caught
                | WicketKind::CaughtAndBowled
                | WicketKind::Lbw
                | WicketKind::Stumped
                | WicketKind::HitWicket
        )
    }

    /// Retired hurt is the only way to leave the crease without it counting as an out.
    pub fn counts_as_dismissal(self) -> bool {
        !matches!(self, WicketKind::RetiredHurt)
    }

    /// Kinds where either batter at the crease may be the one out.
    pub(crate) fn may_dismiss_non_striker(self) -> bool {
        matches!(
            self,
            WicketKind::RunOut
                | WicketKind::RetiredHurt
                | WicketKind::RetiredOut
                | WicketKind::ObstructingField
                | WicketKind::TimedOut
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wicket {
    pub kind: WicketKind,
    pub player_out: PlayerId,
    #[serde(default)]
    pub fielder: Option<PlayerId>,
}

/// One ball bowled. `over` is 0-based; `ball` is the 1-based position within the over
/// and keeps counting through re-bowled wides and no-balls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub match_id: MatchId,
    pub innings: u8,
    pub over: u16,
    pub ball: u8,
    pub batter: PlayerId,
    pub bowler: PlayerId,
    pub non_striker: PlayerId,
    #[serde(default)]
    pub runs_off_bat: u16,
    #[serde(default)]
    pub extras: Option<Extras>,
    #[serde(default)]
    pub wicket: Option<Wicket>,
}

impl Delivery {
    pub fn is_legal(&self) -> bool {
        !matches!(
            self.extras.map(|e| e.kind),
            Some(ExtraKind::Wide) | Some(ExtraKind::NoBall)
        )
    }

    /// Wides are not balls faced; no-balls are.
    pub fn faced_by_batter(&self) -> bool {
        !matches!(self.extras.map(|e| e.kind), Some(ExtraKind::Wide))
    }

    pub fn extra_runs(&self) -> u16 {
        self.extras.map(|e| e.runs).unwrap_or(0)
    }

    pub fn total_runs(&self) -> u16 {
        self.runs_off_bat + self.extra_runs()
    }

    /// Byes, leg-byes and penalties are not charged to the bowler.
    pub fn bowler_runs(&self) -> u16 {
        let charged_extras = match self.extras {
            Some(Extras {
                kind: ExtraKind::Wide | ExtraKind::NoBall,
                runs,
            }) => runs,
            _ => 0,
        };
        self.runs_off_bat + charged_extras
    }

    pub fn bowler_wicket(&self) -> bool {
        self.wicket.is_some_and(|w| w.kind.credited_to_bowler())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InningsStatus {
    Completed,
    Declared,
    AllOut,
    Interrupted,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Innings {
    pub match_id: MatchId,
    pub number: u8,
    pub batting_team: String,
    pub bowling_team: String,
    #[serde(default)]
    pub deliveries: Vec<Delivery>,
    pub status: InningsStatus,
    #[serde(default)]
    pub target: Option<u32>,
    #[serde(default)]
    pub allotted_overs: Option<u16>,
    #[serde(default)]
    pub super_over: bool,
}

impl Innings {
    pub fn total_runs(&self) -> u32 {
        self.deliveries.iter().map(|d| d.total_runs() as u32).sum()
    }

    pub fn wickets(&self) -> u8 {
        let n = self
            .deliveries
            .iter()
            .filter(|d| d.wicket.is_some_and(|w| w.kind.counts_as_dismissal()))
            .count();
        n.min(10) as u8
    }

    pub fn legal_balls(&self) -> u32 {
        self.deliveries.iter().filter(|d| d.is_legal()).count() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TossDecision {
    Bat,
    Field,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toss {
    pub winner: String,
    pub decision: TossDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Margin {
    Runs(u16),
    Wickets(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    Win { winner: String, margin: Margin },
    Tie,
    NoResult,
    SuperOver { winner: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    pub overs_lost: u16,
    #[serde(default)]
    pub revised_target: Option<u32>,
    #[serde(default)]
    pub revised_overs: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub season: String,
    pub date: NaiveDate,
    pub venue: String,
    pub teams: [String; 2],
    #[serde(default)]
    pub toss: Option<Toss>,
    #[serde(default)]
    pub innings: Vec<Innings>,
    pub result: MatchResult,
    #[serde(default)]
    pub interruption: Option<Interruption>,
    #[serde(default = "default_overs_per_side")]
    pub overs_per_side: u16,
}

fn default_overs_per_side() -> u16 {
    DEFAULT_OVERS_PER_SIDE
}

impl Match {
    pub fn involves(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }

    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        if self.teams[0] == team {
            Some(&self.teams[1])
        } else if self.teams[1] == team {
            Some(&self.teams[0])
        } else {
            None
        }
    }

    /// The winner, counting super-over decisions.
    pub fn winner(&self) -> Option<&str> {
        match &self.result {
            MatchResult::Win { winner, .. } | MatchResult::SuperOver { winner } => Some(winner),
            MatchResult::Tie | MatchResult::NoResult => None,
        }
    }

    /// Innings played in regulation time, excluding super overs.
    pub fn regulation_innings(&self) -> impl Iterator<Item = &Innings> {
        self.innings.iter().filter(|i| !i.super_over)
    }

    pub fn first_innings(&self) -> Option<&Innings> {
        self.regulation_innings().find(|i| i.number == 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    Batter,
    Bowler,
    AllRounder,
    Wicketkeeper,
}

impl PlayerRole {
    pub const ALL: [PlayerRole; 4] = [
        PlayerRole::Batter,
        PlayerRole::Bowler,
        PlayerRole::AllRounder,
        PlayerRole::Wicketkeeper,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PlayerRole::Batter => "batter",
            PlayerRole::Bowler => "bowler",
            PlayerRole::AllRounder => "all-rounder",
            PlayerRole::Wicketkeeper => "wicketkeeper",
        }
    }

    pub fn from_text(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_lowercase();
        if s.contains("keeper") || s == "wk" {
            return Some(PlayerRole::Wicketkeeper);
        }
        if (s.contains("all") && s.contains("round")) || s == "ar" {
            return Some(PlayerRole::AllRounder);
        }
        if s.contains("bowl") {
            return Some(PlayerRole::Bowler);
        }
        if s.contains("bat") {
            return Some(PlayerRole::Batter);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattingHand {
    Right,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BowlingStyle {
    RightArmFast,
    RightArmMedium,
    LeftArmFast,
    LeftArmMedium,
    OffSpin,
    LegSpin,
    LeftArmOrthodox,
    LeftArmWristSpin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub name: String,
    pub role: PlayerRole,
    pub batting_hand: BattingHand,
    #[serde(default)]
    pub bowling_style: Option<BowlingStyle>,
}

/// Parse cricket overs notation ("14.3" = 14 overs and 3 balls) into balls.
pub fn parse_overs(raw: &str) -> Option<u16> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let (overs, balls) = match s.split_once('.') {
        Some((o, b)) => (o.parse::<u16>().ok()?, b.parse::<u16>().ok()?),
        None => (s.parse::<u16>().ok()?, 0),
    };
    if balls >= BALLS_PER_OVER {
        return None;
    }
    overs.checked_mul(BALLS_PER_OVER)?.checked_add(balls)
}

/// Whole overs as balls, `None` when the count does not fit.
pub fn overs_to_balls(overs: u16) -> Option<u16> {
    overs.checked_mul(BALLS_PER_OVER)
}

pub fn format_overs(balls: u16) -> String {
    let overs = balls / BALLS_PER_OVER;
    let rem = balls % BALLS_PER_OVER;
    if rem == 0 {
        overs.to_string()
    } else {
        format!("{overs}.{rem}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(runs: u16, extras: Option<Extras>) -> Delivery {
        Delivery {
            match_id: 1,
            innings: 1,
            over: 0,
            ball: 1,
            batter: 1,
            bowler: 2,
            non_striker: 3,
            runs_off_bat: runs,
            extras,
            wicket: None,
        }
    }

    #[test]
    fn overs_notation_round_trips_common_values() {
        assert_eq!(parse_overs("14.3"), Some(87));
        assert_eq!(parse_overs("20"), Some(120));
        assert_eq!(parse_overs("3.6"), None);
        assert_eq!(parse_overs(""), None);
        assert_eq!(format_overs(87), "14.3");
        assert_eq!(format_overs(90), "15");
    }

    #[test]
    fn byes_are_not_charged_to_bowler() {
        let d = delivery(0, Some(Extras { kind: ExtraKind::LegBye, runs: 2 }));
        assert!(d.is_legal());
        assert_eq!(d.bowler_runs(), 0);
        assert_eq!(d.total_runs(), 2);
    }

    #[test]
    fn wide_is_not_faced_and_not_legal() {
        let d = delivery(0, Some(Extras { kind: ExtraKind::Wide, runs: 1 }));
        assert!(!d.is_legal());
        assert!(!d.faced_by_batter());
        assert_eq!(d.bowler_runs(), 1);

        let nb = delivery(4, Some(Extras { kind: ExtraKind::NoBall, runs: 1 }));
        assert!(!nb.is_legal());
        assert!(nb.faced_by_batter());
        assert_eq!(nb.bowler_runs(), 5);
    }

    #[test]
    fn role_from_text_handles_common_labels() {
        assert_eq!(PlayerRole::from_text("Wicketkeeper batter"), Some(PlayerRole::Wicketkeeper));
        assert_eq!(PlayerRole::from_text("All-rounder"), Some(PlayerRole::AllRounder));
        assert_eq!(PlayerRole::from_text("Bowling"), Some(PlayerRole::Bowler));
        assert_eq!(PlayerRole::from_text("opening batter"), Some(PlayerRole::Batter));
        assert_eq!(PlayerRole::from_text("coach"), None);
    }
}
