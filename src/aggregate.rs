use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NoDataError;
use crate::model::{
    BALLS_PER_OVER, InningsStatus, Match, MatchId, MatchResult, PlayerId, WicketKind,
};
use crate::store::{DataVersion, DeliveryStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scope {
    Career,
    Season(String),
    Venue(String),
    Opponent(String),
}

impl Scope {
    fn admits(&self, ctx: &MatchContext) -> bool {
        match self {
            Scope::Career => true,
            Scope::Season(season) => ctx.season == *season,
            Scope::Venue(venue) => ctx.venue == *venue,
            Scope::Opponent(team) => ctx.opponent == *team,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Career => write!(f, "career"),
            Scope::Season(s) => write!(f, "season {s}"),
            Scope::Venue(v) => write!(f, "venue {v}"),
            Scope::Opponent(t) => write!(f, "vs {t}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Entity {
    Player(PlayerId),
    Team(String),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Player(id) => write!(f, "player {id}"),
            Entity::Team(name) => write!(f, "team {name}"),
        }
    }
}

/// Where and against whom a match line was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchContext {
    pub match_id: MatchId,
    pub date: NaiveDate,
    pub season: String,
    pub venue: String,
    pub team: String,
    pub opponent: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BattingInnings {
    pub runs: u32,
    pub balls: u32,
    pub fours: u32,
    pub sixes: u32,
    pub dots: u32,
    pub out: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BowlingInnings {
    pub legal_balls: u32,
    pub runs_conceded: u32,
    pub wickets: u32,
    pub maidens: u32,
    pub dots: u32,
}

/// One player's contribution to one match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerMatchLine {
    pub ctx: MatchContext,
    pub batting: Vec<BattingInnings>,
    pub bowling: Vec<BowlingInnings>,
    pub catches: u32,
    pub stumpings: u32,
    pub run_outs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamOutcome {
    Won,
    Lost,
    Tied,
    NoResult,
}

impl TeamOutcome {
    /// 1 for a win, 0 for a loss, a half share otherwise.
    pub fn score(self) -> f64 {
        match self {
            TeamOutcome::Won => 1.0,
            TeamOutcome::Lost => 0.0,
            TeamOutcome::Tied | TeamOutcome::NoResult => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMatchLine {
    pub ctx: MatchContext,
    pub outcome: TeamOutcome,
    pub batted_first: Option<bool>,
    pub won_toss: bool,
    pub runs_scored: u32,
    pub wickets_lost: u32,
    pub balls_faced: u32,
    pub runs_conceded: u32,
    pub wickets_taken: u32,
    pub balls_bowled: u32,
    pub first_innings_total: Option<u32>,
}

/// Batting average, or the not-out sentinel when the batter was never dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Average {
    Value { value: f64 },
    NotOut { runs: u32 },
}

impl Average {
    pub fn value(self) -> Option<f64> {
        match self {
            Average::Value { value } => Some(value),
            Average::NotOut { .. } => None,
        }
    }
}

impl fmt::Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Average::Value { value } => write!(f, "{value:.2}"),
            Average::NotOut { runs } => write!(f, "{runs}* (not out)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BattingCounts {
    pub innings: u32,
    pub runs: u32,
    pub balls: u32,
    pub dismissals: u32,
    pub fours: u32,
    pub sixes: u32,
    pub dots: u32,
    pub highest: u32,
    pub fifties: u32,
    pub hundreds: u32,
}

impl BattingCounts {
    fn add(&mut self, inn: &BattingInnings) {
        self.innings += 1;
        self.runs += inn.runs;
        self.balls += inn.balls;
        self.dismissals += u32::from(inn.out);
        self.fours += inn.fours;
        self.sixes += inn.sixes;
        self.dots += inn.dots;
        self.highest = self.highest.max(inn.runs);
        if inn.runs >= 100 {
            self.hundreds += 1;
        } else if inn.runs >= 50 {
            self.fifties += 1;
        }
    }

    pub fn not_outs(&self) -> u32 {
        self.innings.saturating_sub(self.dismissals)
    }

    pub fn average(&self) -> Average {
        if self.dismissals == 0 {
            Average::NotOut { runs: self.runs }
        } else {
            Average::Value {
                value: self.runs as f64 / self.dismissals as f64,
            }
        }
    }

    pub fn strike_rate(&self) -> Option<f64> {
        (self.balls > 0).then(|| self.runs as f64 * 100.0 / self.balls as f64)
    }

    pub fn boundary_count(&self) -> u32 {
        self.fours + self.sixes
    }

    /// Share of balls faced that went for four or six.
    pub fn boundary_pct(&self) -> Option<f64> {
        (self.balls > 0).then(|| self.boundary_count() as f64 * 100.0 / self.balls as f64)
    }

    pub fn dot_pct(&self) -> Option<f64> {
        (self.balls > 0).then(|| self.dots as f64 * 100.0 / self.balls as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BowlingCounts {
    pub innings: u32,
    pub legal_balls: u32,
    pub runs_conceded: u32,
    pub wickets: u32,
    pub maidens: u32,
    pub dots: u32,
}

impl BowlingCounts {
    fn add(&mut self, inn: &BowlingInnings) {
        self.innings += 1;
        self.legal_balls += inn.legal_balls;
        self.runs_conceded += inn.runs_conceded;
        self.wickets += inn.wickets;
        self.maidens += inn.maidens;
        self.dots += inn.dots;
    }

    pub fn economy(&self) -> Option<f64> {
        (self.legal_balls > 0)
            .then(|| self.runs_conceded as f64 * BALLS_PER_OVER as f64 / self.legal_balls as f64)
    }

    pub fn average(&self) -> Option<f64> {
        (self.wickets > 0).then(|| self.runs_conceded as f64 / self.wickets as f64)
    }

    pub fn strike_rate(&self) -> Option<f64> {
        (self.wickets > 0).then(|| self.legal_balls as f64 / self.wickets as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldingCounts {
    pub catches: u32,
    pub stumpings: u32,
    pub run_outs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerAggregate {
    pub player: PlayerId,
    pub scope: Scope,
    pub matches: u32,
    pub batting: BattingCounts,
    pub bowling: BowlingCounts,
    pub fielding: FieldingCounts,
}

impl PlayerAggregate {
    /// Innings in which the player batted or bowled.
    pub fn innings_played(&self) -> u32 {
        self.batting.innings + self.bowling.innings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamAggregate {
    pub team: String,
    pub scope: Scope,
    pub matches: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub no_results: u32,
    pub runs_scored: u32,
    pub wickets_lost: u32,
    pub balls_faced: u32,
    pub runs_conceded: u32,
    pub wickets_taken: u32,
    pub balls_bowled: u32,
}

impl TeamAggregate {
    /// Wins (ties as half) over matches with a result.
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.matches - self.no_results;
        (decided > 0).then(|| (self.wins as f64 + 0.5 * self.ties as f64) / decided as f64)
    }

    /// Laplace-smoothed win rate; 0.5 with no history.
    pub fn smoothed_win_rate(&self) -> f64 {
        let decided = (self.matches - self.no_results) as f64;
        (self.wins as f64 + 0.5 * self.ties as f64 + 1.0) / (decided + 2.0)
    }

    pub fn run_rate(&self) -> Option<f64> {
        (self.balls_faced > 0)
            .then(|| self.runs_scored as f64 * BALLS_PER_OVER as f64 / self.balls_faced as f64)
    }

    pub fn economy(&self) -> Option<f64> {
        (self.balls_bowled > 0)
            .then(|| self.runs_conceded as f64 * BALLS_PER_OVER as f64 / self.balls_bowled as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum AggregateStat {
    Player(PlayerAggregate),
    Team(TeamAggregate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadToHead {
    pub team_a: String,
    pub team_b: String,
    pub matches: u32,
    pub a_wins: u32,
    pub b_wins: u32,
    pub ties: u32,
    pub no_results: u32,
}

impl HeadToHead {
    pub fn decided(&self) -> u32 {
        self.a_wins + self.b_wins + self.ties
    }

    /// Team A's share of the decided meetings, pulled toward even on small samples.
    pub fn a_share_smoothed(&self) -> f64 {
        (self.a_wins as f64 + 0.5 * self.ties as f64 + 1.0) / (self.decided() as f64 + 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    Batting,
    Bowling,
    Fantasy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormWeighting {
    Simple,
    Exponential { decay: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FormMetric {
    pub value: f64,
    pub innings_used: usize,
    pub window: usize,
}

/// Points table used to score an individual match line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FantasyScoring {
    pub per_run: f64,
    pub boundary_bonus: f64,
    pub six_bonus: f64,
    pub fifty_bonus: f64,
    pub hundred_bonus: f64,
    pub duck_penalty: f64,
    pub per_wicket: f64,
    pub three_wicket_bonus: f64,
    pub per_maiden: f64,
    pub per_catch: f64,
    pub per_stumping: f64,
    pub per_run_out: f64,
}

impl Default for FantasyScoring {
    fn default() -> Self {
        Self {
            per_run: 1.0,
            boundary_bonus: 1.0,
            six_bonus: 2.0,
            fifty_bonus: 8.0,
            hundred_bonus: 16.0,
            duck_penalty: -2.0,
            per_wicket: 25.0,
            three_wicket_bonus: 4.0,
            per_maiden: 12.0,
            per_catch: 8.0,
            per_stumping: 12.0,
            per_run_out: 6.0,
        }
    }
}

impl FantasyScoring {
    pub fn points(&self, line: &PlayerMatchLine) -> f64 {
        let mut pts = 0.0;
        for inn in &line.batting {
            pts += inn.runs as f64 * self.per_run;
            pts += inn.fours as f64 * self.boundary_bonus;
            pts += inn.sixes as f64 * self.six_bonus;
            if inn.runs >= 100 {
                pts += self.hundred_bonus;
            } else if inn.runs >= 50 {
                pts += self.fifty_bonus;
            }
            if inn.out && inn.runs == 0 {
                pts += self.duck_penalty;
            }
        }
        for inn in &line.bowling {
            pts += inn.wickets as f64 * self.per_wicket;
            if inn.wickets >= 3 {
                pts += self.three_wicket_bonus;
            }
            pts += inn.maidens as f64 * self.per_maiden;
        }
        pts += line.catches as f64 * self.per_catch;
        pts += line.stumpings as f64 * self.per_stumping;
        pts += line.run_outs as f64 * self.per_run_out;
        pts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    version: DataVersion,
    scope: Scope,
    entity: Entity,
}

/// Rolls deliveries up into player and team statistics.
///
/// Match lines are derived once when the engine is built; every query folds the
/// lines that fall inside its scope. Folded results are memoized per data version.
#[derive(Debug)]
pub struct AggregationEngine {
    store: Arc<DeliveryStore>,
    player_lines: HashMap<PlayerId, Vec<PlayerMatchLine>>,
    team_lines: HashMap<String, Vec<TeamMatchLine>>,
    cache: RwLock<HashMap<CacheKey, AggregateStat>>,
}

impl AggregationEngine {
    pub fn new(store: Arc<DeliveryStore>) -> Self {
        let per_match: Vec<(Vec<(PlayerId, PlayerMatchLine)>, Vec<TeamMatchLine>)> = store
            .matches()
            .par_iter()
            .map(|m| (player_lines_for_match(m), team_lines_for_match(m)))
            .collect();

        let mut player_lines: HashMap<PlayerId, Vec<PlayerMatchLine>> = HashMap::new();
        let mut team_lines: HashMap<String, Vec<TeamMatchLine>> = HashMap::new();
        for (players, teams) in per_match {
            for (id, line) in players {
                player_lines.entry(id).or_default().push(line);
            }
            for line in teams {
                team_lines.entry(line.ctx.team.clone()).or_default().push(line);
            }
        }

        debug!(
            version = %store.version(),
            players = player_lines.len(),
            teams = team_lines.len(),
            "built match lines"
        );

        Self {
            store,
            player_lines,
            team_lines,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &DeliveryStore {
        &self.store
    }

    pub fn version(&self) -> &DataVersion {
        self.store.version()
    }

    /// Lines for one player, oldest first.
    pub fn player_lines(&self, player: PlayerId) -> &[PlayerMatchLine] {
        self.player_lines
            .get(&player)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn team_lines(&self, team: &str) -> &[TeamMatchLine] {
        self.team_lines
            .get(team)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn aggregate(&self, scope: &Scope, entity: &Entity) -> Result<AggregateStat, NoDataError> {
        match entity {
            Entity::Player(id) => self.player(*id, scope).map(AggregateStat::Player),
            Entity::Team(name) => self.team(name, scope).map(AggregateStat::Team),
        }
    }

    pub fn player(&self, player: PlayerId, scope: &Scope) -> Result<PlayerAggregate, NoDataError> {
        let key = self.cache_key(scope, Entity::Player(player));
        if let Some(AggregateStat::Player(hit)) = self.cached(&key) {
            return Ok(hit);
        }
        debug!(entity = %key.entity, %scope, "aggregate cache miss");
        let stat = self.fold_player(player, scope)?;
        self.remember(key, AggregateStat::Player(stat.clone()));
        Ok(stat)
    }

    pub fn team(&self, team: &str, scope: &Scope) -> Result<TeamAggregate, NoDataError> {
        let key = self.cache_key(scope, Entity::Team(team.to_string()));
        if let Some(AggregateStat::Team(hit)) = self.cached(&key) {
            return Ok(hit);
        }
        debug!(entity = %key.entity, %scope, "aggregate cache miss");
        let stat = self.fold_team(team, scope, None)?;
        self.remember(key, AggregateStat::Team(stat.clone()));
        Ok(stat)
    }

    fn cache_key(&self, scope: &Scope, entity: Entity) -> CacheKey {
        CacheKey {
            version: self.version().clone(),
            scope: scope.clone(),
            entity,
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<AggregateStat> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember(&self, key: CacheKey, stat: AggregateStat) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, stat);
    }

    /// Number of memoized folds.
    pub fn cached_entries(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Team record from matches strictly before `before`. Not cached; used for
    /// point-in-time features.
    pub fn team_before(
        &self,
        team: &str,
        scope: &Scope,
        before: NaiveDate,
    ) -> Result<TeamAggregate, NoDataError> {
        self.fold_team(team, scope, Some(before))
    }

    fn fold_player(&self, player: PlayerId, scope: &Scope) -> Result<PlayerAggregate, NoDataError> {
        let Some(lines) = self.player_lines.get(&player) else {
            return Err(if self.store.player(player).is_some() {
                NoDataError::EmptyScope {
                    entity: Entity::Player(player).to_string(),
                    scope: scope.to_string(),
                }
            } else {
                NoDataError::UnknownPlayer(player)
            });
        };

        let mut out = PlayerAggregate {
            player,
            scope: scope.clone(),
            matches: 0,
            batting: BattingCounts::default(),
            bowling: BowlingCounts::default(),
            fielding: FieldingCounts::default(),
        };
        for line in lines.iter().filter(|l| scope.admits(&l.ctx)) {
            out.matches += 1;
            for inn in &line.batting {
                out.batting.add(inn);
            }
            for inn in &line.bowling {
                out.bowling.add(inn);
            }
            out.fielding.catches += line.catches;
            out.fielding.stumpings += line.stumpings;
            out.fielding.run_outs += line.run_outs;
        }

        if out.innings_played() == 0 {
            return Err(NoDataError::EmptyScope {
                entity: Entity::Player(player).to_string(),
                scope: scope.to_string(),
            });
        }
        Ok(out)
    }

    fn fold_team(
        &self,
        team: &str,
        scope: &Scope,
        before: Option<NaiveDate>,
    ) -> Result<TeamAggregate, NoDataError> {
        let Some(lines) = self.team_lines.get(team) else {
            return Err(NoDataError::UnknownTeam(team.to_string()));
        };

        let mut out = TeamAggregate {
            team: team.to_string(),
            scope: scope.clone(),
            matches: 0,
            wins: 0,
            losses: 0,
            ties: 0,
            no_results: 0,
            runs_scored: 0,
            wickets_lost: 0,
            balls_faced: 0,
            runs_conceded: 0,
            wickets_taken: 0,
            balls_bowled: 0,
        };
        for line in lines
            .iter()
            .filter(|l| before.is_none_or(|d| l.ctx.date < d))
            .filter(|l| scope.admits(&l.ctx))
        {
            out.matches += 1;
            match line.outcome {
                TeamOutcome::Won => out.wins += 1,
                TeamOutcome::Lost => out.losses += 1,
                TeamOutcome::Tied => out.ties += 1,
                TeamOutcome::NoResult => out.no_results += 1,
            }
            out.runs_scored += line.runs_scored;
            out.wickets_lost += line.wickets_lost;
            out.balls_faced += line.balls_faced;
            out.runs_conceded += line.runs_conceded;
            out.wickets_taken += line.wickets_taken;
            out.balls_bowled += line.balls_bowled;
        }

        if out.matches == 0 {
            return Err(NoDataError::EmptyScope {
                entity: Entity::Team(team.to_string()).to_string(),
                scope: scope.to_string(),
            });
        }
        Ok(out)
    }

    pub fn head_to_head(
        &self,
        team_a: &str,
        team_b: &str,
        venue: Option<&str>,
        before: Option<NaiveDate>,
    ) -> HeadToHead {
        let mut out = HeadToHead {
            team_a: team_a.to_string(),
            team_b: team_b.to_string(),
            matches: 0,
            a_wins: 0,
            b_wins: 0,
            ties: 0,
            no_results: 0,
        };
        for line in self
            .team_lines(team_a)
            .iter()
            .filter(|l| l.ctx.opponent == team_b)
            .filter(|l| venue.is_none_or(|v| l.ctx.venue == v))
            .filter(|l| before.is_none_or(|d| l.ctx.date < d))
        {
            out.matches += 1;
            match line.outcome {
                TeamOutcome::Won => out.a_wins += 1,
                TeamOutcome::Lost => out.b_wins += 1,
                TeamOutcome::Tied => out.ties += 1,
                TeamOutcome::NoResult => out.no_results += 1,
            }
        }
        out
    }

    /// Weighted mean of the most recent `window` innings in scope, most recent first.
    pub fn form(
        &self,
        player: PlayerId,
        scope: &Scope,
        discipline: Discipline,
        window: usize,
        weighting: FormWeighting,
    ) -> Result<FormMetric, NoDataError> {
        let lines = self.player_lines.get(&player).ok_or_else(|| {
            if self.store.player(player).is_some() {
                NoDataError::EmptyScope {
                    entity: Entity::Player(player).to_string(),
                    scope: scope.to_string(),
                }
            } else {
                NoDataError::UnknownPlayer(player)
            }
        })?;

        let scoring = FantasyScoring::default();
        let recent: Vec<f64> = lines
            .iter()
            .rev()
            .filter(|l| scope.admits(&l.ctx))
            .flat_map(|l| -> Vec<f64> {
                match discipline {
                    Discipline::Batting => l.batting.iter().rev().map(|b| b.runs as f64).collect(),
                    Discipline::Bowling => {
                        l.bowling.iter().rev().map(|b| b.wickets as f64).collect()
                    }
                    Discipline::Fantasy => vec![scoring.points(l)],
                }
            })
            .take(window.max(1))
            .collect();

        if recent.is_empty() {
            return Err(NoDataError::EmptyScope {
                entity: Entity::Player(player).to_string(),
                scope: scope.to_string(),
            });
        }

        Ok(FormMetric {
            value: weighted_recent_mean(&recent, weighting),
            innings_used: recent.len(),
            window,
        })
    }

    /// Exponentially weighted result score over a team's last `window` matches
    /// played before `before` (all matches when `None`).
    pub fn team_form(
        &self,
        team: &str,
        window: usize,
        weighting: FormWeighting,
        before: Option<NaiveDate>,
    ) -> Option<f64> {
        let recent: Vec<f64> = self
            .team_lines(team)
            .iter()
            .rev()
            .filter(|l| before.is_none_or(|d| l.ctx.date < d))
            .take(window.max(1))
            .map(|l| l.outcome.score())
            .collect();
        (!recent.is_empty()).then(|| weighted_recent_mean(&recent, weighting))
    }

    /// Mean first-innings total at a venue (all venues when `None`).
    pub fn first_innings_average(&self, venue: Option<&str>, before: Option<NaiveDate>) -> Option<f64> {
        let totals: Vec<u32> = self
            .store
            .matches()
            .iter()
            .filter(|m| venue.is_none_or(|v| m.venue == v))
            .filter(|m| before.is_none_or(|d| m.date < d))
            .filter(|m| m.interruption.is_none())
            .filter_map(|m| m.first_innings())
            .filter(|i| matches!(i.status, InningsStatus::Completed | InningsStatus::AllOut))
            .map(|i| i.total_runs())
            .collect();
        (!totals.is_empty())
            .then(|| totals.iter().map(|t| *t as f64).sum::<f64>() / totals.len() as f64)
    }

    /// Career aggregates for every player with at least one innings.
    pub fn career_table(&self) -> Vec<PlayerAggregate> {
        let mut ids: Vec<PlayerId> = self.player_lines.keys().copied().collect();
        ids.sort_unstable();
        ids.par_iter()
            .filter_map(|id| self.player(*id, &Scope::Career).ok())
            .collect()
    }

    /// Mean fantasy points per match over the last `window` matches.
    pub fn expected_fantasy_points(
        &self,
        player: PlayerId,
        scoring: &FantasyScoring,
        window: usize,
        weighting: FormWeighting,
    ) -> Option<f64> {
        let recent: Vec<f64> = self
            .player_lines(player)
            .iter()
            .rev()
            .take(window.max(1))
            .map(|l| scoring.points(l))
            .collect();
        (!recent.is_empty()).then(|| weighted_recent_mean(&recent, weighting))
    }
}

/// `values[0]` is the most recent observation.
fn weighted_recent_mean(values: &[f64], weighting: FormWeighting) -> f64 {
    match weighting {
        FormWeighting::Simple => values.iter().sum::<f64>() / values.len().max(1) as f64,
        FormWeighting::Exponential { decay } => {
            let decay = decay.clamp(1e-6, 1.0);
            let mut weighted = 0.0;
            let mut weight_sum = 0.0;
            for (k, v) in values.iter().enumerate() {
                let w = decay.powi(k as i32);
                weighted += w * v;
                weight_sum += w;
            }
            if weight_sum > 0.0 {
                weighted / weight_sum
            } else {
                0.0
            }
        }
    }
}

fn match_context(m: &Match, team: &str) -> MatchContext {
    MatchContext {
        match_id: m.id,
        date: m.date,
        season: m.season.clone(),
        venue: m.venue.clone(),
        team: team.to_string(),
        opponent: m.opponent_of(team).unwrap_or_default().to_string(),
    }
}

#[derive(Default)]
struct LineBuilder {
    team: String,
    batting: Vec<BattingInnings>,
    bowling: Vec<BowlingInnings>,
    catches: u32,
    stumpings: u32,
    run_outs: u32,
}

fn player_lines_for_match(m: &Match) -> Vec<(PlayerId, PlayerMatchLine)> {
    let mut builders: HashMap<PlayerId, LineBuilder> = HashMap::new();

    for innings in m.regulation_innings() {
        let mut bat: Vec<(PlayerId, BattingInnings)> = Vec::new();
        let mut bowl: Vec<(PlayerId, BowlingInnings)> = Vec::new();
        // (bowler, over) -> (legal balls, runs charged)
        let mut overs: HashMap<(PlayerId, u16), (u32, u32)> = HashMap::new();

        for d in &innings.deliveries {
            for id in [d.batter, d.non_striker] {
                if !bat.iter().any(|(p, _)| *p == id) {
                    bat.push((id, BattingInnings::default()));
                }
            }
            if let Some((_, b)) = bat.iter_mut().find(|(p, _)| *p == d.batter)
                && d.faced_by_batter()
            {
                b.balls += 1;
                b.runs += d.runs_off_bat as u32;
                match d.runs_off_bat {
                    4 => b.fours += 1,
                    6 => b.sixes += 1,
                    0 => b.dots += 1,
                    _ => {}
                }
            }

            let pos = match bowl.iter().position(|(p, _)| *p == d.bowler) {
                Some(pos) => pos,
                None => {
                    bowl.push((d.bowler, BowlingInnings::default()));
                    bowl.len() - 1
                }
            };
            let spell = &mut bowl[pos].1;
            spell.runs_conceded += d.bowler_runs() as u32;
            let over = overs.entry((d.bowler, d.over)).or_insert((0, 0));
            over.1 += d.bowler_runs() as u32;
            if d.is_legal() {
                spell.legal_balls += 1;
                over.0 += 1;
                if d.total_runs() == 0 {
                    spell.dots += 1;
                }
            }
            if d.bowler_wicket() {
                spell.wickets += 1;
            }

            if let Some(w) = d.wicket {
                if w.kind.counts_as_dismissal()
                    && let Some((_, b)) = bat.iter_mut().find(|(p, _)| *p == w.player_out)
                {
                    b.out = true;
                }
                if let Some((id, kind)) = fielding_credit(w.kind, w.fielder, d.bowler) {
                    let entry = builders.entry(id).or_insert_with(|| LineBuilder {
                        team: innings.bowling_team.clone(),
                        ..Default::default()
                    });
                    match kind {
                        FieldingKind::Catch => entry.catches += 1,
                        FieldingKind::Stumping => entry.stumpings += 1,
                        FieldingKind::RunOut => entry.run_outs += 1,
                    }
                }
            }
        }

        for ((bowler, _), (legal, runs)) in overs {
            if legal as u16 == BALLS_PER_OVER
                && runs == 0
                && let Some((_, spell)) = bowl.iter_mut().find(|(p, _)| *p == bowler)
            {
                spell.maidens += 1;
            }
        }

        for (id, inn) in bat {
            let entry = builders.entry(id).or_insert_with(|| LineBuilder {
                team: innings.batting_team.clone(),
                ..Default::default()
            });
            entry.batting.push(inn);
        }
        for (id, spell) in bowl {
            let entry = builders.entry(id).or_insert_with(|| LineBuilder {
                team: innings.bowling_team.clone(),
                ..Default::default()
            });
            entry.bowling.push(spell);
        }
    }

    let mut out: Vec<(PlayerId, PlayerMatchLine)> = builders
        .into_iter()
        .map(|(id, b)| {
            (
                id,
                PlayerMatchLine {
                    ctx: match_context(m, &b.team),
                    batting: b.batting,
                    bowling: b.bowling,
                    catches: b.catches,
                    stumpings: b.stumpings,
                    run_outs: b.run_outs,
                },
            )
        })
        .collect();
    out.sort_by_key(|(id, _)| *id);
    out
}

#[derive(Debug, Clone, Copy)]
enum FieldingKind {
    Catch,
    Stumping,
    RunOut,
}

fn fielding_credit(
    kind: WicketKind,
    fielder: Option<PlayerId>,
    bowler: PlayerId,
) -> Option<(PlayerId, FieldingKind)> {
    match kind {
        WicketKind::Caught => fielder.map(|f| (f, FieldingKind::Catch)),
        WicketKind::CaughtAndBowled => Some((bowler, FieldingKind::Catch)),
        WicketKind::Stumped => fielder.map(|f| (f, FieldingKind::Stumping)),
        WicketKind::RunOut => fielder.map(|f| (f, FieldingKind::RunOut)),
        _ => None,
    }
}

fn team_lines_for_match(m: &Match) -> Vec<TeamMatchLine> {
    let first_innings_total = m.first_innings().map(|i| i.total_runs());
    let first_batting = m.first_innings().map(|i| i.batting_team.as_str());

    m.teams
        .iter()
        .map(|team| {
            let outcome = match &m.result {
                MatchResult::Tie => TeamOutcome::Tied,
                MatchResult::NoResult => TeamOutcome::NoResult,
                MatchResult::Win { winner, .. } | MatchResult::SuperOver { winner } => {
                    if winner == team {
                        TeamOutcome::Won
                    } else {
                        TeamOutcome::Lost
                    }
                }
            };
            let mut line = TeamMatchLine {
                ctx: match_context(m, team),
                outcome,
                batted_first: first_batting.map(|t| t == team.as_str()),
                won_toss: m.toss.as_ref().is_some_and(|t| t.winner == *team),
                runs_scored: 0,
                wickets_lost: 0,
                balls_faced: 0,
                runs_conceded: 0,
                wickets_taken: 0,
                balls_bowled: 0,
                first_innings_total,
            };
            for innings in m.regulation_innings() {
                if innings.batting_team == *team {
                    line.runs_scored += innings.total_runs();
                    line.wickets_lost += innings.wickets() as u32;
                    line.balls_faced += innings.legal_balls();
                } else {
                    line.runs_conceded += innings.total_runs();
                    line.wickets_taken += innings.wickets() as u32;
                    line.balls_bowled += innings.legal_balls();
                }
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_weighting_favors_most_recent() {
        let v = [30.0, 0.0, 0.0];
        let simple = weighted_recent_mean(&v, FormWeighting::Simple);
        let ew = weighted_recent_mean(&v, FormWeighting::Exponential { decay: 0.5 });
        assert!((simple - 10.0).abs() < 1e-9);
        assert!(ew > simple);
    }

    #[test]
    fn not_out_average_is_sentinel() {
        let counts = BattingCounts {
            innings: 3,
            runs: 77,
            balls: 50,
            ..Default::default()
        };
        assert_eq!(counts.average(), Average::NotOut { runs: 77 });
        assert_eq!(counts.not_outs(), 3);
        assert!((counts.strike_rate().unwrap() - 154.0).abs() < 1e-9);
    }

    #[test]
    fn economy_counts_only_legal_balls() {
        let counts = BowlingCounts {
            innings: 1,
            legal_balls: 12,
            runs_conceded: 18,
            ..Default::default()
        };
        assert!((counts.economy().unwrap() - 9.0).abs() < 1e-9);
        assert!(counts.average().is_none());
    }

    #[test]
    fn smoothed_win_rate_is_even_without_history() {
        let t = TeamAggregate {
            team: "X".into(),
            scope: Scope::Career,
            matches: 1,
            wins: 0,
            losses: 0,
            ties: 0,
            no_results: 1,
            runs_scored: 0,
            wickets_lost: 0,
            balls_faced: 0,
            runs_conceded: 0,
            wickets_taken: 0,
            balls_bowled: 0,
        };
        assert!(t.win_rate().is_none());
        assert!((t.smoothed_win_rate() - 0.5).abs() < 1e-12);
    }
}
