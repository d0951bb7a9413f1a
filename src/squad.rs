use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{AggregationEngine, FantasyScoring, FormWeighting};
use crate::error::InfeasibleConstraintError;
use crate::model::{PlayerId, PlayerRole};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EligibilityTag {
    Foreign,
    Team(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadCandidate {
    pub player_id: PlayerId,
    pub role: PlayerRole,
    pub score: f64,
    #[serde(default)]
    pub tags: Vec<EligibilityTag>,
}

impl SquadCandidate {
    pub fn is_foreign(&self) -> bool {
        self.tags.contains(&EligibilityTag::Foreign)
    }

    pub fn team(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            EligibilityTag::Team(name) => Some(name.as_str()),
            EligibilityTag::Foreign => None,
        })
    }

    fn is_keeper(&self) -> bool {
        self.role == PlayerRole::Wicketkeeper
    }

    fn is_bowler(&self) -> bool {
        self.role == PlayerRole::Bowler
    }

    /// Batters, all-rounders and keepers.
    fn bats(&self) -> bool {
        !self.is_bowler()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquadConstraints {
    pub size: usize,
    pub min_keepers: usize,
    pub max_keepers: Option<usize>,
    pub min_bowlers: usize,
    pub max_bowlers: usize,
    pub max_foreign: usize,
    pub min_batting_depth: usize,
    pub max_per_team: Option<usize>,
    pub swap_pass_limit: usize,
    pub node_limit: usize,
}

impl Default for SquadConstraints {
    fn default() -> Self {
        Self {
            size: 11,
            min_keepers: 1,
            max_keepers: None,
            min_bowlers: 3,
            max_bowlers: 6,
            max_foreign: 4,
            min_batting_depth: 5,
            max_per_team: None,
            swap_pass_limit: 50,
            node_limit: 200_000,
        }
    }
}

impl SquadConstraints {
    fn check(&self) -> Result<(), InfeasibleConstraintError> {
        let contradiction = |msg: String| Err(InfeasibleConstraintError::Contradictory(msg));
        if self.size == 0 {
            return contradiction("squad size is zero".to_string());
        }
        if self.min_bowlers > self.max_bowlers {
            return contradiction(format!(
                "bowlers must be between {} and {}",
                self.min_bowlers, self.max_bowlers
            ));
        }
        if let Some(max) = self.max_keepers
            && max < self.min_keepers
        {
            return contradiction(format!(
                "at most {max} keepers but at least {} required",
                self.min_keepers
            ));
        }
        let depth = self.min_batting_depth.max(self.min_keepers);
        if self.min_bowlers + depth > self.size {
            return contradiction(format!(
                "{} bowlers plus {depth} batting options exceed {} places",
                self.min_bowlers, self.size
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionMethod {
    Greedy { swaps: usize },
    Backtracking { nodes: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Squad {
    /// Highest score first; ties by lower id.
    pub players: Vec<SquadCandidate>,
    pub total_score: f64,
    pub keepers: usize,
    pub bowlers: usize,
    pub foreign: usize,
    pub batting_depth: usize,
    pub method: SelectionMethod,
}

impl Squad {
    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.player_id).collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Tally {
    len: usize,
    keepers: usize,
    bowlers: usize,
    batting: usize,
    foreign: usize,
    per_team: HashMap<String, usize>,
}

impl Tally {
    fn of(picked: &[&SquadCandidate]) -> Self {
        let mut t = Self::default();
        for c in picked {
            t.add(c);
        }
        t
    }

    fn add(&mut self, c: &SquadCandidate) {
        self.len += 1;
        self.keepers += usize::from(c.is_keeper());
        self.bowlers += usize::from(c.is_bowler());
        self.batting += usize::from(c.bats());
        self.foreign += usize::from(c.is_foreign());
        if let Some(team) = c.team() {
            *self.per_team.entry(team.to_string()).or_default() += 1;
        }
    }

    fn remove(&mut self, c: &SquadCandidate) {
        self.len -= 1;
        self.keepers -= usize::from(c.is_keeper());
        self.bowlers -= usize::from(c.is_bowler());
        self.batting -= usize::from(c.bats());
        self.foreign -= usize::from(c.is_foreign());
        if let Some(team) = c.team()
            && let Some(n) = self.per_team.get_mut(team)
        {
            *n -= 1;
        }
    }

    /// Caps hold and the remaining places can still cover every minimum.
    fn completable(&self, k: &SquadConstraints) -> bool {
        if self.len > k.size
            || self.bowlers > k.max_bowlers
            || self.foreign > k.max_foreign
            || k.max_keepers.is_some_and(|m| self.keepers > m)
            || k.max_per_team
                .is_some_and(|cap| self.per_team.values().any(|n| *n > cap))
        {
            return false;
        }
        let keepers_needed = k.min_keepers.saturating_sub(self.keepers);
        let bowlers_needed = k.min_bowlers.saturating_sub(self.bowlers);
        let batting_needed = k
            .min_batting_depth
            .saturating_sub(self.batting)
            .max(keepers_needed);
        bowlers_needed + batting_needed <= k.size - self.len
    }

    fn complete(&self, k: &SquadConstraints) -> bool {
        self.len == k.size
            && self.keepers >= k.min_keepers
            && self.bowlers >= k.min_bowlers
            && self.batting >= k.min_batting_depth
            && self.completable(k)
    }
}

/// Selects the best-scoring squad that meets every constraint.
///
/// Greedy fill by score, then same-role swaps that strictly improve the total. If the
/// greedy pass cannot complete a valid squad, a bounded depth-first search takes over.
/// The result is a good squad, not a proven optimum.
#[derive(Debug, Clone, Default)]
pub struct SquadOptimizer {
    constraints: SquadConstraints,
}

impl SquadOptimizer {
    pub fn new(constraints: SquadConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &SquadConstraints {
        &self.constraints
    }

    pub fn select(&self, pool: &[SquadCandidate]) -> Result<Squad, InfeasibleConstraintError> {
        let k = &self.constraints;
        k.check()?;

        let mut seen = HashSet::with_capacity(pool.len());
        if let Some(dup) = pool.iter().find(|c| !seen.insert(c.player_id)) {
            return Err(InfeasibleConstraintError::Contradictory(format!(
                "player {} appears twice in the pool",
                dup.player_id
            )));
        }

        let mut ranked: Vec<&SquadCandidate> = pool.iter().filter(|c| c.score.is_finite()).collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.player_id.cmp(&b.player_id))
        });
        precheck(&ranked, k)?;

        if let Some(mut picked) = greedy(&ranked, k) {
            let swaps = improve_by_swaps(&mut picked, &ranked, k);
            debug!(swaps, "greedy squad selected");
            return Ok(finish(picked, SelectionMethod::Greedy { swaps }));
        }

        warn!("greedy fill failed; falling back to bounded search");
        let (best, nodes) = search(&ranked, k);
        match best {
            Some(picked) => Ok(finish(picked, SelectionMethod::Backtracking { nodes })),
            None => Err(InfeasibleConstraintError::SearchExhausted { nodes }),
        }
    }
}

fn precheck(ranked: &[&SquadCandidate], k: &SquadConstraints) -> Result<(), InfeasibleConstraintError> {
    if ranked.len() < k.size {
        return Err(InfeasibleConstraintError::PoolTooSmall {
            available: ranked.len(),
            required: k.size,
        });
    }
    let keepers = ranked.iter().filter(|c| c.is_keeper()).count();
    if keepers < k.min_keepers {
        return Err(InfeasibleConstraintError::NotEnoughKeepers {
            available: keepers,
            required: k.min_keepers,
        });
    }
    let bowlers = ranked.iter().filter(|c| c.is_bowler()).count();
    if bowlers < k.min_bowlers {
        return Err(InfeasibleConstraintError::NotEnoughBowlers {
            available: bowlers,
            required: k.min_bowlers,
        });
    }
    let batting = ranked.iter().filter(|c| c.bats()).count();
    if batting < k.min_batting_depth {
        return Err(InfeasibleConstraintError::NotEnoughBatters {
            available: batting,
            required: k.min_batting_depth,
        });
    }
    let domestic = ranked.iter().filter(|c| !c.is_foreign()).count();
    if domestic + k.max_foreign < k.size {
        return Err(InfeasibleConstraintError::ForeignCapTooTight {
            available: domestic,
            cap: k.max_foreign,
            required: k.size - k.max_foreign,
        });
    }
    let non_bowlers_allowed = ranked.len() - bowlers + bowlers.min(k.max_bowlers);
    if non_bowlers_allowed < k.size {
        return Err(InfeasibleConstraintError::Contradictory(format!(
            "at most {} bowlers leaves {} selectable players",
            k.max_bowlers, non_bowlers_allowed
        )));
    }
    if let Some(max) = k.max_keepers {
        let selectable = ranked.len() - keepers + keepers.min(max);
        if selectable < k.size {
            return Err(InfeasibleConstraintError::Contradictory(format!(
                "at most {max} keepers leaves {selectable} selectable players"
            )));
        }
    }
    if let Some(cap) = k.max_per_team {
        let mut per_team: HashMap<&str, usize> = HashMap::new();
        let mut untagged = 0usize;
        for c in ranked {
            match c.team() {
                Some(t) => *per_team.entry(t).or_default() += 1,
                None => untagged += 1,
            }
        }
        let selectable = untagged + per_team.values().map(|n| (*n).min(cap)).sum::<usize>();
        if selectable < k.size {
            return Err(InfeasibleConstraintError::Contradictory(format!(
                "per-team cap of {cap} leaves {selectable} selectable players"
            )));
        }
    }
    Ok(())
}

fn greedy<'a>(ranked: &[&'a SquadCandidate], k: &SquadConstraints) -> Option<Vec<&'a SquadCandidate>> {
    let mut picked: Vec<&SquadCandidate> = Vec::with_capacity(k.size);
    let mut chosen: HashSet<PlayerId> = HashSet::new();
    let mut tally = Tally::default();

    let mut take = |c: &'a SquadCandidate,
                    picked: &mut Vec<&'a SquadCandidate>,
                    tally: &mut Tally|
     -> bool {
        if chosen.contains(&c.player_id) {
            return false;
        }
        tally.add(c);
        if tally.completable(k) {
            chosen.insert(c.player_id);
            picked.push(c);
            true
        } else {
            tally.remove(c);
            false
        }
    };

    // Mandatory minimums first, best score within each requirement.
    for c in ranked.iter().filter(|c| c.is_keeper()) {
        if tally.keepers >= k.min_keepers {
            break;
        }
        take(*c, &mut picked, &mut tally);
    }
    for c in ranked.iter().filter(|c| c.is_bowler()) {
        if tally.bowlers >= k.min_bowlers {
            break;
        }
        take(*c, &mut picked, &mut tally);
    }
    for c in ranked.iter().filter(|c| c.bats()) {
        if tally.batting >= k.min_batting_depth {
            break;
        }
        take(*c, &mut picked, &mut tally);
    }
    for c in ranked {
        if tally.len >= k.size {
            break;
        }
        take(*c, &mut picked, &mut tally);
    }

    tally.complete(k).then_some(picked)
}

/// Same-role replacements that strictly raise the total. Returns the number applied.
fn improve_by_swaps<'a>(
    picked: &mut [&'a SquadCandidate],
    ranked: &[&'a SquadCandidate],
    k: &SquadConstraints,
) -> usize {
    let mut swaps = 0;
    for _ in 0..k.swap_pass_limit {
        let mut improved = false;
        'slots: for slot in 0..picked.len() {
            let current = picked[slot];
            for cand in ranked {
                if cand.score <= current.score {
                    // Ranked by score, nothing further down can improve this slot.
                    break;
                }
                if cand.role != current.role || picked.iter().any(|p| p.player_id == cand.player_id) {
                    continue;
                }
                picked[slot] = *cand;
                if Tally::of(picked).complete(k) {
                    swaps += 1;
                    improved = true;
                    break 'slots;
                }
                picked[slot] = current;
            }
        }
        if !improved {
            break;
        }
    }
    swaps
}

struct Search<'a, 'k> {
    ranked: &'a [&'a SquadCandidate],
    k: &'k SquadConstraints,
    /// suffix_top[i]: total score of `ranked[i..]`.
    suffix_top: Vec<f64>,
    nodes: usize,
    best: Option<(f64, Vec<&'a SquadCandidate>)>,
}

impl<'a> Search<'a, '_> {
    /// Optimistic bound: the next `n` scores starting at `i` (already sorted descending).
    fn bound(&self, i: usize, n: usize) -> f64 {
        let end = (i + n).min(self.ranked.len());
        self.suffix_top[i] - self.suffix_top[end]
    }

    fn dfs(&mut self, i: usize, picked: &mut Vec<&'a SquadCandidate>, tally: &mut Tally, score: f64) {
        if self.nodes >= self.k.node_limit {
            return;
        }
        self.nodes += 1;

        if tally.len == self.k.size {
            if tally.complete(self.k) && self.best.as_ref().is_none_or(|(b, _)| score > *b) {
                self.best = Some((score, picked.clone()));
            }
            return;
        }
        let slots = self.k.size - tally.len;
        if self.ranked.len() - i < slots {
            return;
        }
        if let Some((best, _)) = &self.best
            && score + self.bound(i, slots) <= *best
        {
            return;
        }

        let c = self.ranked[i];
        tally.add(c);
        if tally.completable(self.k) {
            picked.push(c);
            self.dfs(i + 1, picked, tally, score + c.score);
            picked.pop();
        }
        tally.remove(c);

        self.dfs(i + 1, picked, tally, score);
    }
}

fn search<'a>(ranked: &'a [&'a SquadCandidate], k: &SquadConstraints) -> (Option<Vec<&'a SquadCandidate>>, usize) {
    let mut suffix_top = vec![0.0; ranked.len() + 1];
    for i in (0..ranked.len()).rev() {
        suffix_top[i] = suffix_top[i + 1] + ranked[i].score;
    }
    let mut s = Search {
        ranked,
        k,
        suffix_top,
        nodes: 0,
        best: None,
    };
    let mut picked = Vec::with_capacity(k.size);
    let mut tally = Tally::default();
    s.dfs(0, &mut picked, &mut tally, 0.0);
    debug!(nodes = s.nodes, found = s.best.is_some(), "squad search finished");
    (s.best.map(|(_, p)| p), s.nodes)
}

fn finish(picked: Vec<&SquadCandidate>, method: SelectionMethod) -> Squad {
    let tally = Tally::of(&picked);
    let mut players: Vec<SquadCandidate> = picked.into_iter().cloned().collect();
    players.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.player_id.cmp(&b.player_id))
    });
    Squad {
        total_score: players.iter().map(|p| p.score).sum(),
        players,
        keepers: tally.keepers,
        bowlers: tally.bowlers,
        foreign: tally.foreign,
        batting_depth: tally.batting,
        method,
    }
}

/// Candidates scored by recent fantasy output. Players without a profile are skipped;
/// players without matches score zero.
pub fn score_pool(
    aggregates: &AggregationEngine,
    pool: &[(PlayerId, Vec<EligibilityTag>)],
    scoring: &FantasyScoring,
    window: usize,
    weighting: FormWeighting,
) -> Vec<SquadCandidate> {
    pool.iter()
        .filter_map(|(id, tags)| {
            let Some(profile) = aggregates.store().player(*id) else {
                warn!(player = id, "no profile for squad candidate; skipped");
                return None;
            };
            let score = aggregates
                .expected_fantasy_points(*id, scoring, window, weighting)
                .unwrap_or(0.0);
            Some(SquadCandidate {
                player_id: *id,
                role: profile.role,
                score,
                tags: tags.clone(),
            })
        })
        .collect()
}
