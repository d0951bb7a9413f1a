use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::model::{
    BALLS_PER_OVER, Delivery, Innings, Match, MatchResult, PlayerId, PlayerProfile,
};

/// Content fingerprint of a store. Two stores built from the same records share a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataVersion(String);

impl DataVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated ball-by-ball records. Read-only once built.
#[derive(Debug, Clone)]
pub struct DeliveryStore {
    matches: Vec<Match>,
    players: HashMap<PlayerId, PlayerProfile>,
    version: DataVersion,
}

impl DeliveryStore {
    pub fn build(
        mut matches: Vec<Match>,
        players: Vec<PlayerProfile>,
    ) -> Result<Self, IngestError> {
        let mut seen = HashSet::with_capacity(matches.len());
        for m in &matches {
            if !seen.insert(m.id) {
                return Err(IngestError::DuplicateMatch(m.id));
            }
            validate_match(m)?;
        }

        let mut by_player = HashMap::with_capacity(players.len());
        for p in players {
            if p.name.trim().is_empty() {
                return Err(IngestError::InvalidPlayer(p.id, "empty name".to_string()));
            }
            by_player.insert(p.id, p);
        }

        // Chronological order is what the form metric and Elo replay rely on.
        matches.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        let version = fingerprint(&matches, &by_player);

        Ok(Self {
            matches,
            players: by_player,
            version,
        })
    }

    pub fn empty() -> Self {
        Self {
            matches: Vec::new(),
            players: HashMap::new(),
            version: fingerprint(&[], &HashMap::new()),
        }
    }

    pub fn version(&self) -> &DataVersion {
        &self.version
    }

    /// All matches, oldest first.
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerProfile> {
        self.players.get(&id)
    }

    /// Profiles sorted by id.
    pub fn players(&self) -> Vec<&PlayerProfile> {
        let mut out: Vec<&PlayerProfile> = self.players.values().collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.matches.iter().any(|m| m.involves(team))
    }

    pub fn has_venue(&self, venue: &str) -> bool {
        self.matches.iter().any(|m| m.venue == venue)
    }

    pub fn delivery_count(&self) -> usize {
        self.matches
            .iter()
            .flat_map(|m| m.innings.iter())
            .map(|i| i.deliveries.len())
            .sum()
    }
}

fn fingerprint(matches: &[Match], players: &HashMap<PlayerId, PlayerProfile>) -> DataVersion {
    let mut hasher = Sha256::new();
    for m in matches {
        // Match is plain data; serialization cannot fail.
        if let Ok(bytes) = serde_json::to_vec(m) {
            hasher.update(&bytes);
        }
    }
    let mut ids: Vec<&PlayerId> = players.keys().collect();
    ids.sort_unstable();
    for id in ids {
        if let Ok(bytes) = serde_json::to_vec(&players[id]) {
            hasher.update(&bytes);
        }
    }
    let digest = format!("{:x}", hasher.finalize());
    DataVersion(digest[..16].to_string())
}

fn validate_match(m: &Match) -> Result<(), IngestError> {
    let invalid = |reason: String| IngestError::InvalidMatch {
        match_id: m.id,
        reason,
    };

    if m.teams[0].trim().is_empty() || m.teams[1].trim().is_empty() {
        return Err(invalid("team name is empty".to_string()));
    }
    if m.teams[0] == m.teams[1] {
        return Err(invalid(format!("team {} plays itself", m.teams[0])));
    }
    if m.venue.trim().is_empty() {
        return Err(invalid("venue is empty".to_string()));
    }
    if m.overs_per_side == 0 {
        return Err(invalid("overs per side must be positive".to_string()));
    }
    if let Some(toss) = &m.toss
        && !m.involves(&toss.winner)
    {
        return Err(invalid(format!("toss winner {} is not playing", toss.winner)));
    }
    match &m.result {
        MatchResult::Win { winner, .. } | MatchResult::SuperOver { winner } => {
            if !m.involves(winner) {
                return Err(invalid(format!("winner {winner} is not playing")));
            }
        }
        MatchResult::Tie | MatchResult::NoResult => {}
    }
    if let Some(stop) = &m.interruption
        && stop.overs_lost > m.overs_per_side
    {
        return Err(invalid(format!(
            "interruption removes {} overs from a {}-over match",
            stop.overs_lost, m.overs_per_side
        )));
    }

    let regulation = m.innings.iter().filter(|i| !i.super_over).count();
    if regulation > 4 {
        return Err(invalid(format!("{regulation} regulation innings")));
    }

    for innings in &m.innings {
        validate_innings(m, innings)?;
    }
    Ok(())
}

fn validate_innings(m: &Match, innings: &Innings) -> Result<(), IngestError> {
    let invalid = |reason: String| IngestError::InvalidMatch {
        match_id: m.id,
        reason,
    };
    if innings.match_id != m.id {
        return Err(invalid(format!(
            "innings {} belongs to match {}",
            innings.number, innings.match_id
        )));
    }
    if innings.number == 0 || innings.number > 4 {
        return Err(invalid(format!("innings number {}", innings.number)));
    }
    if !m.involves(&innings.batting_team) || !m.involves(&innings.bowling_team) {
        return Err(invalid(format!(
            "innings {} teams are not the match teams",
            innings.number
        )));
    }
    if innings.batting_team == innings.bowling_team {
        return Err(invalid(format!(
            "innings {} has the same batting and bowling team",
            innings.number
        )));
    }

    let max_overs = if innings.super_over {
        1
    } else {
        innings.allotted_overs.unwrap_or(m.overs_per_side)
    };

    let mut last: Option<(u16, u8)> = None;
    for (index, d) in innings.deliveries.iter().enumerate() {
        validate_delivery(m, innings, index, d, max_overs)?;
        let pos = (d.over, d.ball);
        if let Some(prev) = last
            && pos <= prev
        {
            return Err(IngestError::InvalidDelivery {
                match_id: m.id,
                innings: innings.number,
                index,
                reason: format!("out of order after {}.{}", prev.0, prev.1),
            });
        }
        last = Some(pos);
    }
    Ok(())
}

fn validate_delivery(
    m: &Match,
    innings: &Innings,
    index: usize,
    d: &Delivery,
    max_overs: u16,
) -> Result<(), IngestError> {
    let fail = |reason: String| IngestError::InvalidDelivery {
        match_id: m.id,
        innings: innings.number,
        index,
        reason,
    };

    if d.match_id != m.id || d.innings != innings.number {
        return Err(fail(format!(
            "recorded as match {} innings {}",
            d.match_id, d.innings
        )));
    }
    if d.ball == 0 {
        return Err(fail("ball numbers start at 1".to_string()));
    }
    if d.over >= max_overs {
        return Err(fail(format!(
            "over {} beyond the {max_overs} allotted",
            d.over + 1
        )));
    }
    // Allow for a generous run of re-bowled balls, nothing absurd.
    if u16::from(d.ball) > BALLS_PER_OVER * 4 {
        return Err(fail(format!("ball {} in a single over", d.ball)));
    }
    if d.batter == d.non_striker {
        return Err(fail("batter and non-striker are the same player".to_string()));
    }
    if d.bowler == d.batter || d.bowler == d.non_striker {
        return Err(fail("bowler is also batting".to_string()));
    }
    if let Some(extras) = d.extras
        && extras.runs == 0
    {
        return Err(fail("extras recorded with zero runs".to_string()));
    }
    if let Some(w) = d.wicket {
        let striker_out = w.player_out == d.batter;
        let non_striker_out = w.player_out == d.non_striker;
        if !(striker_out || (non_striker_out && w.kind.may_dismiss_non_striker())) {
            return Err(fail(format!(
                "{:?} dismisses player {} who is not at the crease",
                w.kind, w.player_out
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::model::{InningsStatus, Wicket, WicketKind};

    fn ball(over: u16, ball: u8, runs: u16) -> Delivery {
        Delivery {
            match_id: 7,
            innings: 1,
            over,
            ball,
            batter: 1,
            bowler: 9,
            non_striker: 2,
            runs_off_bat: runs,
            extras: None,
            wicket: None,
        }
    }

    fn one_innings_match(deliveries: Vec<Delivery>) -> Match {
        Match {
            id: 7,
            season: "2024".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            venue: "Eden Gardens".to_string(),
            teams: ["KKR".to_string(), "MI".to_string()],
            toss: None,
            innings: vec![Innings {
                match_id: 7,
                number: 1,
                batting_team: "KKR".to_string(),
                bowling_team: "MI".to_string(),
                deliveries,
                status: InningsStatus::Completed,
                target: None,
                allotted_overs: None,
                super_over: false,
            }],
            result: MatchResult::NoResult,
            interruption: None,
            overs_per_side: 20,
        }
    }

    #[test]
    fn version_is_stable_for_identical_content() {
        let a = DeliveryStore::build(vec![one_innings_match(vec![ball(0, 1, 4)])], Vec::new())
            .unwrap();
        let b = DeliveryStore::build(vec![one_innings_match(vec![ball(0, 1, 4)])], Vec::new())
            .unwrap();
        let c = DeliveryStore::build(vec![one_innings_match(vec![ball(0, 1, 6)])], Vec::new())
            .unwrap();
        assert_eq!(a.version(), b.version());
        assert_ne!(a.version(), c.version());
    }

    #[test]
    fn rejects_out_of_order_deliveries() {
        let m = one_innings_match(vec![ball(0, 2, 1), ball(0, 1, 1)]);
        let err = DeliveryStore::build(vec![m], Vec::new()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidDelivery { index: 1, .. }));
    }

    #[test]
    fn rejects_over_beyond_allotment() {
        let m = one_innings_match(vec![ball(20, 1, 1)]);
        assert!(DeliveryStore::build(vec![m], Vec::new()).is_err());
    }

    #[test]
    fn rejects_wicket_of_player_not_at_crease() {
        let mut d = ball(0, 1, 0);
        d.wicket = Some(Wicket {
            kind: WicketKind::Bowled,
            player_out: 5,
            fielder: None,
        });
        let err = DeliveryStore::build(vec![one_innings_match(vec![d])], Vec::new()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidDelivery { .. }));
    }

    #[test]
    fn non_striker_can_be_run_out() {
        let mut d = ball(0, 1, 0);
        d.wicket = Some(Wicket {
            kind: WicketKind::RunOut,
            player_out: 2,
            fielder: Some(11),
        });
        assert!(DeliveryStore::build(vec![one_innings_match(vec![d])], Vec::new()).is_ok());
    }

    #[test]
    fn rejects_innings_numbers_past_the_super_over() {
        let mut m = one_innings_match(vec![ball(0, 1, 1)]);
        m.innings[0].number = 5;
        for d in &mut m.innings[0].deliveries {
            d.innings = 5;
        }
        let err = DeliveryStore::build(vec![m.clone()], Vec::new()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidMatch { match_id: 7, .. }));

        m.innings[0].number = 4;
        for d in &mut m.innings[0].deliveries {
            d.innings = 4;
        }
        assert!(DeliveryStore::build(vec![m], Vec::new()).is_ok());
    }

    #[test]
    fn rejects_duplicate_match_ids() {
        let m = one_innings_match(vec![ball(0, 1, 1)]);
        let err = DeliveryStore::build(vec![m.clone(), m], Vec::new()).unwrap_err();
        assert_eq!(err, IngestError::DuplicateMatch(7));
    }
}
