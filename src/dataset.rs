use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, Transaction, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::MatchDocument;
use crate::model::{
    Delivery, ExtraKind, Extras, Innings, InningsStatus, Interruption, Match, MatchResult,
    PlayerProfile, Toss, Wicket, WicketKind,
};
use crate::store::DeliveryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    pub players_upserted: usize,
    pub matches_upserted: usize,
    pub deliveries_written: usize,
}

/// Match-level fields that are stored as one JSON blob.
#[derive(Debug, Serialize, Deserialize)]
struct MatchHeader {
    toss: Option<Toss>,
    result: MatchResult,
    interruption: Option<Interruption>,
    overs_per_side: u16,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS players (
            player_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            profile_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            season TEXT NOT NULL,
            match_date TEXT NOT NULL,
            venue TEXT NOT NULL,
            team_a TEXT NOT NULL,
            team_b TEXT NOT NULL,
            header_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season);
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date);

        CREATE TABLE IF NOT EXISTS innings (
            match_id INTEGER NOT NULL,
            number INTEGER NOT NULL,
            batting_team TEXT NOT NULL,
            bowling_team TEXT NOT NULL,
            status TEXT NOT NULL,
            target INTEGER NULL,
            allotted_overs INTEGER NULL,
            super_over INTEGER NOT NULL,
            PRIMARY KEY (match_id, number)
        );
        CREATE TABLE IF NOT EXISTS deliveries (
            match_id INTEGER NOT NULL,
            innings INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            over_no INTEGER NOT NULL,
            ball INTEGER NOT NULL,
            batter INTEGER NOT NULL,
            bowler INTEGER NOT NULL,
            non_striker INTEGER NOT NULL,
            runs_off_bat INTEGER NOT NULL,
            extra_kind TEXT NULL,
            extra_runs INTEGER NULL,
            wicket_kind TEXT NULL,
            player_out INTEGER NULL,
            fielder INTEGER NULL,
            PRIMARY KEY (match_id, innings, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_deliveries_batter ON deliveries(batter);
        CREATE INDEX IF NOT EXISTS idx_deliveries_bowler ON deliveries(bowler);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            source TEXT NOT NULL,
            matches_upserted INTEGER NOT NULL,
            deliveries_written INTEGER NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Upserts every player and match of `doc` in one transaction. A match already in the
/// database has its innings and deliveries replaced.
pub fn save_document(conn: &mut Connection, doc: &MatchDocument, source: &str) -> Result<SaveSummary> {
    let started_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, source, matches_upserted, deliveries_written)
         VALUES (?1, NULL, ?2, 0, 0)",
        params![started_at, source],
    )
    .context("insert ingest run")?;
    let run_id = conn.last_insert_rowid();

    let tx = conn.transaction().context("begin ingest transaction")?;
    let mut summary = SaveSummary {
        players_upserted: 0,
        matches_upserted: 0,
        deliveries_written: 0,
    };
    for p in &doc.players {
        upsert_player(&tx, p)?;
        summary.players_upserted += 1;
    }
    for m in &doc.matches {
        summary.deliveries_written += upsert_match(&tx, m)?;
        summary.matches_upserted += 1;
    }
    tx.commit().context("commit ingest transaction")?;

    conn.execute(
        "UPDATE ingest_runs
         SET finished_at = ?1, matches_upserted = ?2, deliveries_written = ?3
         WHERE run_id = ?4",
        params![
            Utc::now().to_rfc3339(),
            summary.matches_upserted as i64,
            summary.deliveries_written as i64,
            run_id
        ],
    )
    .context("update ingest run")?;
    Ok(summary)
}

fn upsert_player(tx: &Transaction<'_>, p: &PlayerProfile) -> Result<()> {
    let profile_json = serde_json::to_string(p).context("serialize player profile")?;
    tx.execute(
        "INSERT INTO players(player_id, name, role, profile_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(player_id) DO UPDATE SET
            name = excluded.name,
            role = excluded.role,
            profile_json = excluded.profile_json,
            updated_at = excluded.updated_at",
        params![
            p.id as i64,
            p.name,
            p.role.label(),
            profile_json,
            Utc::now().to_rfc3339()
        ],
    )
    .with_context(|| format!("upsert player {}", p.id))?;
    Ok(())
}

fn upsert_match(tx: &Transaction<'_>, m: &Match) -> Result<usize> {
    let header = MatchHeader {
        toss: m.toss.clone(),
        result: m.result.clone(),
        interruption: m.interruption.clone(),
        overs_per_side: m.overs_per_side,
    };
    let header_json = serde_json::to_string(&header).context("serialize match header")?;
    let id = m.id as i64;
    tx.execute(
        "INSERT INTO matches(match_id, season, match_date, venue, team_a, team_b, header_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(match_id) DO UPDATE SET
            season = excluded.season,
            match_date = excluded.match_date,
            venue = excluded.venue,
            team_a = excluded.team_a,
            team_b = excluded.team_b,
            header_json = excluded.header_json,
            updated_at = excluded.updated_at",
        params![
            id,
            m.season,
            m.date.format("%Y-%m-%d").to_string(),
            m.venue,
            m.teams[0],
            m.teams[1],
            header_json,
            Utc::now().to_rfc3339()
        ],
    )
    .with_context(|| format!("upsert match {}", m.id))?;

    tx.execute("DELETE FROM deliveries WHERE match_id = ?1", params![id])
        .context("clear deliveries")?;
    tx.execute("DELETE FROM innings WHERE match_id = ?1", params![id])
        .context("clear innings")?;

    let mut written = 0usize;
    for inn in &m.innings {
        tx.execute(
            "INSERT INTO innings(match_id, number, batting_team, bowling_team, status, target, allotted_overs, super_over)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                inn.number as i64,
                inn.batting_team,
                inn.bowling_team,
                enum_text(&inn.status)?,
                inn.target.map(i64::from),
                inn.allotted_overs.map(i64::from),
                inn.super_over as i64
            ],
        )
        .with_context(|| format!("insert innings {} of match {}", inn.number, m.id))?;

        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO deliveries(match_id, innings, seq, over_no, ball, batter, bowler, non_striker,
                    runs_off_bat, extra_kind, extra_runs, wicket_kind, player_out, fielder)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .context("prepare delivery insert")?;
        for (seq, d) in inn.deliveries.iter().enumerate() {
            stmt.execute(params![
                id,
                inn.number as i64,
                seq as i64,
                d.over as i64,
                d.ball as i64,
                d.batter as i64,
                d.bowler as i64,
                d.non_striker as i64,
                d.runs_off_bat as i64,
                d.extras.map(|e| enum_text(&e.kind)).transpose()?,
                d.extras.map(|e| e.runs as i64),
                d.wicket.map(|w| enum_text(&w.kind)).transpose()?,
                d.wicket.map(|w| w.player_out as i64),
                d.wicket.and_then(|w| w.fielder).map(|f| f as i64),
            ])
            .with_context(|| format!("insert delivery {seq} of match {}", m.id))?;
            written += 1;
        }
    }
    Ok(written)
}

pub fn load_document(conn: &Connection) -> Result<MatchDocument> {
    let mut players = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT profile_json FROM players ORDER BY player_id ASC")
            .context("prepare load players query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query load players")?;
        for row in rows {
            let raw = row.context("decode player row")?;
            players.push(serde_json::from_str(&raw).context("parse player profile")?);
        }
    }

    let mut matches = Vec::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT match_id, season, match_date, venue, team_a, team_b, header_json
                 FROM matches ORDER BY match_date ASC, match_id ASC",
            )
            .context("prepare load matches query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("query load matches")?;
        for row in rows {
            let (id, season, date, venue, team_a, team_b, header_json) =
                row.context("decode match row")?;
            let header: MatchHeader =
                serde_json::from_str(&header_json).context("parse match header")?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("match {id} date {date}"))?;
            matches.push(Match {
                id: id as u64,
                season,
                date,
                venue,
                teams: [team_a, team_b],
                toss: header.toss,
                innings: load_innings(conn, id)?,
                result: header.result,
                interruption: header.interruption,
                overs_per_side: header.overs_per_side,
            });
        }
    }

    Ok(MatchDocument { players, matches })
}

fn load_innings(conn: &Connection, match_id: i64) -> Result<Vec<Innings>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT number, batting_team, bowling_team, status, target, allotted_overs, super_over
             FROM innings WHERE match_id = ?1 ORDER BY number ASC",
        )
        .context("prepare load innings query")?;
    let rows = stmt
        .query_map(params![match_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, i64>(6)? != 0,
            ))
        })
        .context("query load innings")?;

    let mut out = Vec::new();
    for row in rows {
        let (number, batting_team, bowling_team, status, target, allotted, super_over) =
            row.context("decode innings row")?;
        let status: InningsStatus = enum_from_text(&status)?;
        out.push(Innings {
            match_id: match_id as u64,
            number: number as u8,
            batting_team,
            bowling_team,
            deliveries: load_deliveries(conn, match_id, number)?,
            status,
            target: target.map(|t| t as u32),
            allotted_overs: allotted.map(|o| o as u16),
            super_over,
        });
    }
    Ok(out)
}

fn load_deliveries(conn: &Connection, match_id: i64, innings: i64) -> Result<Vec<Delivery>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT over_no, ball, batter, bowler, non_striker, runs_off_bat,
                    extra_kind, extra_runs, wicket_kind, player_out, fielder
             FROM deliveries WHERE match_id = ?1 AND innings = ?2 ORDER BY seq ASC",
        )
        .context("prepare load deliveries query")?;
    let rows = stmt
        .query_map(params![match_id, innings], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, Option<i64>>(10)?,
            ))
        })
        .context("query load deliveries")?;

    let mut out = Vec::new();
    for row in rows {
        let (over, ball, batter, bowler, non_striker, runs, extra_kind, extra_runs, wicket_kind, player_out, fielder) =
            row.context("decode delivery row")?;
        let extras = match (extra_kind, extra_runs) {
            (Some(kind), Some(runs)) => Some(Extras {
                kind: enum_from_text::<ExtraKind>(&kind)?,
                runs: runs as u16,
            }),
            _ => None,
        };
        let wicket = match (wicket_kind, player_out) {
            (Some(kind), Some(out)) => Some(Wicket {
                kind: enum_from_text::<WicketKind>(&kind)?,
                player_out: out as u32,
                fielder: fielder.map(|f| f as u32),
            }),
            _ => None,
        };
        out.push(Delivery {
            match_id: match_id as u64,
            innings: innings as u8,
            over: over as u16,
            ball: ball as u8,
            batter: batter as u32,
            bowler: bowler as u32,
            non_striker: non_striker as u32,
            runs_off_bat: runs as u16,
            extras,
            wicket,
        });
    }
    Ok(out)
}

/// Everything in the database, validated into a store.
pub fn load_store(conn: &Connection) -> Result<DeliveryStore> {
    let doc = load_document(conn)?;
    doc.into_store().context("validate stored matches")
}

fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value).context("serialize enum")? {
        Value::String(s) => Ok(s),
        other => Err(anyhow!("expected a unit variant, got {other}")),
    }
}

fn enum_from_text<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(Value::String(raw.to_string()))
        .with_context(|| format!("unknown value {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_text_uses_serde_names() {
        assert_eq!(enum_text(&ExtraKind::LegBye).unwrap(), "leg_bye");
        assert_eq!(
            enum_from_text::<WicketKind>("caught_and_bowled").unwrap(),
            WicketKind::CaughtAndBowled
        );
        assert!(enum_from_text::<WicketKind>("bogus").is_err());
    }
}
