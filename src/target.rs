use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::InterruptionDataError;
use crate::model::{BALLS_PER_OVER, format_overs, overs_to_balls};

pub const MAX_WICKETS: u8 = 10;

/// Relative scoring-potential factor per wickets lost, used by the generated tables.
const WICKET_FACTORS: [f64; 10] = [1.0, 0.93, 0.85, 0.74, 0.62, 0.49, 0.36, 0.24, 0.13, 0.05];

/// Per-row JSON form. `resources[w]` is the percentage with `w` wickets lost; `null`
/// or a short row leaves the cell missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRow {
    pub overs_left: u16,
    #[serde(default)]
    pub balls: u8,
    pub resources: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTableFile {
    pub version: String,
    pub max_overs: u16,
    /// Typical first-innings total; when present, a chasing side with more resources
    /// than the side batting first gets the surplus at this rate.
    #[serde(default)]
    pub average_score: Option<f64>,
    pub rows: Vec<ResourceRow>,
}

/// Overs-remaining x wickets-lost resource percentages for one table version.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTable {
    version: String,
    max_overs: u16,
    average_score: Option<f64>,
    cells: BTreeMap<u16, [Option<f64>; MAX_WICKETS as usize]>,
}

impl ResourceTable {
    pub fn from_file(file: ResourceTableFile) -> Result<Self, InterruptionDataError> {
        let invalid = |msg: String| {
            InterruptionDataError::InvalidInterruption(format!("table {}: {msg}", file.version))
        };
        if file.version.trim().is_empty() {
            return Err(InterruptionDataError::InvalidInterruption(
                "resource table has no version".to_string(),
            ));
        }
        if file.max_overs == 0 {
            return Err(invalid("max_overs must be positive".to_string()));
        }
        let max_balls = overs_to_balls(file.max_overs)
            .ok_or_else(|| invalid(format!("max_overs {} is too large", file.max_overs)))?;

        let mut cells = BTreeMap::new();
        for row in &file.rows {
            if u16::from(row.balls) >= BALLS_PER_OVER {
                return Err(invalid(format!("row {}.{} has too many balls", row.overs_left, row.balls)));
            }
            if row.resources.len() > MAX_WICKETS as usize {
                return Err(invalid(format!(
                    "row {} lists {} wicket columns",
                    row.overs_left,
                    row.resources.len()
                )));
            }
            let balls_left = overs_to_balls(row.overs_left)
                .and_then(|b| b.checked_add(u16::from(row.balls)))
                .filter(|b| *b <= max_balls)
                .ok_or_else(|| invalid(format!("row {} exceeds max_overs", row.overs_left)))?;
            let mut slot = [None; MAX_WICKETS as usize];
            for (w, value) in row.resources.iter().enumerate() {
                if let Some(v) = value {
                    if !(0.0..=100.0).contains(v) {
                        return Err(invalid(format!("resource {v} outside 0..=100")));
                    }
                    slot[w] = Some(*v);
                }
            }
            cells.insert(balls_left, slot);
        }

        Ok(Self {
            version: file.version,
            max_overs: file.max_overs,
            average_score: file.average_score,
            cells,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ResourceTableFile =
            serde_json::from_str(raw).context("parse resource table json")?;
        Ok(Self::from_file(file)?)
    }

    /// Builds a ball-by-ball table from the two-parameter exponential resource model
    /// `Z(u, w) = Z0 * F(w) * (1 - exp(-b * u / F(w)))`, scaled so that the full
    /// allotment with no wickets lost is 100.
    pub fn from_exponential_model(version: &str, max_overs: u16, decay_per_over: f64) -> Self {
        let max_overs = max_overs.clamp(1, u16::MAX / BALLS_PER_OVER);
        let b = decay_per_over.max(1e-6);
        let z = |overs: f64, w: usize| {
            let f = WICKET_FACTORS[w];
            f * (1.0 - (-b * overs / f).exp())
        };
        let full = z(max_overs as f64, 0).max(1e-12);

        let mut cells = BTreeMap::new();
        for balls_left in 0..=max_overs * BALLS_PER_OVER {
            let overs = balls_left as f64 / BALLS_PER_OVER as f64;
            let mut slot = [None; MAX_WICKETS as usize];
            for (w, cell) in slot.iter_mut().enumerate() {
                // One decimal place, like published tables.
                *cell = Some((1000.0 * z(overs, w) / full).round() / 10.0);
            }
            cells.insert(balls_left, slot);
        }

        Self {
            version: version.to_string(),
            max_overs,
            average_score: None,
            cells,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn max_overs(&self) -> u16 {
        self.max_overs
    }

    pub fn average_score(&self) -> Option<f64> {
        self.average_score
    }

    /// Resource percentage with `balls_left` to come and `wickets` down. No balls left or
    /// all out is exhausted by definition; any other absent cell is an error.
    pub fn resource(&self, balls_left: u16, wickets: u8) -> Result<f64, InterruptionDataError> {
        if balls_left == 0 || wickets >= MAX_WICKETS {
            return Ok(0.0);
        }
        self.cells
            .get(&balls_left)
            .and_then(|row| row[wickets as usize])
            .ok_or_else(|| InterruptionDataError::ResourceUnavailable {
                version: self.version.clone(),
                overs_left: format_overs(balls_left),
                wickets,
            })
    }
}

/// Loaded resource tables keyed by version string.
#[derive(Debug, Clone, Default)]
pub struct ResourceTableRegistry {
    tables: HashMap<String, Arc<ResourceTable>>,
}

impl ResourceTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: ResourceTable) {
        self.tables
            .insert(table.version().to_string(), Arc::new(table));
    }

    pub fn get(&self, version: &str) -> Result<&ResourceTable, InterruptionDataError> {
        self.tables
            .get(version)
            .map(|t| t.as_ref())
            .ok_or_else(|| InterruptionDataError::UnknownTableVersion(version.to_string()))
    }

    pub fn versions(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.tables.keys().map(|k| k.as_str()).collect();
        out.sort_unstable();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read resource table {}", path.display()))?;
        let table = ResourceTable::from_json_str(&raw)
            .with_context(|| format!("load resource table {}", path.display()))?;
        if self.tables.contains_key(table.version()) {
            bail!(
                "resource table version {} loaded twice ({})",
                table.version(),
                path.display()
            );
        }
        debug!(version = table.version(), path = %path.display(), "loaded resource table");
        self.insert(table);
        Ok(())
    }

    /// Loads every `*.json` file in `dir`, in file-name order.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("read table dir {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in &paths {
            registry.load_file(path)?;
        }
        info!(tables = registry.tables.len(), dir = %dir.display(), "resource tables loaded");
        Ok(registry)
    }
}

/// A suspension in the second innings. `balls_bowled == 0` means before the innings began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stoppage {
    pub balls_bowled: u16,
    #[serde(default)]
    pub wickets: u8,
    pub overs_lost: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub first_innings_score: u32,
    /// Percentage used by the side batting first. Defaults to the table's value for a
    /// full, uninterrupted innings.
    #[serde(default)]
    pub team1_resources: Option<f64>,
    pub original_overs: u16,
    #[serde(default)]
    pub stoppages: Vec<Stoppage>,
    pub table_version: String,
    /// Wickets-lost column for the par curve. Defaults to the wickets at the last
    /// mid-innings stoppage.
    #[serde(default)]
    pub par_wickets: Option<u8>,
}

impl TargetRequest {
    /// Chase shortened to `new_overs` before a ball is bowled.
    pub fn before_start(score: u32, original_overs: u16, new_overs: u16, table_version: &str) -> Self {
        Self {
            first_innings_score: score,
            team1_resources: None,
            original_overs,
            stoppages: vec![Stoppage {
                balls_bowled: 0,
                wickets: 0,
                overs_lost: original_overs.saturating_sub(new_overs),
            }],
            table_version: table_version.to_string(),
            par_wickets: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParPoint {
    pub over: u16,
    pub par: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisedTarget {
    pub target: u32,
    pub team1_resources: f64,
    pub team2_resources: f64,
    pub allotted_balls: u16,
    pub table_version: String,
    /// Par at each completed over. Empty when the chase was only shortened before it began.
    pub par_curve: Vec<ParPoint>,
}

impl RevisedTarget {
    pub fn allotted_overs(&self) -> String {
        format_overs(self.allotted_balls)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Adjustment {
    Revised(RevisedTarget),
    /// The chase was cut below the minimum allotment for a result.
    NoResult { allotted_balls: u16, minimum_balls: u16 },
}

/// Resources after applying every stoppage in order.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    r1: f64,
    r2: f64,
    allotted_balls: u16,
}

/// Revised targets for shortened chases from versioned resource tables.
#[derive(Debug, Clone)]
pub struct TargetAdjuster {
    tables: Arc<ResourceTableRegistry>,
    min_overs: u16,
}

impl TargetAdjuster {
    pub fn new(tables: Arc<ResourceTableRegistry>, min_overs: u16) -> Self {
        Self { tables, min_overs }
    }

    pub fn tables(&self) -> &ResourceTableRegistry {
        &self.tables
    }

    pub fn adjust(&self, req: &TargetRequest) -> Result<Adjustment, InterruptionDataError> {
        let table = self.tables.get(&req.table_version)?;
        let resolved = resolve(table, req)?;

        let minimum_balls = self.min_overs.saturating_mul(BALLS_PER_OVER);
        if resolved.allotted_balls < minimum_balls {
            debug!(
                allotted = resolved.allotted_balls,
                minimum = minimum_balls,
                "chase below minimum overs"
            );
            return Ok(Adjustment::NoResult {
                allotted_balls: resolved.allotted_balls,
                minimum_balls,
            });
        }

        let par = par_total(table, req.first_innings_score, resolved.r1, resolved.r2);
        let target = par + 1;

        let curve_wickets = req.par_wickets.or_else(|| {
            req.stoppages
                .iter()
                .rev()
                .find(|s| s.balls_bowled > 0)
                .map(|s| s.wickets)
        });
        let par_curve = match curve_wickets {
            Some(w) => {
                let overs = resolved.allotted_balls / BALLS_PER_OVER;
                let mut curve = Vec::with_capacity(overs as usize);
                for over in 1..=overs {
                    let par = par_at(
                        table,
                        req.first_innings_score,
                        resolved,
                        over * BALLS_PER_OVER,
                        w,
                    )?;
                    curve.push(ParPoint { over, par });
                }
                curve
            }
            None => Vec::new(),
        };

        Ok(Adjustment::Revised(RevisedTarget {
            target,
            team1_resources: resolved.r1,
            team2_resources: resolved.r2,
            allotted_balls: resolved.allotted_balls,
            table_version: table.version().to_string(),
            par_curve,
        }))
    }

    /// Par score after `balls_used` legal balls with `wickets` down, for the chase as
    /// revised by `req`.
    pub fn par_score(
        &self,
        req: &TargetRequest,
        balls_used: u16,
        wickets: u8,
    ) -> Result<u32, InterruptionDataError> {
        let table = self.tables.get(&req.table_version)?;
        let resolved = resolve(table, req)?;
        if balls_used > resolved.allotted_balls {
            return Err(InterruptionDataError::InvalidInterruption(format!(
                "{} balls used of {} allotted",
                balls_used, resolved.allotted_balls
            )));
        }
        par_at(table, req.first_innings_score, resolved, balls_used, wickets)
    }
}

fn resolve(table: &ResourceTable, req: &TargetRequest) -> Result<Resolved, InterruptionDataError> {
    if req.original_overs == 0 || req.original_overs > table.max_overs() {
        return Err(InterruptionDataError::InvalidInterruption(format!(
            "{} overs is outside table {} ({} overs)",
            req.original_overs,
            table.version(),
            table.max_overs()
        )));
    }
    let full = req.original_overs * BALLS_PER_OVER;
    let r1 = match req.team1_resources {
        Some(r) if r > 0.0 && r <= 100.0 => r,
        Some(r) => {
            return Err(InterruptionDataError::InvalidInterruption(format!(
                "team 1 resources {r} outside (0, 100]"
            )));
        }
        None => table.resource(full, 0)?,
    };
    if r1 <= 0.0 {
        return Err(InterruptionDataError::InvalidInterruption(format!(
            "table {} has no first-innings resources at {} overs",
            table.version(),
            req.original_overs
        )));
    }

    let mut r2 = table.resource(full, 0)?;
    let mut allotted = full;
    let mut last_bowled = 0u16;
    for stop in &req.stoppages {
        if stop.balls_bowled < last_bowled {
            return Err(InterruptionDataError::InvalidInterruption(
                "stoppages are not in order".to_string(),
            ));
        }
        if stop.wickets >= MAX_WICKETS {
            return Err(InterruptionDataError::InvalidInterruption(
                "stoppage after the innings ended".to_string(),
            ));
        }
        if stop.balls_bowled > allotted {
            return Err(InterruptionDataError::InvalidInterruption(format!(
                "stoppage at ball {} of {}",
                stop.balls_bowled, allotted
            )));
        }
        let before = allotted - stop.balls_bowled;
        let lost = overs_to_balls(stop.overs_lost).filter(|l| *l <= before);
        let Some(lost) = lost else {
            return Err(InterruptionDataError::InvalidInterruption(format!(
                "{} overs lost with {} remaining",
                stop.overs_lost,
                format_overs(before)
            )));
        };
        let after = before - lost;
        r2 = r2 - table.resource(before, stop.wickets)? + table.resource(after, stop.wickets)?;
        allotted -= lost;
        last_bowled = stop.balls_bowled;
    }

    Ok(Resolved {
        r1,
        r2: r2.max(0.0),
        allotted_balls: allotted,
    })
}

/// Par total for the whole chase. Ratio form when the chasing side has no more
/// resources; otherwise the surplus is scored at the table's average when it has one.
fn par_total(table: &ResourceTable, score: u32, r1: f64, r2: f64) -> u32 {
    let s = score as f64;
    let par = match table.average_score() {
        Some(g) if r2 > r1 => s + g * (r2 - r1) / 100.0,
        _ => s * (r2 / r1),
    };
    (par + 1e-9).floor().max(0.0) as u32
}

fn par_at(
    table: &ResourceTable,
    score: u32,
    resolved: Resolved,
    balls_used: u16,
    wickets: u8,
) -> Result<u32, InterruptionDataError> {
    let remaining = resolved.allotted_balls.saturating_sub(balls_used);
    let used = (resolved.r2 - table.resource(remaining, wickets)?).max(0.0);
    Ok((score as f64 * used / resolved.r1 + 1e-9).floor().max(0.0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResourceTable {
        ResourceTable::from_file(ResourceTableFile {
            version: "t".into(),
            max_overs: 20,
            average_score: None,
            rows: vec![
                ResourceRow {
                    overs_left: 20,
                    balls: 0,
                    resources: vec![Some(100.0), Some(96.8)],
                },
                ResourceRow {
                    overs_left: 15,
                    balls: 0,
                    resources: vec![Some(75.1), Some(73.0)],
                },
                ResourceRow {
                    overs_left: 10,
                    balls: 0,
                    resources: vec![Some(52.3), None],
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn exhausted_states_have_no_resource() {
        let t = table();
        assert_eq!(t.resource(0, 3).unwrap(), 0.0);
        assert_eq!(t.resource(120, 10).unwrap(), 0.0);
    }

    #[test]
    fn missing_cell_is_reported_not_interpolated() {
        let t = table();
        assert!(matches!(
            t.resource(60, 1),
            Err(InterruptionDataError::ResourceUnavailable { wickets: 1, .. })
        ));
        assert!(t.resource(100, 0).is_err());
    }

    #[test]
    fn generated_table_is_monotone() {
        let t = ResourceTable::from_exponential_model("gen", 20, 0.04);
        assert!((t.resource(120, 0).unwrap() - 100.0).abs() < 1e-9);
        let mut prev = 0.0;
        for balls in 1..=120u16 {
            let r = t.resource(balls, 0).unwrap();
            assert!(r >= prev);
            prev = r;
        }
        assert!(t.resource(60, 5).unwrap() < t.resource(60, 0).unwrap());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad = ResourceTableFile {
            version: "x".into(),
            max_overs: 20,
            average_score: None,
            rows: vec![ResourceRow {
                overs_left: 20,
                balls: 0,
                resources: vec![Some(140.0)],
            }],
        };
        assert!(ResourceTable::from_file(bad).is_err());
    }
}
