use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use cricket_insights::aggregate::{Discipline, Entity, Scope};
use cricket_insights::config::EngineConfig;
use cricket_insights::engine::Engine;
use cricket_insights::ingest;
use cricket_insights::model::{PlayerId, PlayerRole, parse_overs};
use cricket_insights::predict::{LiveState, ModelArtifact, ModelSlot, Side};
use cricket_insights::squad::{EligibilityTag, SquadConstraints};
use cricket_insights::synthetic::{self, SyntheticConfig};
use cricket_insights::target::{ResourceTableRegistry, Stoppage, TargetRequest};
use cricket_insights::{dataset, logging};

#[derive(Parser)]
#[command(name = "cricket")]
#[command(about = "Cricket statistics, rain-rule targets, outcome prediction and squad selection")]
struct Cli {
    /// JSON config file; env overrides still apply on top
    #[arg(long, global = true, env = "CRICKET_CONFIG")]
    config: Option<PathBuf>,

    /// Match documents (files or directories of .json) used instead of the database
    #[arg(long = "data", global = true)]
    data: Vec<PathBuf>,

    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[arg(long, global = true)]
    tables: Option<PathBuf>,

    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate match documents and save them to the SQLite dataset
    Ingest {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "cli")]
        source: String,
    },

    /// Write a reproducible synthetic league as a match document
    Synth {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        #[arg(long, default_value_t = 6)]
        teams: usize,
        #[arg(long, default_value_t = 120)]
        matches: usize,
        #[arg(long, default_value_t = 20)]
        overs: u16,
    },

    /// Aggregate statistics for a player or team
    Stats {
        #[command(flatten)]
        entity: EntityArgs,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Recent form for a player
    Form {
        #[arg(long)]
        player: PlayerId,
        #[arg(long, value_enum, default_value = "batting")]
        discipline: DisciplineArg,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Head-to-head record between two teams
    H2h {
        team_a: String,
        team_b: String,
        #[arg(long)]
        venue: Option<String>,
    },

    /// Revised target for an interrupted chase
    Target(TargetArgs),

    /// Outcome probabilities for a fixture, optionally in play
    Predict {
        team_a: String,
        team_b: String,
        #[arg(long)]
        venue: String,
        #[command(flatten)]
        live: LiveArgs,
    },

    /// Players with the most similar statistical profile
    Similar {
        #[arg(long)]
        player: PlayerId,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
        #[arg(long)]
        role: Option<String>,
    },

    /// Select a squad from a pool file
    Squad {
        /// JSON array of {"player_id", "tags"} entries
        #[arg(long)]
        pool: PathBuf,
        /// JSON constraint set; the configured one is used when absent
        #[arg(long)]
        constraints: Option<PathBuf>,
    },
}

#[derive(Args)]
struct EntityArgs {
    #[arg(long, conflicts_with = "team")]
    player: Option<PlayerId>,
    #[arg(long)]
    team: Option<String>,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long, conflicts_with_all = ["venue", "opponent"])]
    season: Option<String>,
    #[arg(long, conflicts_with = "opponent")]
    venue: Option<String>,
    #[arg(long)]
    opponent: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> Scope {
        if let Some(s) = &self.season {
            Scope::Season(s.clone())
        } else if let Some(v) = &self.venue {
            Scope::Venue(v.clone())
        } else if let Some(t) = &self.opponent {
            Scope::Opponent(t.clone())
        } else {
            Scope::Career
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DisciplineArg {
    Batting,
    Bowling,
    Fantasy,
}

impl From<DisciplineArg> for Discipline {
    fn from(arg: DisciplineArg) -> Self {
        match arg {
            DisciplineArg::Batting => Discipline::Batting,
            DisciplineArg::Bowling => Discipline::Bowling,
            DisciplineArg::Fantasy => Discipline::Fantasy,
        }
    }
}

#[derive(Args)]
struct TargetArgs {
    /// Full request as JSON; the flags below are ignored when given
    #[arg(long)]
    request: Option<PathBuf>,
    #[arg(long)]
    score: Option<u32>,
    #[arg(long, default_value_t = 20)]
    overs: u16,
    /// Chase shortened to this many overs before it began
    #[arg(long)]
    reduced_to: Option<u16>,
    /// Mid-innings stoppage as OVERS:WICKETS:OVERS_LOST, e.g. 12.4:3:5
    #[arg(long = "stoppage", value_parser = parse_stoppage)]
    stoppages: Vec<Stoppage>,
    #[arg(long)]
    table: Option<String>,
    #[arg(long)]
    team1_resources: Option<f64>,
    /// Also report the par score at this point of the chase, in overs notation
    #[arg(long)]
    par_at: Option<String>,
    #[arg(long, default_value_t = 0)]
    par_wickets: u8,
}

#[derive(Args)]
struct LiveArgs {
    /// Which side is batting now: a or b
    #[arg(long)]
    batting: Option<String>,
    #[arg(long, default_value_t = 1)]
    innings: u8,
    #[arg(long, default_value_t = 0)]
    runs: u32,
    #[arg(long, default_value_t = 0)]
    wickets: u8,
    /// Overs bowled in the current innings, e.g. 14.3
    #[arg(long = "at")]
    at: Option<String>,
    #[arg(long)]
    chasing: Option<u32>,
    #[arg(long, default_value_t = 20)]
    max_overs: u16,
}

impl LiveArgs {
    fn state(&self) -> Result<Option<LiveState>> {
        let Some(batting) = &self.batting else {
            return Ok(None);
        };
        let batting = match batting.trim().to_ascii_lowercase().as_str() {
            "a" => Side::TeamA,
            "b" => Side::TeamB,
            other => bail!("--batting must be a or b, got {other}"),
        };
        let balls_bowled = match &self.at {
            Some(raw) => parse_overs(raw).ok_or_else(|| anyhow!("invalid overs {raw}"))?,
            None => 0,
        };
        Ok(Some(LiveState {
            batting,
            innings: self.innings,
            runs: self.runs,
            wickets: self.wickets,
            balls_bowled,
            target: self.chasing,
            max_overs: self.max_overs,
        }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PoolEntry {
    player_id: PlayerId,
    #[serde(default)]
    tags: Vec<EligibilityTag>,
}

fn parse_stoppage(raw: &str) -> Result<Stoppage, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [at, wickets, lost] = parts.as_slice() else {
        return Err(format!("expected OVERS:WICKETS:OVERS_LOST, got {raw}"));
    };
    let balls_bowled = parse_overs(at).ok_or_else(|| format!("invalid overs {at}"))?;
    let wickets = wickets
        .trim()
        .parse::<u8>()
        .map_err(|_| format!("invalid wickets {wickets}"))?;
    let overs_lost = lost
        .trim()
        .parse::<u16>()
        .map_err(|_| format!("invalid overs lost {lost}"))?;
    Ok(Stoppage {
        balls_bowled,
        wickets,
        overs_lost,
    })
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_tracing("info");

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Ingest { inputs, source } => run_ingest(&config, inputs, source),
        Command::Synth {
            out,
            seed,
            teams,
            matches,
            overs,
        } => {
            let doc = synthetic::generate(&SyntheticConfig {
                seed: *seed,
                teams: *teams,
                matches: *matches,
                overs_per_side: *overs,
                ..SyntheticConfig::default()
            });
            doc.write(out)?;
            println!(
                "wrote {} matches and {} players to {}",
                doc.matches.len(),
                doc.players.len(),
                out.display()
            );
            Ok(())
        }
        command => {
            let engine = build_engine(&cli, config)?;
            run_query(&engine, command)
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))?;
    if let Some(db) = &cli.db {
        config.db_path = Some(db.clone());
    }
    if let Some(dir) = &cli.tables {
        config.table_dir = Some(dir.clone());
    }
    if let Some(path) = &cli.model {
        config.model_path = Some(path.clone());
    }
    Ok(config)
}

fn build_engine(cli: &Cli, config: EngineConfig) -> Result<Engine> {
    if cli.data.is_empty() {
        return Engine::from_config(config);
    }
    let store = ingest::load_store(&cli.data)?;
    let tables = match &config.table_dir {
        Some(dir) => ResourceTableRegistry::load_dir(dir)?,
        None => ResourceTableRegistry::new(),
    };
    let model = match &config.model_path {
        Some(path) => ModelSlot::from(ModelArtifact::load(path)),
        None => ModelSlot::Unavailable("no model path configured".to_string()),
    };
    Ok(Engine::new(config, store, model, tables))
}

fn run_ingest(config: &EngineConfig, inputs: &[PathBuf], source: &str) -> Result<()> {
    let db_path = config
        .db_path
        .clone()
        .context("ingest needs --db or CRICKET_DB_PATH")?;

    let doc = ingest::read_paths(inputs)?;
    // Nothing is written unless the merged set validates as one store.
    let store = doc.clone().into_store().context("validate match documents")?;
    info!(matches = store.matches().len(), version = %store.version(), "validated");

    let mut conn = dataset::open_db(&db_path)?;
    let summary = dataset::save_document(&mut conn, &doc, source)?;
    println!("Ingest complete");
    println!("DB: {}", db_path.display());
    println!("Players: {}", summary.players_upserted);
    println!("Matches: {}", summary.matches_upserted);
    println!("Deliveries: {}", summary.deliveries_written);
    Ok(())
}

fn run_query(engine: &Engine, command: &Command) -> Result<()> {
    match command {
        Command::Stats { entity, scope } => {
            let entity = match (&entity.player, &entity.team) {
                (Some(id), _) => Entity::Player(*id),
                (None, Some(team)) => Entity::Team(team.clone()),
                (None, None) => bail!("stats needs --player or --team"),
            };
            print_json(&engine.aggregate(&scope.scope(), &entity))
        }
        Command::Form {
            player,
            discipline,
            scope,
        } => {
            let form = engine.form(*player, &scope.scope(), (*discipline).into())?;
            print_json(&form)
        }
        Command::H2h {
            team_a,
            team_b,
            venue,
        } => print_json(&engine.head_to_head(team_a, team_b, venue.as_deref())),
        Command::Target(args) => run_target(engine, args),
        Command::Predict {
            team_a,
            team_b,
            venue,
            live,
        } => {
            let live = live.state()?;
            print_json(&engine.predict(team_a, team_b, venue, live.as_ref()))
        }
        Command::Similar { player, k, role } => {
            let role = match role {
                Some(raw) => {
                    Some(PlayerRole::from_text(raw).ok_or_else(|| anyhow!("unknown role {raw}"))?)
                }
                None => None,
            };
            print_json(&engine.similar_players(*player, *k, role)?)
        }
        Command::Squad { pool, constraints } => {
            let raw = std::fs::read_to_string(pool)
                .with_context(|| format!("read pool {}", pool.display()))?;
            let entries: Vec<PoolEntry> =
                serde_json::from_str(&raw).context("parse pool json")?;
            let pool: Vec<(PlayerId, Vec<EligibilityTag>)> =
                entries.into_iter().map(|e| (e.player_id, e.tags)).collect();
            let constraints = match constraints {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("read constraints {}", path.display()))?;
                    Some(
                        serde_json::from_str::<SquadConstraints>(&raw)
                            .context("parse constraints json")?,
                    )
                }
                None => None,
            };
            let candidates = engine.score_candidates(&pool);
            print_json(&engine.build_squad(&candidates, constraints)?)
        }
        Command::Ingest { .. } | Command::Synth { .. } => Ok(()),
    }
}

fn run_target(engine: &Engine, args: &TargetArgs) -> Result<()> {
    let request = match &args.request {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read target request {}", path.display()))?;
            serde_json::from_str::<TargetRequest>(&raw).context("parse target request json")?
        }
        None => {
            let score = args.score.context("target needs --score or --request")?;
            let table = match &args.table {
                Some(t) => t.clone(),
                None => engine
                    .snapshot()
                    .targets
                    .tables()
                    .versions()
                    .first()
                    .map(|v| v.to_string())
                    .context("no resource tables loaded; pass --tables")?,
            };
            let mut request = match args.reduced_to {
                Some(new_overs) => TargetRequest::before_start(score, args.overs, new_overs, &table),
                None => TargetRequest {
                    first_innings_score: score,
                    team1_resources: None,
                    original_overs: args.overs,
                    stoppages: Vec::new(),
                    table_version: table,
                    par_wickets: None,
                },
            };
            request.team1_resources = args.team1_resources;
            request.stoppages.extend(args.stoppages.iter().copied());
            request
        }
    };

    let adjustment = engine.adjust_target(&request)?;
    print_json(&adjustment)?;

    if let Some(raw) = &args.par_at {
        let balls = parse_overs(raw).ok_or_else(|| anyhow!("invalid overs {raw}"))?;
        let par = engine.par_score(&request, balls, args.par_wickets)?;
        println!("par at {raw} overs for {} down: {par}", args.par_wickets);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
