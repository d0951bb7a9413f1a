use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::aggregate::{
    AggregateStat, AggregationEngine, Discipline, Entity, FormMetric, FormWeighting, HeadToHead,
    Scope,
};
use crate::config::EngineConfig;
use crate::dataset;
use crate::error::{InfeasibleConstraintError, InterruptionDataError, NoDataError};
use crate::features::FeatureBuilder;
use crate::model::{PlayerId, PlayerRole};
use crate::predict::{LiveState, ModelArtifact, ModelSlot, OutcomePredictor, Prediction};
use crate::similarity::{SimilarPlayers, SimilarityIndex};
use crate::snapshot::Versioned;
use crate::squad::{EligibilityTag, Squad, SquadCandidate, SquadConstraints, SquadOptimizer, score_pool};
use crate::store::{DataVersion, DeliveryStore};
use crate::target::{Adjustment, ResourceTableRegistry, TargetAdjuster, TargetRequest};

/// Result of an aggregate query: the statistic, or a typed empty result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Aggregate {
    Stat(AggregateStat),
    NoData(#[serde(serialize_with = "serialize_display")] NoDataError),
}

impl Aggregate {
    pub fn stat(&self) -> Option<&AggregateStat> {
        match self {
            Aggregate::Stat(s) => Some(s),
            Aggregate::NoData(_) => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Aggregate::NoData(_))
    }
}

fn serialize_display<S: serde::Serializer>(err: &NoDataError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Every derived structure for one data version. Readers hold an `Arc<Snapshot>` and never
/// see parts from different versions.
#[derive(Debug)]
pub struct Snapshot {
    pub store: Arc<DeliveryStore>,
    pub aggregates: Arc<AggregationEngine>,
    pub features: Arc<FeatureBuilder>,
    pub similarity: Arc<SimilarityIndex>,
    pub predictor: OutcomePredictor,
    pub targets: TargetAdjuster,
}

impl Snapshot {
    pub fn version(&self) -> &DataVersion {
        self.store.version()
    }
}

#[derive(Debug, Clone)]
struct Inputs {
    store: Arc<DeliveryStore>,
    model: ModelSlot,
    tables: Arc<ResourceTableRegistry>,
}

/// Query facade over the current snapshot.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    snapshot: Versioned<Snapshot>,
    /// Serializes writers; readers only touch `snapshot`.
    inputs: Mutex<Inputs>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: DeliveryStore,
        model: ModelSlot,
        tables: ResourceTableRegistry,
    ) -> Self {
        let inputs = Inputs {
            store: Arc::new(store),
            model,
            tables: Arc::new(tables),
        };
        let snapshot = build_snapshot(&config, &inputs, None);
        info!(version = %snapshot.version(), "engine ready");
        Self {
            config,
            snapshot: Versioned::new(snapshot),
            inputs: Mutex::new(inputs),
        }
    }

    /// Store from the configured SQLite database (empty when none), tables from the
    /// configured directory, model from the configured artifact path.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let store = match &config.db_path {
            Some(path) => {
                let conn = dataset::open_db(path)?;
                dataset::load_store(&conn).with_context(|| format!("load {}", path.display()))?
            }
            None => DeliveryStore::empty(),
        };
        let tables = match &config.table_dir {
            Some(dir) => ResourceTableRegistry::load_dir(dir)?,
            None => ResourceTableRegistry::new(),
        };
        let model = match &config.model_path {
            Some(path) => ModelSlot::from(ModelArtifact::load(path)),
            None => ModelSlot::Unavailable("no model path configured".to_string()),
        };
        Ok(Self::new(config, store, model, tables))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load()
    }

    pub fn version(&self) -> DataVersion {
        self.snapshot().version().clone()
    }

    /// Recomputes every derived structure from `store` and swaps it in.
    pub fn refresh(&self, store: DeliveryStore) {
        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        inputs.store = Arc::new(store);
        let next = build_snapshot(&self.config, &inputs, None);
        info!(version = %next.version(), matches = next.store.matches().len(), "published snapshot");
        self.snapshot.publish(next);
    }

    /// Replaces the outcome model. Statistics are reused from the current snapshot.
    pub fn install_model(&self, model: ModelSlot) {
        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        inputs.model = model;
        let current = self.snapshot.load();
        let next = build_snapshot(&self.config, &inputs, Some(&current));
        info!(version = %next.version(), "installed outcome model");
        self.snapshot.publish(next);
    }

    pub fn install_tables(&self, tables: ResourceTableRegistry) {
        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        inputs.tables = Arc::new(tables);
        let current = self.snapshot.load();
        let next = build_snapshot(&self.config, &inputs, Some(&current));
        info!(tables = ?next.targets.tables().versions(), "installed resource tables");
        self.snapshot.publish(next);
    }

    pub fn aggregate(&self, scope: &Scope, entity: &Entity) -> Aggregate {
        match self.snapshot().aggregates.aggregate(scope, entity) {
            Ok(stat) => Aggregate::Stat(stat),
            Err(err) => Aggregate::NoData(err),
        }
    }

    /// Form over the configured window with exponential weighting.
    pub fn form(
        &self,
        player: PlayerId,
        scope: &Scope,
        discipline: Discipline,
    ) -> Result<FormMetric, NoDataError> {
        self.snapshot().aggregates.form(
            player,
            scope,
            discipline,
            self.config.form_window,
            FormWeighting::Exponential {
                decay: self.config.form_decay,
            },
        )
    }

    pub fn head_to_head(&self, team_a: &str, team_b: &str, venue: Option<&str>) -> HeadToHead {
        self.snapshot()
            .aggregates
            .head_to_head(team_a, team_b, venue, None)
    }

    pub fn adjust_target(&self, request: &TargetRequest) -> Result<Adjustment, InterruptionDataError> {
        self.snapshot().targets.adjust(request)
    }

    pub fn par_score(
        &self,
        request: &TargetRequest,
        balls_used: u16,
        wickets: u8,
    ) -> Result<u32, InterruptionDataError> {
        self.snapshot().targets.par_score(request, balls_used, wickets)
    }

    pub fn predict(
        &self,
        team_a: &str,
        team_b: &str,
        venue: &str,
        live: Option<&LiveState>,
    ) -> Prediction {
        self.snapshot().predictor.predict(team_a, team_b, venue, live)
    }

    pub fn similar_players(
        &self,
        player: PlayerId,
        k: usize,
        role: Option<PlayerRole>,
    ) -> Result<SimilarPlayers, NoDataError> {
        self.snapshot().similarity.similar(player, k, role)
    }

    /// Pool entries scored by recent fantasy output under the configured scoring.
    pub fn score_candidates(&self, pool: &[(PlayerId, Vec<EligibilityTag>)]) -> Vec<SquadCandidate> {
        let snap = self.snapshot();
        score_pool(
            &snap.aggregates,
            pool,
            &self.config.fantasy,
            self.config.form_window,
            FormWeighting::Exponential {
                decay: self.config.form_decay,
            },
        )
    }

    /// Selects a squad; `None` uses the configured constraints.
    pub fn build_squad(
        &self,
        pool: &[SquadCandidate],
        constraints: Option<SquadConstraints>,
    ) -> Result<Squad, InfeasibleConstraintError> {
        let constraints = constraints.unwrap_or_else(|| self.config.squad.clone());
        SquadOptimizer::new(constraints).select(pool)
    }
}

fn build_snapshot(config: &EngineConfig, inputs: &Inputs, reuse: Option<&Snapshot>) -> Snapshot {
    let reusable = reuse.filter(|s| Arc::ptr_eq(&s.store, &inputs.store));
    let (aggregates, features, similarity) = match reusable {
        Some(s) => (
            Arc::clone(&s.aggregates),
            Arc::clone(&s.features),
            Arc::clone(&s.similarity),
        ),
        None => {
            let aggregates = Arc::new(AggregationEngine::new(Arc::clone(&inputs.store)));
            let features = Arc::new(FeatureBuilder::new(
                Arc::clone(&aggregates),
                config.elo,
                config.form_window,
                config.form_decay,
            ));
            let similarity = Arc::new(SimilarityIndex::build(&aggregates, config.min_innings));
            (aggregates, features, similarity)
        }
    };

    let predictor = OutcomePredictor::new(
        Arc::clone(&features),
        inputs.model.clone(),
        Arc::clone(&inputs.tables),
        config.live_table.clone(),
    );
    let targets = TargetAdjuster::new(Arc::clone(&inputs.tables), config.min_overs);

    Snapshot {
        store: Arc::clone(&inputs.store),
        aggregates,
        features,
        similarity,
        predictor,
        targets,
    }
}
