use thiserror::Error;

use crate::model::{MatchId, PlayerId};

/// The entity/scope pair matched zero records. Returned as a typed empty result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoDataError {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("unknown team {0}")]
    UnknownTeam(String),

    #[error("no records for {entity} in scope {scope}")]
    EmptyScope { entity: String, scope: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterruptionDataError {
    #[error("resource table version {0} is not loaded")]
    UnknownTableVersion(String),

    #[error("resource table {version} has no cell for {overs_left} overs left with {wickets} wickets lost")]
    ResourceUnavailable {
        version: String,
        overs_left: String,
        wickets: u8,
    },

    #[error("invalid interruption: {0}")]
    InvalidInterruption(String),
}

#[derive(Error, Debug)]
pub enum ModelUnavailableError {
    #[error("model artifact not found at {0}")]
    Missing(String),

    #[error("model artifact is corrupt: {0}")]
    Corrupt(String),

    #[error("model features {found:?} do not match the feature builder")]
    FeatureMismatch { found: Vec<String> },

    #[error("venue {0} has no history")]
    UnseenVenue(String),

    #[error("failed reading model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("model artifact json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InfeasibleConstraintError {
    #[error("pool has {available} eligible players, squad needs {required}")]
    PoolTooSmall { available: usize, required: usize },

    #[error("pool has {available} wicketkeepers, squad needs at least {required}")]
    NotEnoughKeepers { available: usize, required: usize },

    #[error("pool has {available} specialist bowlers, squad needs at least {required}")]
    NotEnoughBowlers { available: usize, required: usize },

    #[error("pool has {available} batting options, squad needs at least {required}")]
    NotEnoughBatters { available: usize, required: usize },

    #[error("only {available} domestic players available, foreign cap of {cap} leaves {required} slots to fill")]
    ForeignCapTooTight {
        available: usize,
        cap: usize,
        required: usize,
    },

    #[error("constraint set is contradictory: {0}")]
    Contradictory(String),

    #[error("no squad satisfies every constraint (searched {nodes} nodes)")]
    SearchExhausted { nodes: usize },
}

/// Structurally invalid input rejected before it reaches the aggregation layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("match {0} appears more than once")]
    DuplicateMatch(MatchId),

    #[error("match {match_id}: {reason}")]
    InvalidMatch { match_id: MatchId, reason: String },

    #[error("match {match_id} innings {innings} delivery {index}: {reason}")]
    InvalidDelivery {
        match_id: MatchId,
        innings: u8,
        index: usize,
        reason: String,
    },

    #[error("player {0}: {1}")]
    InvalidPlayer(PlayerId, String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed reading config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}
