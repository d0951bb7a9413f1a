pub mod aggregate;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod elo;
pub mod engine;
pub mod error;
pub mod features;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod predict;
pub mod similarity;
pub mod snapshot;
pub mod squad;
pub mod store;
pub mod synthetic;
pub mod target;

pub use engine::{Aggregate, Engine, Snapshot};
