use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::FantasyScoring;
use crate::elo::EloConfig;
use crate::error::ConfigError;
use crate::squad::SquadConstraints;

pub const CONFIG_PATH_ENV: &str = "CRICKET_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Innings considered by the form metric.
    pub form_window: usize,
    /// Weight multiplier per step back in time for exponentially weighted form.
    pub form_decay: f64,
    /// Innings a player needs to appear in similarity results.
    pub min_innings: u32,
    /// Shortest chase, in overs, that still produces a result.
    pub min_overs: u16,
    pub model_path: Option<PathBuf>,
    pub table_dir: Option<PathBuf>,
    /// Resource table used for in-play chase estimates.
    pub live_table: Option<String>,
    pub db_path: Option<PathBuf>,
    pub elo: EloConfig,
    pub fantasy: FantasyScoring,
    pub squad: SquadConstraints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            form_decay: 0.8,
            min_innings: 10,
            min_overs: 5,
            model_path: None,
            table_dir: None,
            live_table: None,
            db_path: None,
            elo: EloConfig::default(),
            fantasy: FantasyScoring::default(),
            squad: SquadConstraints::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Defaults, then the file named by `CRICKET_CONFIG`, then individual env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match opt_env(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides(opt_env)?;
        Ok(cfg)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = parsed::<usize>(&lookup, "CRICKET_FORM_WINDOW")? {
            self.form_window = v.clamp(1, 50);
        }
        if let Some(v) = parsed::<f64>(&lookup, "CRICKET_FORM_DECAY")? {
            self.form_decay = v.clamp(0.01, 1.0);
        }
        if let Some(v) = parsed::<u32>(&lookup, "CRICKET_MIN_INNINGS")? {
            self.min_innings = v;
        }
        if let Some(v) = parsed::<u16>(&lookup, "CRICKET_MIN_OVERS")? {
            self.min_overs = v;
        }
        if let Some(v) = lookup("CRICKET_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CRICKET_TABLE_DIR") {
            self.table_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CRICKET_LIVE_TABLE") {
            self.live_table = Some(v);
        }
        if let Some(v) = lookup("CRICKET_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|val| {
        if val.trim().is_empty() {
            None
        } else {
            Some(val)
        }
    })
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn overrides_replace_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CRICKET_FORM_WINDOW", "8"),
            ("CRICKET_MIN_INNINGS", "3"),
            ("CRICKET_TABLE_DIR", "tables"),
        ]
        .into_iter()
        .collect();
        let mut cfg = EngineConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.form_window, 8);
        assert_eq!(cfg.min_innings, 3);
        assert_eq!(cfg.table_dir, Some(PathBuf::from("tables")));
        assert_eq!(cfg.min_overs, 5);
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut cfg = EngineConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == "CRICKET_MIN_OVERS").then(|| "five".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"min_overs": 10}"#).unwrap();
        assert_eq!(cfg.min_overs, 10);
        assert_eq!(cfg.form_window, 5);
        assert_eq!(cfg.squad.size, 11);
    }
}
