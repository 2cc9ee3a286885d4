use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hook_bridge::{FunctionKey, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::HostArgs;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TICK_MS: u64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workers must be at least 1")]
    NoWorkers,
    #[error("response for {0} lists no words")]
    EmptyWords(FunctionKey),
}

/// Answer the simulated engine gives for one function key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSpec {
    Void,
    Word(u64),
    Int(i32),
    Bool(bool),
    Float(f32),
    Words(Vec<u64>),
    Text(String),
}

impl ResponseSpec {
    pub fn to_response(&self) -> Response {
        match self {
            ResponseSpec::Void => Response::Void,
            ResponseSpec::Word(word) => Response::Word(*word),
            ResponseSpec::Int(value) => Response::Word(*value as i64 as u64),
            ResponseSpec::Bool(value) => Response::Word(u64::from(*value)),
            ResponseSpec::Float(value) => Response::Word(u64::from(value.to_bits())),
            ResponseSpec::Words(words) => Response::Words(words.clone()),
            ResponseSpec::Text(text) => Response::Text(text.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub workers: usize,
    pub tick_interval_ms: u64,
    /// Keys missing here return a null result.
    pub responses: BTreeMap<FunctionKey, ResponseSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            tick_interval_ms: DEFAULT_TICK_MS,
            responses: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading host config {}", path.display()))?;
        let config: HostConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing host config {}", path.display()))?;
        Ok(config)
    }

    /// Loads the file named on the command line and applies flag overrides.
    pub fn resolve(args: &HostArgs) -> Result<Self> {
        let mut config = Self::from_json_file(args.config.as_deref())?;
        if let Some(workers) = args.workers {
            config.workers = workers;
        }
        if let Some(tick_ms) = args.tick_ms {
            config.tick_interval_ms = tick_ms;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        for (key, response) in &self.responses {
            if matches!(response, ResponseSpec::Words(words) if words.is_empty()) {
                return Err(ConfigError::EmptyWords(*key));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
