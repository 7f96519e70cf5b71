use common::{ChunkId, QservError, SubChunkId, RECEIVE_BUFFER_SIZE};
use std::fs;
use std::time::Duration;

use qdisp::ExecutiveConfig;
use wsched::{ForemanConfig, DEFAULT_MAX_RUNNING};

/// Settings of one czar run.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CzarConfig {
    /// Path to a JSON catalog dump.
    pub catalog: String,
    /// Database of unqualified table names.
    pub default_db: String,
    pub query: String,
    pub chunks: Vec<ChunkId>,
    /// Subchunks used for every chunk of a subchunked plan.
    pub subchunks: Vec<SubChunkId>,
    /// Merged result bytes kept before the rest is squashed. 0 is unlimited.
    pub result_limit: usize,
    /// Worker runner pool size.
    pub runners: usize,
    /// Receive buffer size in bytes.
    pub buffer_size: usize,
    /// Longest single join wait, in seconds.
    pub join_wait_secs: u64,
}

impl Default for CzarConfig {
    fn default() -> Self {
        CzarConfig {
            catalog: String::new(),
            default_db: String::from("LSST"),
            query: String::new(),
            chunks: Vec::new(),
            subchunks: Vec::new(),
            result_limit: 0,
            runners: DEFAULT_MAX_RUNNING,
            buffer_size: RECEIVE_BUFFER_SIZE,
            join_wait_secs: 5,
        }
    }
}

impl CzarConfig {
    pub fn from_file(path: &str) -> Result<Self, QservError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn executive_config(&self) -> ExecutiveConfig {
        ExecutiveConfig {
            result_limit: if self.result_limit == 0 {
                None
            } else {
                Some(self.result_limit)
            },
            join_wait: Duration::from_secs(self.join_wait_secs),
            ..ExecutiveConfig::default()
        }
    }

    pub fn foreman_config(&self) -> ForemanConfig {
        ForemanConfig {
            pool_size: self.runners,
        }
    }

    /// Checks values that have no usable default.
    pub fn validate(&self) -> Result<(), QservError> {
        if self.catalog.is_empty() {
            return Err(QservError::ConfigError(String::from("No catalog given")));
        }
        if self.query.trim().is_empty() {
            return Err(QservError::ConfigError(String::from("No query given")));
        }
        if self.runners == 0 {
            return Err(QservError::ConfigError(String::from(
                "runners must be positive",
            )));
        }
        if self.buffer_size == 0 {
            return Err(QservError::ConfigError(String::from(
                "buffer_size must be positive",
            )));
        }
        Ok(())
    }
}

/// Parses a comma-separated id list such as `100,101,102`.
pub fn parse_ids(list: &str) -> Result<Vec<i32>, QservError> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i32>()
                .map_err(|_| QservError::ConfigError(format!("Bad id {} in {}", s, list)))
        })
        .collect()
}
