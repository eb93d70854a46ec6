//! Pipeline configuration.
//!
//! Every stage takes an explicit configuration struct; nothing is read from
//! global state. A whole [`PipelineConfig`] can be loaded from a JSON file and
//! individual fields overridden from the command line.

use crate::error::{Error, Result};
use crate::occupancy::TieBreak;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNames {
    pub people: String,
    pub locations: String,
    pub visits: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            people: "people.csv".to_string(),
            locations: "locations.csv".to_string(),
            visits: "visits.csv".to_string(),
        }
    }
}

/// Settings for the sharded merge-join used by remapping and validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinSettings {
    /// Number of key-range shards each table is split into before joining.
    pub num_partitions: usize,
    /// Size of the worker pool joining shard pairs.
    pub num_workers: usize,
    /// Check per-key group sizes before and after every remap.
    pub validate: bool,
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self {
            num_partitions: 32,
            num_workers: 1,
            validate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    pub tie_break: TieBreak,
    pub num_workers: usize,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::EndBeforeStart,
            num_workers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionScheme {
    Folding,
    LinearCut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub scheme: PartitionScheme,
    pub num_partitions: usize,
    /// Column balanced across partitions.
    pub load_column: String,
    /// Order elements are laid out in before a linear cut. Empty picks the admin
    /// hierarchy when present, otherwise the location id.
    pub sort_by: Vec<String>,
    /// Folding only: column splitting elements into separately folded groups.
    pub group_column: Option<String>,
    /// Folding only: rows whose group column contains this text form the first group.
    pub group_pattern: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            scheme: PartitionScheme::Folding,
            num_partitions: 576,
            load_column: "max_simultaneous_visits".to_string(),
            sort_by: Vec::new(),
            group_column: None,
            group_pattern: "home".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterScheme {
    /// Cosine similarity over the location x person visit matrix.
    Visit,
    /// Nested administrative codes.
    Geo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub scheme: ClusterScheme,
    pub num_partitions: usize,
    pub seed: u64,
    pub admin_columns: Vec<String>,
    /// Maximum people per cluster; defaults to an even share.
    pub people_capacity: Option<usize>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            scheme: ClusterScheme::Visit,
            num_partitions: 16,
            seed: 0,
            admin_columns: vec![
                "admin1".to_string(),
                "admin2".to_string(),
                "admin3".to_string(),
                "admin4".to_string(),
            ],
            people_capacity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Turn integrity and cardinality findings into errors.
    pub strict: bool,
    /// Absolute tolerance for baseline comparison.
    pub epsilon: f64,
    /// Stable identifier shared by computed metrics and the baseline.
    pub baseline_key: String,
    pub compare_columns: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strict: false,
            epsilon: 1e-6,
            baseline_key: "old_lid".to_string(),
            compare_columns: vec![
                "total_visits".to_string(),
                "max_simultaneous_visits".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub files: FileNames,
    pub join: JoinSettings,
    pub occupancy: OccupancyConfig,
    pub planner: PlannerConfig,
    pub cluster: ClusterConfig,
    pub validator: ValidatorConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.join.num_partitions == 0 {
            return Err(Error::Config("join.num_partitions must be > 0".to_string()));
        }
        if self.join.num_workers == 0 {
            return Err(Error::Config("join.num_workers must be > 0".to_string()));
        }
        if self.occupancy.num_workers == 0 {
            return Err(Error::Config("occupancy.num_workers must be > 0".to_string()));
        }
        if self.planner.num_partitions == 0 {
            return Err(Error::Config("planner.num_partitions must be > 0".to_string()));
        }
        if self.cluster.num_partitions == 0 {
            return Err(Error::Config("cluster.num_partitions must be > 0".to_string()));
        }
        if self.cluster.scheme == ClusterScheme::Geo && self.cluster.admin_columns.is_empty() {
            return Err(Error::Config(
                "cluster.admin_columns must name at least one column".to_string(),
            ));
        }
        if self.cluster.people_capacity == Some(0) {
            return Err(Error::Config("cluster.people_capacity must be > 0".to_string()));
        }
        if self.validator.epsilon.is_nan() || self.validator.epsilon < 0.0 {
            return Err(Error::Config("validator.epsilon must be >= 0".to_string()));
        }
        Ok(())
    }
}
