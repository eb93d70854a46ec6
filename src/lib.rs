//! Population partitioning and ID remapping.
//!
//! Prepares the People, Locations and Visits tables of a synthetic population
//! for a distributed simulation: computes per-location occupancy, lays out the
//! location (and person) ID space in load-balanced contiguous ranges, rewrites
//! every foreign key consistently, and validates the result. Large tables are
//! joined through a range-partitioned merge-join so no step needs the whole
//! join in memory at once.

pub mod cluster;
pub mod config;
pub mod error;
pub mod join;
pub mod logging;
pub mod occupancy;
pub mod partition;
pub mod pipeline;
pub mod population;
pub mod remap;
pub mod table;
pub mod validate;

pub use cluster::{Clustering, GraphClusterer, GrowthState};
pub use config::{
    ClusterConfig, ClusterScheme, FileNames, JoinSettings, OccupancyConfig, PartitionScheme,
    PipelineConfig, PlannerConfig, ValidatorConfig,
};
pub use error::{Error, Result};
pub use join::{join, Cardinality, JoinOptions, JoinType, KeyBoundaries};
pub use occupancy::{sweep, Interval, Occupancy, OccupancyAnalyzer, OccupancySummary, TieBreak};
pub use partition::{PartitionAssignment, PartitionPlan, PartitionPlanner};
pub use pipeline::Pipeline;
pub use population::{Population, PopulationOffsets};
pub use remap::{IdAssignment, IdRemapper, IdUpdate, RemapTable};
pub use table::{Table, TableMetadata, TableStore, Value};
pub use validate::{Finding, FindingKind, Severity, ValidationReport, Validator};
