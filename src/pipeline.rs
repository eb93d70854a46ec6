//! End-to-end stages: load, annotate, plan or cluster, remap, save, validate.
//!
//! Each stage reads a population directory and writes a new one. Input and
//! output may be the same directory.

use crate::cluster::{Clustering, GraphClusterer};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::log_stage;
use crate::occupancy::{summarize, OccupancyAnalyzer, OccupancySummary};
use crate::partition::{PartitionPlan, PartitionPlanner};
use crate::population::{Population, PopulationOffsets, HID, LID, PID, START_TIME};
use crate::remap::IdRemapper;
use crate::table::TableStore;
use crate::validate::{ValidationReport, Validator};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn analyzer(&self) -> OccupancyAnalyzer {
        OccupancyAnalyzer::new(self.config.occupancy)
    }

    /// Stage remaps keep `old_<id>`; the baseline comparison joins on it.
    fn remapper(&self) -> IdRemapper {
        IdRemapper::new(self.config.join).with_original_ids(true)
    }

    fn load(&self, dir: &Path) -> Result<Population> {
        let started = Instant::now();
        let population = Population::load(&TableStore::new(dir), &self.config.files)?;
        log_stage!(
            "load",
            started,
            people = population.people.len(),
            locations = population.locations.len(),
            visits = population.visits.len()
        );
        Ok(population)
    }

    fn save(&self, population: &Population, dir: &Path, offsets: &PopulationOffsets) -> Result<()> {
        let started = Instant::now();
        population.save(&TableStore::new(dir), &self.config.files, offsets)?;
        log_stage!("save", started, dir = %dir.display());
        Ok(())
    }

    /// Offsets recorded in the metadata artifacts of `dir`, if any.
    fn load_offsets(&self, dir: &Path) -> Result<PopulationOffsets> {
        let store = TableStore::new(dir);
        let people = store.read_metadata(&self.config.files.people)?;
        let locations = store.read_metadata(&self.config.files.locations)?;
        Ok(PopulationOffsets {
            people: people.and_then(|m| m.partition_offsets),
            locations: locations.and_then(|m| m.partition_offsets),
        })
    }

    /// Annotate Locations with occupancy heuristics and write the result.
    pub fn heuristics(&self, input: &Path, output: &Path) -> Result<OccupancySummary> {
        let mut population = self.load(input)?;
        let started = Instant::now();
        population.locations = self
            .analyzer()
            .annotate(&population.locations, &population.visits)?;
        let summary = summarize(&population.locations, &population.visits)?;
        log_stage!(
            "heuristics",
            started,
            msv_max = summary.msv_max,
            msv_mean = summary.msv_mean,
            tv_max = summary.tv_max,
            nnz = summary.nnz
        );
        let offsets = self.load_offsets(input)?;
        self.save(&population, output, &offsets)?;
        Ok(summary)
    }

    /// Lay out Locations for balanced partitions and rewrite every reference.
    pub fn partition(&self, input: &Path, output: &Path) -> Result<PartitionPlan> {
        let mut population = self.load(input)?;
        let load_column = self.config.planner.load_column.as_str();
        if !population.locations.has_column(load_column) {
            info!(load_column, "Load column missing; computing occupancy heuristics");
            population.locations = self
                .analyzer()
                .annotate(&population.locations, &population.visits)?;
            if !population.locations.has_column(load_column) {
                return Err(Error::domain(format!(
                    "load column '{}' is neither present nor computable",
                    load_column
                )));
            }
        }

        let started = Instant::now();
        let plan = PartitionPlanner::new(self.config.planner.clone()).plan(&population.locations)?;
        let remapped = self
            .remapper()
            .remap_population(&population, None, Some(&plan.order))?;
        let mut population = remapped.population;
        plan.label(&mut population.locations)?;
        log_stage!("partition", started, partitions = plan.assignment.num_partitions());

        let offsets = PopulationOffsets {
            people: self.load_offsets(input)?.people,
            locations: Some(plan.assignment.offsets().to_vec()),
        };
        self.save(&population, output, &offsets)?;
        Ok(plan)
    }

    /// Cluster Locations and People together and rewrite every reference.
    pub fn cluster(&self, input: &Path, output: &Path) -> Result<Clustering> {
        let population = self.load(input)?;
        let started = Instant::now();
        let clustering = GraphClusterer::new(self.config.cluster.clone()).cluster(&population)?;
        let remapped = self.remapper().remap_population(
            &population,
            Some(&clustering.people_order),
            Some(&clustering.location_order),
        )?;
        log_stage!(
            "cluster",
            started,
            location_clusters = clustering.location_assignment.num_partitions(),
            people_clusters = clustering.people_assignment.num_partitions()
        );

        let offsets = PopulationOffsets {
            people: Some(clustering.people_assignment.offsets().to_vec()),
            locations: Some(clustering.location_assignment.offsets().to_vec()),
        };
        self.save(&remapped.population, output, &offsets)?;
        Ok(clustering)
    }

    /// Make `pid` and `lid` dense from 0 and follow them through Visits.
    pub fn contiguous(&self, input: &Path, output: &Path) -> Result<()> {
        let population = self.load(input)?;
        let started = Instant::now();
        let remapper = self.remapper();

        let (people, person_update) = remapper.make_contiguous(&population.people, PID, 0)?;
        let (locations, location_update) = remapper.make_contiguous(&population.locations, LID, 0)?;
        let mut visits = remapper.propagate(&population.visits, PID, &person_update)?;
        visits = remapper.propagate(&visits, LID, &location_update)?;
        let people = if people.has_column(HID) {
            remapper.propagate(&people, HID, &location_update)?
        } else {
            people
        };
        visits.sort_by_columns(&[PID, START_TIME])?;
        log_stage!("contiguous", started);

        let population = Population::new(people, locations, visits);
        self.save(&population, output, &self.load_offsets(input)?)
    }

    /// Check a population directory, optionally against a baseline metrics file.
    pub fn validate(&self, dir: &Path, baseline: Option<&Path>) -> Result<ValidationReport> {
        let population = self.load(dir)?;
        let offsets = self.load_offsets(dir)?;
        let started = Instant::now();
        let validator = Validator::new(self.config.validator.clone(), self.config.join);

        let report = match baseline {
            Some(path) => {
                let baseline = crate::table::store::read_csv(path)?;
                let computed = self
                    .analyzer()
                    .annotate(&population.locations, &population.visits)?;
                validator.validate(&population, &offsets, Some((&computed, &baseline)))?
            }
            None => validator.validate(&population, &offsets, None)?,
        };
        let errors = report.errors().count();
        if errors > 0 {
            warn!(errors, "Validation found problems");
        }
        log_stage!("validate", started, findings = report.findings.len(), errors);
        Ok(report)
    }

    /// Partition `input` into `output`, then validate the result.
    pub fn run(&self, input: &Path, output: &Path) -> Result<(PartitionPlan, ValidationReport)> {
        let plan = self.partition(input, output)?;
        let report = self.validate(output, None)?;
        Ok((plan, report))
    }
}
