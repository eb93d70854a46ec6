//! The three linked tables a pipeline run operates on.

use crate::config::FileNames;
use crate::error::{Error, Result};
use crate::table::{Table, TableMetadata, TableStore, Value};

pub const PID: &str = "pid";
pub const LID: &str = "lid";
/// Optional home-location reference on the People table.
pub const HID: &str = "hid";
pub const START_TIME: &str = "start_time";
pub const DURATION: &str = "duration";
pub const END_TIME: &str = "end_time";

#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    pub people: Table,
    pub locations: Table,
    pub visits: Table,
}

/// Partition offsets to record in the metadata of each table, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationOffsets {
    pub people: Option<Vec<usize>>,
    pub locations: Option<Vec<usize>>,
}

impl Population {
    pub fn new(people: Table, locations: Table, visits: Table) -> Self {
        Self {
            people,
            locations,
            visits,
        }
    }

    pub fn load(store: &TableStore, files: &FileNames) -> Result<Self> {
        let people = store.read(&files.people)?.with_name("people");
        let locations = store.read(&files.locations)?.with_name("locations");
        let visits = store.read(&files.visits)?.with_name("visits");
        // required columns
        for col in [PID, LID, START_TIME, DURATION] {
            visits.column_index(col)?;
        }
        people.column_index(PID)?;
        locations.column_index(LID)?;
        let mut population = Self::new(people, locations, visits);
        population.refresh_end_time()?;
        Ok(population)
    }

    /// Recompute a stored `end_time` column from `start_time + duration`.
    pub fn refresh_end_time(&mut self) -> Result<()> {
        if !self.visits.has_column(END_TIME) {
            return Ok(());
        }
        let start = self.visits.int_column(START_TIME)?;
        let duration = self.visits.int_column(DURATION)?;
        let end = start
            .iter()
            .zip(&duration)
            .enumerate()
            .map(|(row, (&s, &d))| {
                s.checked_add(d).map(Value::Int).ok_or_else(|| {
                    Error::domain(format!("visit row {}: start_time + duration overflows ({}, {})", row, s, d))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.visits.set_column(END_TIME, end)
    }

    /// Write all three tables plus their metadata artifacts.
    pub fn save(&self, store: &TableStore, files: &FileNames, offsets: &PopulationOffsets) -> Result<()> {
        store.write(&self.people, &files.people)?;
        store.write(&self.locations, &files.locations)?;
        store.write(&self.visits, &files.visits)?;

        let people_foreign: &[&str] = if self.people.has_column(HID) { &[HID] } else { &[] };
        let mut people_meta = TableMetadata::describe(&self.people, Some(PID), people_foreign);
        if let Some(o) = &offsets.people {
            people_meta = people_meta.with_offsets(o.clone());
        }
        let mut locations_meta = TableMetadata::describe(&self.locations, Some(LID), &[]);
        if let Some(o) = &offsets.locations {
            locations_meta = locations_meta.with_offsets(o.clone());
        }
        let visits_meta = TableMetadata::describe(&self.visits, None, &[PID, LID]);

        store.write_metadata(&files.people, &people_meta)?;
        store.write_metadata(&files.locations, &locations_meta)?;
        store.write_metadata(&files.visits, &visits_meta)?;
        Ok(())
    }
}
