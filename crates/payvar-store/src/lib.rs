use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use payvar_core::{ColumnMapping, Record};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSnapshot {
    pub period: String,
    /// In first-ingest order of each employee for this period.
    pub records: Vec<Arc<Record>>,
    pub detected_columns: ColumnMapping,
}

impl PeriodSnapshot {
    pub fn get(&self, entity_id: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|record| record.entity_id() == entity_id)
            .map(Arc::as_ref)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestStats {
    pub stored: usize,
    pub replaced: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to lock payroll store: {0}")]
    LockPoisoned(String),
}

/// Process-lifetime payroll data keyed by employee and period. Writes
/// replace whole (employee, period) slots; the last writer wins.
pub trait PayrollStore: Send + Sync {
    fn put_snapshot(
        &self,
        period: &str,
        records: Vec<Record>,
        detected_columns: ColumnMapping,
    ) -> Result<IngestStats, StoreError>;

    fn record(&self, entity_id: &str, period: &str) -> Result<Option<Arc<Record>>, StoreError>;

    fn snapshot(&self, period: &str) -> Result<Option<PeriodSnapshot>, StoreError>;

    fn periods(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Default)]
struct PeriodIndex {
    entity_order: Vec<String>,
    detected_columns: ColumnMapping,
}

#[derive(Debug, Default)]
struct MemoryState {
    // entity_id -> period -> record
    records: HashMap<String, HashMap<String, Arc<Record>>>,
    periods: Vec<(String, PeriodIndex)>,
}

impl MemoryState {
    fn period_index_mut(&mut self, period: &str) -> &mut PeriodIndex {
        let position = match self.periods.iter().position(|(name, _)| name == period) {
            Some(position) => position,
            None => {
                self.periods.push((period.to_owned(), PeriodIndex::default()));
                self.periods.len() - 1
            }
        };
        &mut self.periods[position].1
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayrollStore for MemoryStore {
    fn put_snapshot(
        &self,
        period: &str,
        records: Vec<Record>,
        detected_columns: ColumnMapping,
    ) -> Result<IngestStats, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))?;

        let mut stats = IngestStats::default();
        let mut new_entities = Vec::new();
        for record in records {
            let entity_id = record.entity_id().to_owned();
            let slots = state.records.entry(entity_id.clone()).or_default();
            match slots.insert(period.to_owned(), Arc::new(record)) {
                Some(_) => stats.replaced += 1,
                None => new_entities.push(entity_id),
            }
            stats.stored += 1;
        }

        let index = state.period_index_mut(period);
        index.entity_order.extend(new_entities);
        index.detected_columns = detected_columns;

        tracing::debug!(
            period,
            stored = stats.stored,
            replaced = stats.replaced,
            "stored payroll snapshot"
        );
        Ok(stats)
    }

    fn record(&self, entity_id: &str, period: &str) -> Result<Option<Arc<Record>>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))?;

        Ok(state
            .records
            .get(entity_id)
            .and_then(|slots| slots.get(period))
            .cloned())
    }

    fn snapshot(&self, period: &str) -> Result<Option<PeriodSnapshot>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))?;

        let Some((_, index)) = state.periods.iter().find(|(name, _)| name == period) else {
            return Ok(None);
        };

        let records = index
            .entity_order
            .iter()
            .filter_map(|entity_id| {
                state
                    .records
                    .get(entity_id)
                    .and_then(|slots| slots.get(period))
                    .cloned()
            })
            .collect();

        Ok(Some(PeriodSnapshot {
            period: period.to_owned(),
            records,
            detected_columns: index.detected_columns.clone(),
        }))
    }

    fn periods(&self) -> Result<Vec<String>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))?;

        Ok(state.periods.iter().map(|(name, _)| name.clone()).collect())
    }
}
