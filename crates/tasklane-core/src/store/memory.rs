use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{Collection, Fields, Record, merge_fields};
use crate::error::{StoreError, StoreResult};

#[derive(Debug)]
struct Table<R> {
    rows: BTreeMap<u64, R>,
    last_id: u64,
}

/// In-process collection. Every operation first waits `latency`, which
/// defaults to zero.
#[derive(Debug)]
pub struct MemoryCollection<R> {
    table: Mutex<Table<R>>,
    latency: Duration,
}

impl<R: Record> Default for MemoryCollection<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> MemoryCollection<R> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                rows: BTreeMap::new(),
                last_id: 0,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Starts from existing records, keeping their ids.
    pub fn seeded(records: impl IntoIterator<Item = R>) -> Self {
        let rows: BTreeMap<u64, R> = records.into_iter().map(|r| (r.id(), r)).collect();
        let last_id = rows.keys().next_back().copied().unwrap_or(0);
        Self {
            table: Mutex::new(Table { rows, last_id }),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl<R: Record> Collection<R> for MemoryCollection<R> {
    async fn fetch_all(&self) -> StoreResult<Vec<R>> {
        self.simulate_latency().await;
        let table = self.table.lock();
        Ok(table.rows.values().cloned().collect())
    }

    async fn get(&self, id: u64) -> StoreResult<R> {
        self.simulate_latency().await;
        let table = self.table.lock();
        table
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(R::ENTITY, id))
    }

    async fn create(&self, mut record: R) -> StoreResult<R> {
        self.simulate_latency().await;
        record.validate().map_err(StoreError::Validation)?;

        let mut table = self.table.lock();
        table.last_id += 1;
        let id = table.last_id;
        record.set_id(id);
        table.rows.insert(id, record.clone());

        debug!(entity = R::ENTITY, id, "memory record created");
        Ok(record)
    }

    async fn update(&self, id: u64, fields: Fields) -> StoreResult<R> {
        self.simulate_latency().await;
        let mut table = self.table.lock();
        let current = table
            .rows
            .get(&id)
            .ok_or_else(|| StoreError::not_found(R::ENTITY, id))?;

        let merged = merge_fields(current, fields)?;
        table.rows.insert(id, merged.clone());

        debug!(entity = R::ENTITY, id, "memory record updated");
        Ok(merged)
    }

    async fn delete(&self, id: u64) -> StoreResult<bool> {
        self.simulate_latency().await;
        let mut table = self.table.lock();
        table
            .rows
            .remove(&id)
            .map(|_| true)
            .ok_or_else(|| StoreError::not_found(R::ENTITY, id))
    }
}
