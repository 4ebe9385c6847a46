//! Record-store adapters.
//!
//! A [`Collection`] is a generic CRUD surface over plain records keyed by an
//! auto-increment id. Two backends exist: [`MemoryCollection`] for tests and
//! demos, and [`JsonlCollection`] which keeps one JSON record per line on
//! disk.

mod jsonl;
mod memory;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tasklane_records::{ProjectRecord, TaskRecord};
use tracing::info;

use crate::error::{StoreError, StoreResult};

pub use jsonl::JsonlCollection;
pub use memory::MemoryCollection;

const PRIORITY_VALUES: [&str; 4] = ["low", "normal", "high", "urgent"];

/// Wire fields sent with an update, keyed by store column name.
pub type Fields = Map<String, Value>;

pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    /// Store-side write checks. An `Err` is reported as a validation failure.
    fn validate(&self) -> Result<(), String>;
}

impl Record for TaskRecord {
    const ENTITY: &'static str = "task";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("task title is required".to_string());
        }
        if let Some(priority) = self.priority.as_deref()
            && !PRIORITY_VALUES.contains(&priority)
        {
            return Err(format!("invalid priority: {priority}"));
        }
        Ok(())
    }
}

impl Record for ProjectRecord {
    const ENTITY: &'static str = "project";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("project name is required".to_string());
        }
        if let Some(color) = self.color.as_deref()
            && !is_hex_color(color)
        {
            return Err(format!("invalid color: {color} (expected #RRGGBB)"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Collection<R: Record>: Send + Sync {
    async fn fetch_all(&self) -> StoreResult<Vec<R>>;

    async fn get(&self, id: u64) -> StoreResult<R>;

    /// Stores `record` under a freshly assigned id and returns it.
    async fn create(&self, record: R) -> StoreResult<R>;

    /// Merges `fields` into the stored record.
    async fn update(&self, id: u64, fields: Fields) -> StoreResult<R>;

    async fn delete(&self, id: u64) -> StoreResult<bool>;
}

/// Overlays wire `fields` on `current`, keeping its id, and re-validates.
pub(crate) fn merge_fields<R: Record>(current: &R, fields: Fields) -> StoreResult<R> {
    let Value::Object(mut merged) = serde_json::to_value(current).map_err(StoreError::transport)?
    else {
        return Err(StoreError::Transport(format!(
            "{} record did not serialize to an object",
            R::ENTITY
        )));
    };

    for (key, value) in fields {
        if key == "Id" {
            continue;
        }
        merged.insert(key, value);
    }

    let mut record: R = serde_json::from_value(Value::Object(merged))
        .map_err(|e| StoreError::Validation(format!("{}: {e}", R::ENTITY)))?;
    record.set_id(current.id());
    record.validate().map_err(StoreError::Validation)?;
    Ok(record)
}

fn is_hex_color(raw: &str) -> bool {
    raw.strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    File,
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "jsonl" => Ok(Backend::File),
            "memory" | "mem" => Ok(Backend::Memory),
            other => Err(anyhow!("unknown store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub latency: Duration,
}

/// Both entity collections, opened from one set of settings.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn Collection<TaskRecord>>,
    pub projects: Arc<dyn Collection<ProjectRecord>>,
}

impl Stores {
    #[tracing::instrument(skip(settings), fields(backend = ?settings.backend))]
    pub fn open(settings: &StoreSettings) -> anyhow::Result<Self> {
        let stores = match settings.backend {
            Backend::Memory => Self::in_memory(settings.latency),
            Backend::File => Self {
                tasks: Arc::new(JsonlCollection::<TaskRecord>::open(&settings.data_dir, "tasks")?),
                projects: Arc::new(JsonlCollection::<ProjectRecord>::open(
                    &settings.data_dir,
                    "projects",
                )?),
            },
        };

        info!(
            data_dir = %settings.data_dir.display(),
            latency = ?settings.latency,
            "opened record stores"
        );
        Ok(stores)
    }

    pub fn in_memory(latency: Duration) -> Self {
        Self {
            tasks: Arc::new(MemoryCollection::<TaskRecord>::new().with_latency(latency)),
            projects: Arc::new(MemoryCollection::<ProjectRecord>::new().with_latency(latency)),
        }
    }
}
