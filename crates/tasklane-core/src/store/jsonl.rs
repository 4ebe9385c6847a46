use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{Collection, Fields, Record, merge_fields};
use crate::error::{StoreError, StoreResult};

/// File-backed collection: `<name>.data` holds one JSON record per line and
/// `<name>.seq` the last id handed out, so ids survive deletes and restarts.
#[derive(Debug)]
pub struct JsonlCollection<R> {
    pub data_path: PathBuf,
    pub seq_path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> JsonlCollection<R> {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, name: &str) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let data_path = data_dir.join(format!("{name}.data"));
        let seq_path = data_dir.join(format!("{name}.seq"));

        if !data_path.exists() {
            fs::write(&data_path, "")?;
        }
        if !seq_path.exists() {
            fs::write(&seq_path, "0")?;
        }

        info!(
            entity = R::ENTITY,
            data = %data_path.display(),
            seq = %seq_path.display(),
            "opened jsonl collection"
        );

        Ok(Self {
            data_path,
            seq_path,
            _record: PhantomData,
        })
    }

    fn load(&self) -> StoreResult<Vec<R>> {
        load_jsonl(&self.data_path).map_err(StoreError::transport)
    }

    fn save(&self, records: &[R]) -> StoreResult<()> {
        save_jsonl_atomic(&self.data_path, records).map_err(StoreError::transport)
    }

    fn next_id(&self, records: &[R]) -> StoreResult<u64> {
        let raw = fs::read_to_string(&self.seq_path)
            .with_context(|| format!("failed reading {}", self.seq_path.display()))
            .map_err(StoreError::transport)?;
        let last: u64 = if raw.trim().is_empty() {
            0
        } else {
            raw.trim()
                .parse()
                .with_context(|| format!("corrupt id sequence in {}", self.seq_path.display()))
                .map_err(StoreError::transport)?
        };

        let highest = records.iter().map(Record::id).max().unwrap_or(0);
        let next = last.max(highest).checked_add(1).ok_or_else(|| {
            StoreError::Transport(format!(
                "id sequence exhausted in {}",
                self.seq_path.display()
            ))
        })?;

        fs::write(&self.seq_path, next.to_string())
            .with_context(|| format!("failed writing {}", self.seq_path.display()))
            .map_err(StoreError::transport)?;
        Ok(next)
    }
}

#[async_trait]
impl<R: Record> Collection<R> for JsonlCollection<R> {
    #[tracing::instrument(skip(self), fields(entity = R::ENTITY))]
    async fn fetch_all(&self) -> StoreResult<Vec<R>> {
        self.load()
    }

    #[tracing::instrument(skip(self), fields(entity = R::ENTITY))]
    async fn get(&self, id: u64) -> StoreResult<R> {
        self.load()?
            .into_iter()
            .find(|record| record.id() == id)
            .ok_or_else(|| StoreError::not_found(R::ENTITY, id))
    }

    #[tracing::instrument(skip(self, record), fields(entity = R::ENTITY))]
    async fn create(&self, mut record: R) -> StoreResult<R> {
        record.validate().map_err(StoreError::Validation)?;

        let mut records = self.load()?;
        let id = self.next_id(&records)?;
        record.set_id(id);
        records.push(record.clone());
        self.save(&records)?;

        debug!(id, count = records.len(), "record appended");
        Ok(record)
    }

    #[tracing::instrument(skip(self, fields), fields(entity = R::ENTITY))]
    async fn update(&self, id: u64, fields: Fields) -> StoreResult<R> {
        let mut records = self.load()?;
        let slot = records
            .iter_mut()
            .find(|record| record.id() == id)
            .ok_or_else(|| StoreError::not_found(R::ENTITY, id))?;

        let merged = merge_fields(slot, fields)?;
        *slot = merged.clone();
        self.save(&records)?;
        Ok(merged)
    }

    #[tracing::instrument(skip(self), fields(entity = R::ENTITY))]
    async fn delete(&self, id: u64) -> StoreResult<bool> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|record| record.id() != id);
        if records.len() == before {
            return Err(StoreError::not_found(R::ENTITY, id));
        }

        self.save(&records)?;
        info!(id, remaining = records.len(), "record deleted");
        Ok(true)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<R: Record>(path: &Path) -> anyhow::Result<Vec<R>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: R = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<R: Record>(path: &Path, records: &[R]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tasklane_records::{CompletedTags, TaskRecord};
    use tempfile::tempdir;

    use super::JsonlCollection;
    use crate::error::StoreError;
    use crate::store::Collection;

    fn record(title: &str) -> TaskRecord {
        TaskRecord {
            id: 0,
            title: title.to_string(),
            description: None,
            project_id: None,
            priority: Some("normal".to_string()),
            due_date: None,
            completed: CompletedTags::from_flag(false),
            completed_at: None,
            created_at: Some("2026-02-16T09:00:00.000Z".to_string()),
            order: 0,
        }
    }

    #[tokio::test]
    async fn ids_survive_reopen_after_delete() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlCollection::<TaskRecord>::open(temp.path(), "tasks").expect("open");
        let first = store.create(record("one")).await.expect("create");
        let second = store.create(record("two")).await.expect("create");
        store.delete(second.id).await.expect("delete");

        let reopened = JsonlCollection::<TaskRecord>::open(temp.path(), "tasks").expect("reopen");
        let third = reopened.create(record("three")).await.expect("create");

        assert_eq!(first.id, 1);
        assert_eq!(third.id, 3);
        assert_eq!(reopened.fetch_all().await.expect("fetch").len(), 2);
    }

    #[tokio::test]
    async fn corrupt_lines_are_transport_failures() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlCollection::<TaskRecord>::open(temp.path(), "tasks").expect("open");
        fs::write(&store.data_path, "{not json}\n").expect("write");

        let err = store.fetch_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[tokio::test]
    async fn exhausted_sequence_is_a_transport_failure() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlCollection::<TaskRecord>::open(temp.path(), "tasks").expect("open");
        fs::write(&store.seq_path, u64::MAX.to_string()).expect("write seq");

        let err = store.create(record("one")).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
        assert!(store.fetch_all().await.expect("fetch").is_empty());
        assert_eq!(
            fs::read_to_string(&store.seq_path).expect("read seq"),
            u64::MAX.to_string()
        );
    }

    #[tokio::test]
    async fn rejected_create_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlCollection::<TaskRecord>::open(temp.path(), "tasks").expect("open");

        let err = store.create(record("   ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.fetch_all().await.expect("fetch").is_empty());
    }
}
