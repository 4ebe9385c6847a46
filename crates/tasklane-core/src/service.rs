//! CRUD façade over the record stores.
//!
//! Translates between the store's record shape and the entity model: the
//! tag-set `completed` column becomes a plain bool, due dates travel as
//! calendar-day strings and timestamps as RFC 3339.

use std::sync::Arc;

use serde_json::{Value, json};
use tasklane_records::{CompletedTags, ProjectRecord, TaskRecord};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::datetime::{format_calendar_day, format_timestamp, parse_calendar_day, parse_timestamp};
use crate::error::{StoreError, StoreResult};
use crate::store::{Collection, Fields, Stores};
use crate::task::{
    DEFAULT_PROJECT_COLOR, Priority, Project, ProjectDraft, ProjectId, ProjectPatch, Task,
    TaskDraft, TaskId, TaskPatch,
};

/// Task and project façades over one set of stores.
#[derive(Clone)]
pub struct Services {
    pub tasks: TaskService,
    pub projects: ProjectService,
}

impl Services {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: TaskService::new(stores.tasks, clock),
            projects: ProjectService::new(stores.projects),
        }
    }
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn Collection<TaskRecord>>,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(store: Arc<dyn Collection<TaskRecord>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// All tasks, newest first.
    #[instrument(skip(self))]
    pub async fn list(&self) -> StoreResult<Vec<Task>> {
        let records = self
            .store
            .fetch_all()
            .await
            .inspect_err(|err| error!(error = %err, "failed fetching tasks"))?;

        let mut tasks = records
            .into_iter()
            .map(task_from_record)
            .collect::<StoreResult<Vec<_>>>()?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        debug!(count = tasks.len(), "tasks listed");
        Ok(tasks)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: TaskId) -> StoreResult<Task> {
        let record = self
            .store
            .get(id)
            .await
            .inspect_err(|err| error!(error = %err, "failed fetching task"))?;
        task_from_record(record)
    }

    #[instrument(skip(self, draft), fields(title_len = draft.title.len(), has_due = draft.due.is_some()))]
    pub async fn create(&self, draft: TaskDraft) -> StoreResult<Task> {
        let now = self.clock.now();
        let record = TaskRecord {
            id: 0,
            title: draft.title,
            description: Some(draft.description.unwrap_or_default()),
            project_id: draft.project_id,
            priority: Some(draft.priority.as_str().to_string()),
            due_date: draft.due.map(format_calendar_day),
            completed: CompletedTags::from_flag(false),
            completed_at: None,
            created_at: Some(format_timestamp(now)),
            order: 0,
        };

        let created = self
            .store
            .create(record)
            .await
            .inspect_err(|err| error!(error = %err, "failed creating task"))?;

        info!(id = created.id, "task created");
        task_from_record(created)
    }

    /// Applies `patch` on top of the stored task. Completing a task stamps
    /// `completed_at`; reopening it clears the stamp.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> StoreResult<Task> {
        let current = self.get(id).await?;
        let fields = task_patch_fields(&current, &patch, self.clock.now());
        if fields.is_empty() {
            debug!("empty task patch; nothing sent");
            return Ok(current);
        }

        let updated = self
            .store
            .update(id, fields)
            .await
            .inspect_err(|err| error!(error = %err, "failed updating task"))?;

        info!(id, "task updated");
        task_from_record(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: TaskId) -> StoreResult<bool> {
        let deleted = self
            .store
            .delete(id)
            .await
            .inspect_err(|err| error!(error = %err, "failed deleting task"))?;
        info!(id, "task deleted");
        Ok(deleted)
    }
}

#[derive(Clone)]
pub struct ProjectService {
    store: Arc<dyn Collection<ProjectRecord>>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn Collection<ProjectRecord>>) -> Self {
        Self { store }
    }

    /// All projects by display order.
    #[instrument(skip(self))]
    pub async fn list(&self) -> StoreResult<Vec<Project>> {
        let records = self
            .store
            .fetch_all()
            .await
            .inspect_err(|err| error!(error = %err, "failed fetching projects"))?;

        let mut projects: Vec<Project> = records.into_iter().map(project_from_record).collect();
        projects.sort_by(|a, b| a.order.cmp(&b.order).then(a.id.cmp(&b.id)));
        Ok(projects)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: ProjectId) -> StoreResult<Project> {
        let record = self
            .store
            .get(id)
            .await
            .inspect_err(|err| error!(error = %err, "failed fetching project"))?;
        Ok(project_from_record(record))
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create(&self, draft: ProjectDraft) -> StoreResult<Project> {
        let record = ProjectRecord {
            id: 0,
            name: draft.name,
            color: Some(draft.color.unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string())),
            order: 0,
            task_count: 0,
            is_archived: false,
        };

        let created = self
            .store
            .create(record)
            .await
            .inspect_err(|err| error!(error = %err, "failed creating project"))?;

        info!(id = created.id, "project created");
        Ok(project_from_record(created))
    }

    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: ProjectId, patch: ProjectPatch) -> StoreResult<Project> {
        let fields = project_patch_fields(&patch);
        if fields.is_empty() {
            return self.get(id).await;
        }

        let updated = self
            .store
            .update(id, fields)
            .await
            .inspect_err(|err| error!(error = %err, "failed updating project"))?;

        info!(id, "project updated");
        Ok(project_from_record(updated))
    }

    /// Removes the project only; tasks pointing at it keep their reference.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: ProjectId) -> StoreResult<bool> {
        let deleted = self
            .store
            .delete(id)
            .await
            .inspect_err(|err| error!(error = %err, "failed deleting project"))?;
        info!(id, "project deleted");
        Ok(deleted)
    }
}

fn task_from_record(record: TaskRecord) -> StoreResult<Task> {
    let id = record.id;
    let malformed = |what: &str, err: anyhow::Error| {
        StoreError::Transport(format!("task {id} has malformed {what}: {err:#}"))
    };

    let priority = match record.priority.as_deref().map(str::trim) {
        Some("") | None => Priority::default(),
        Some(raw) => raw.parse::<Priority>().map_err(|e| malformed("priority", e))?,
    };

    let due = non_empty(record.due_date)
        .map(|raw| parse_calendar_day(&raw))
        .transpose()
        .map_err(|e| malformed("due_date", e))?;

    let created_at = non_empty(record.created_at)
        .ok_or_else(|| StoreError::Transport(format!("task {id} has no created_at")))
        .and_then(|raw| parse_timestamp(&raw).map_err(|e| malformed("created_at", e)))?;

    let completed = record.completed.is_completed();
    let completed_at = non_empty(record.completed_at)
        .map(|raw| parse_timestamp(&raw))
        .transpose()
        .map_err(|e| malformed("completed_at", e))?;

    let completed_at = match (completed, completed_at) {
        (false, _) => None,
        (true, Some(at)) => Some(at),
        (true, None) => {
            warn!(id, "completed task without completed_at; using created_at");
            Some(created_at)
        }
    };

    Ok(Task {
        id,
        title: record.title,
        description: non_empty(record.description),
        project_id: record.project_id,
        priority,
        due,
        completed,
        completed_at,
        created_at,
        order: record.order,
    })
}

fn task_patch_fields(
    current: &Task,
    patch: &TaskPatch,
    now: chrono::DateTime<chrono::Utc>,
) -> Fields {
    let mut fields = Fields::new();

    if let Some(title) = &patch.title {
        fields.insert("title".into(), json!(title));
    }
    if let Some(description) = &patch.description {
        fields.insert("description".into(), json!(description));
    }
    if let Some(project_id) = patch.project_id {
        fields.insert("project_id".into(), json!(project_id));
    }
    if let Some(priority) = patch.priority {
        fields.insert("priority".into(), json!(priority.as_str()));
    }
    if let Some(due) = patch.due {
        fields.insert("due_date".into(), json!(due.map(format_calendar_day)));
    }
    if let Some(completed) = patch.completed {
        fields.insert("completed".into(), json!(CompletedTags::from_flag(completed)));
        if completed && !current.completed {
            fields.insert("completed_at".into(), json!(format_timestamp(now)));
        } else if !completed && current.completed {
            fields.insert("completed_at".into(), Value::Null);
        }
    }
    if let Some(order) = patch.order {
        fields.insert("order".into(), json!(order));
    }

    fields
}

fn project_from_record(record: ProjectRecord) -> Project {
    Project {
        id: record.id,
        name: record.name,
        color: non_empty(record.color).unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string()),
        order: record.order,
        task_count: record.task_count,
        archived: record.is_archived,
    }
}

fn project_patch_fields(patch: &ProjectPatch) -> Fields {
    let mut fields = Fields::new();

    if let Some(name) = &patch.name {
        fields.insert("Name".into(), json!(name));
    }
    if let Some(color) = &patch.color {
        fields.insert("color".into(), json!(color));
    }
    if let Some(order) = patch.order {
        fields.insert("order".into(), json!(order));
    }
    if let Some(task_count) = patch.task_count {
        fields.insert("task_count".into(), json!(task_count));
    }
    if let Some(archived) = patch.archived {
        fields.insert("is_archived".into(), json!(archived));
    }

    fields
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
