//! In-memory snapshot of tasks and projects that views render from.
//!
//! The snapshot is loaded once, then patched locally after every successful
//! façade call instead of being re-fetched. A failed call leaves it as it was.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::error::StoreResult;
use crate::filter::{View, ViewCounts, select};
use crate::service::Services;
use crate::task::{
    Project, ProjectDraft, ProjectId, ProjectPatch, Task, TaskDraft, TaskId, TaskPatch,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    pub tasks: Vec<Task>,
    pub projects: Vec<Project>,
}

impl Board {
    /// Fetches tasks and projects concurrently; the board only exists once
    /// both have arrived.
    #[instrument(skip(services))]
    pub async fn load(services: &Services) -> StoreResult<Self> {
        let (tasks, projects) =
            tokio::try_join!(services.tasks.list(), services.projects.list())?;
        debug!(tasks = tasks.len(), projects = projects.len(), "board loaded");
        Ok(Self { tasks, projects })
    }

    pub fn view(&self, view: &View, now: DateTime<Utc>) -> Vec<&Task> {
        select(&self.tasks, view, now)
    }

    pub fn counts(&self, now: DateTime<Utc>) -> ViewCounts {
        ViewCounts::tally(&self.tasks, now)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Project shown for `task`. A reference to a project that no longer
    /// exists reads as no project.
    pub fn project_of(&self, task: &Task) -> Option<&Project> {
        task.project_id.and_then(|id| self.project(id))
    }

    /// Fills in what a view implies for a new task: Today defaults the due
    /// date to now, a project view defaults the project.
    pub fn draft_for_view(view: &View, mut draft: TaskDraft, now: DateTime<Utc>) -> TaskDraft {
        match view {
            View::Today if draft.due.is_none() => draft.due = Some(now),
            View::Project(id) if draft.project_id.is_none() => draft.project_id = Some(*id),
            _ => {}
        }
        draft
    }

    pub fn apply_created(&mut self, task: Task) {
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.insert(0, task);
    }

    pub fn apply_updated(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task,
            None => self.tasks.insert(0, task),
        }
    }

    pub fn apply_removed(&mut self, id: TaskId) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(idx))
    }

    pub fn apply_project_saved(&mut self, project: Project) {
        match self.projects.iter_mut().find(|p| p.id == project.id) {
            Some(slot) => *slot = project,
            None => self.projects.push(project),
        }
        self.projects
            .sort_by(|a, b| a.order.cmp(&b.order).then(a.id.cmp(&b.id)));
    }

    pub fn apply_project_removed(&mut self, id: ProjectId) -> Option<Project> {
        let idx = self.projects.iter().position(|p| p.id == id)?;
        Some(self.projects.remove(idx))
    }

    #[instrument(skip(self, services, draft))]
    pub async fn add_task(&mut self, services: &Services, draft: TaskDraft) -> StoreResult<Task> {
        let task = services.tasks.create(draft).await?;
        self.apply_created(task.clone());
        Ok(task)
    }

    #[instrument(skip(self, services, patch))]
    pub async fn update_task(
        &mut self,
        services: &Services,
        id: TaskId,
        patch: TaskPatch,
    ) -> StoreResult<Task> {
        let task = services.tasks.update(id, patch).await?;
        self.apply_updated(task.clone());
        Ok(task)
    }

    /// Flips completion of `id`, reading the current state from the board
    /// when it is there.
    #[instrument(skip(self, services))]
    pub async fn toggle_complete(&mut self, services: &Services, id: TaskId) -> StoreResult<Task> {
        let completed = match self.task(id) {
            Some(task) => task.completed,
            None => services.tasks.get(id).await?.completed,
        };
        self.update_task(services, id, TaskPatch::completion(!completed))
            .await
    }

    #[instrument(skip(self, services))]
    pub async fn remove_task(&mut self, services: &Services, id: TaskId) -> StoreResult<bool> {
        let deleted = services.tasks.delete(id).await?;
        self.apply_removed(id);
        Ok(deleted)
    }

    #[instrument(skip(self, services, draft))]
    pub async fn add_project(
        &mut self,
        services: &Services,
        draft: ProjectDraft,
    ) -> StoreResult<Project> {
        let project = services.projects.create(draft).await?;
        self.apply_project_saved(project.clone());
        Ok(project)
    }

    #[instrument(skip(self, services, patch))]
    pub async fn update_project(
        &mut self,
        services: &Services,
        id: ProjectId,
        patch: ProjectPatch,
    ) -> StoreResult<Project> {
        let project = services.projects.update(id, patch).await?;
        self.apply_project_saved(project.clone());
        Ok(project)
    }

    #[instrument(skip(self, services))]
    pub async fn remove_project(&mut self, services: &Services, id: ProjectId) -> StoreResult<bool> {
        let deleted = services.projects.delete(id).await?;
        self.apply_project_removed(id);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::Board;
    use crate::clock::FixedClock;
    use crate::filter::View;
    use crate::service::Services;
    use crate::store::Stores;
    use crate::task::{ProjectDraft, TaskDraft, TaskPatch};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap()
    }

    fn services(latency: Duration) -> Services {
        Services::new(Stores::in_memory(latency), Arc::new(FixedClock::new(now())))
    }

    #[tokio::test(start_paused = true)]
    async fn load_fetches_both_collections_concurrently() {
        let services = services(Duration::from_millis(250));
        let started = tokio::time::Instant::now();
        let board = Board::load(&services).await.unwrap();

        assert!(board.tasks.is_empty());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn mutations_patch_the_board_locally() {
        let services = services(Duration::ZERO);
        let mut board = Board::load(&services).await.unwrap();

        let home = board
            .add_project(&services, ProjectDraft::new("Home"))
            .await
            .unwrap();
        let draft = Board::draft_for_view(&View::Project(home.id), TaskDraft::new("Fix tap"), now());
        let task = board.add_task(&services, draft).await.unwrap();

        assert_eq!(board.view(&View::Project(home.id), now()).len(), 1);
        assert_eq!(board.project_of(&task).map(|p| p.name.as_str()), Some("Home"));

        let done = board.toggle_complete(&services, task.id).await.unwrap();
        assert!(done.completed);
        assert!(board.view(&View::Project(home.id), now()).is_empty());
        assert_eq!(board.counts(now()).archive, 1);

        board.remove_task(&services, task.id).await.unwrap();
        assert!(board.tasks.is_empty());
        assert_eq!(board, Board::load(&services).await.unwrap());
    }

    #[tokio::test]
    async fn failed_calls_leave_board_untouched() {
        let services = services(Duration::ZERO);
        let mut board = Board::load(&services).await.unwrap();
        board.add_task(&services, TaskDraft::new("keep me")).await.unwrap();
        let before = board.clone();

        assert!(board.add_task(&services, TaskDraft::new(" ")).await.is_err());
        assert!(
            board
                .update_task(&services, 99, TaskPatch::completion(true))
                .await
                .is_err()
        );
        assert!(board.remove_task(&services, 99).await.is_err());
        assert_eq!(board, before);
    }

    #[tokio::test]
    async fn deleted_project_leaves_tasks_projectless_for_display() {
        let services = services(Duration::ZERO);
        let mut board = Board::load(&services).await.unwrap();
        let work = board
            .add_project(&services, ProjectDraft::new("Work"))
            .await
            .unwrap();
        let mut draft = TaskDraft::new("Expense report");
        draft.project_id = Some(work.id);
        let task = board.add_task(&services, draft).await.unwrap();

        board.remove_project(&services, work.id).await.unwrap();

        let kept = board.task(task.id).unwrap();
        assert_eq!(kept.project_id, Some(work.id));
        assert!(board.project_of(kept).is_none());
    }

    #[test]
    fn today_view_defaults_due_to_now() {
        let draft = Board::draft_for_view(&View::Today, TaskDraft::new("call mom"), now());
        assert_eq!(draft.due, Some(now()));

        let draft = Board::draft_for_view(&View::Inbox, TaskDraft::new("call mom"), now());
        assert_eq!(draft.due, None);
    }
}
