use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::{is_overdue, parse_natural_language};

pub type TaskId = u64;
pub type ProjectId = u64;

pub const DEFAULT_PROJECT_COLOR: &str = "#5B4AE4";

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Priority::Low),
            "normal" | "n" => Ok(Priority::Normal),
            "high" | "h" => Ok(Priority::High),
            "urgent" | "u" => Ok(Priority::Urgent),
            other => Err(anyhow!(
                "unknown priority: {other} (expected low, normal, high or urgent)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub project_id: Option<ProjectId>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub due: Option<DateTime<Utc>>,

    pub completed: bool,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub order: i64,
}

impl Task {
    /// Open task whose due day is already behind us.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due.map(|due| is_overdue(due, now)).unwrap_or(false)
    }

    /// Case-insensitive substring match on title or description.
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&needle))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub task_count: i64,
    #[serde(default)]
    pub archived: bool,
}

/// Fields a caller supplies when creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<ProjectId>,
    pub priority: Priority,
    pub due: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Builds a draft from quick-add text. The title is kept verbatim; only a
    /// due-date hint is extracted from it.
    pub fn quick_add(input: &str, now: DateTime<Utc>) -> Option<Self> {
        let title = input.trim();
        if title.is_empty() {
            return None;
        }

        Some(Self {
            title: title.to_string(),
            due: parse_natural_language(title, now),
            ..Self::default()
        })
    }
}

/// Partial update of a task. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub project_id: Option<Option<ProjectId>>,
    pub priority: Option<Priority>,
    pub due: Option<Option<DateTime<Utc>>>,
    pub completed: Option<bool>,
    pub order: Option<i64>,
}

impl TaskPatch {
    pub fn completion(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectDraft {
    pub name: String,
    pub color: Option<String>,
}

impl ProjectDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub order: Option<i64>,
    pub task_count: Option<i64>,
    pub archived: Option<bool>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
