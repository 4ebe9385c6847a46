//! Record shapes as the record store sees them.
//!
//! Field names follow the store's schema (`Id`, `Name`, snake_case
//! columns). Nothing outside the store adapter should need these types.

use serde::{
  Deserialize,
  Serialize
};

/// Tag that marks a task record as
/// completed.
pub const COMPLETED_TAG: &str =
  "completed";

/// Storage encoding of the `completed`
/// flag.
///
/// The store models it as tag-set
/// membership, but older rows carry a
/// plain string or boolean.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(untagged)]
pub enum CompletedTags {
  Flag(bool),
  Tags(Vec<String>),
  Text(String),
  Missing
}

impl Default for CompletedTags {
  fn default() -> Self {
    Self::Text(String::new())
  }
}

impl CompletedTags {
  #[must_use]
  pub fn from_flag(
    completed: bool
  ) -> Self {
    if completed {
      Self::Text(
        COMPLETED_TAG.to_string()
      )
    } else {
      Self::Text(String::new())
    }
  }

  #[must_use]
  pub fn is_completed(&self) -> bool {
    match self {
      | Self::Flag(flag) => *flag,
      | Self::Tags(tags) => {
        tags
          .iter()
          .any(|tag| tag == COMPLETED_TAG)
      }
      | Self::Text(text) => {
        !text.trim().is_empty()
      }
      | Self::Missing => false
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskRecord {
  #[serde(rename = "Id", default)]
  pub id:           u64,
  #[serde(default)]
  pub title:        String,
  #[serde(default)]
  pub description:  Option<String>,
  #[serde(default)]
  pub project_id:   Option<u64>,
  #[serde(default)]
  pub priority:     Option<String>,
  #[serde(default)]
  pub due_date:     Option<String>,
  #[serde(default)]
  pub completed:    CompletedTags,
  #[serde(default)]
  pub completed_at: Option<String>,
  #[serde(default)]
  pub created_at:   Option<String>,
  #[serde(default)]
  pub order:        i64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct ProjectRecord {
  #[serde(rename = "Id", default)]
  pub id:          u64,
  #[serde(rename = "Name", default)]
  pub name:        String,
  #[serde(default)]
  pub color:       Option<String>,
  #[serde(default)]
  pub order:       i64,
  #[serde(default)]
  pub task_count:  i64,
  #[serde(default)]
  pub is_archived: bool
}
