use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};
use serde::Serialize;
use tracing::trace;

use crate::datetime::{
  is_upcoming,
  to_project_date
};
use crate::task::{
  ProjectId,
  Task
};

/// Named subset of tasks shown on one
/// screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
  Inbox,
  Today,
  Upcoming,
  Project(ProjectId),
  Archive {
    query: Option<String>
  }
}

impl View {
  pub fn archive(
    query: impl Into<String>
  ) -> Self {
    let query = query.into();
    let trimmed = query.trim();
    Self::Archive {
      query: (!trimmed.is_empty())
        .then(|| trimmed.to_string())
    }
  }

  /// Whether `task` belongs to this
  /// view at `now`. Absent fields never
  /// match.
  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    let ok = match self {
      | View::Inbox => {
        task.project_id.is_none()
          && !task.completed
      }
      | View::Today => {
        let today = to_project_date(now);
        !task.completed
          && task.due.is_some_and(|due| {
            to_project_date(due) == today
              || due < now
          })
      }
      | View::Upcoming => {
        !task.completed
          && task.due.is_some_and(|due| {
            is_upcoming(due, now)
          })
      }
      | View::Project(project_id) => {
        task.project_id
          == Some(*project_id)
          && !task.completed
      }
      | View::Archive {
        query
      } => {
        task.completed
          && query
            .as_deref()
            .map(|q| task.mentions(q))
            .unwrap_or(true)
      }
    };

    trace!(view = %self, id = task.id, ok, "view evaluation");
    ok
  }
}

impl fmt::Display for View {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | View::Inbox => f.write_str("inbox"),
      | View::Today => f.write_str("today"),
      | View::Upcoming => {
        f.write_str("upcoming")
      }
      | View::Project(id) => {
        write!(f, "project:{id}")
      }
      | View::Archive {
        query: None
      } => f.write_str("archive"),
      | View::Archive {
        query: Some(q)
      } => write!(f, "archive:{q}")
    }
  }
}

impl FromStr for View {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let token = s.trim();
    let lower =
      token.to_ascii_lowercase();

    match lower.as_str() {
      | "inbox" => return Ok(View::Inbox),
      | "today" => return Ok(View::Today),
      | "upcoming" => {
        return Ok(View::Upcoming);
      }
      | "archive" => {
        return Ok(View::Archive {
          query: None
        });
      }
      | _ => {}
    }

    if let Some((key, rest)) =
      token.split_once(':')
    {
      match key
        .to_ascii_lowercase()
        .as_str()
      {
        | "project" => {
          let id =
            rest.trim().parse::<ProjectId>().map_err(
              |e| anyhow!("invalid project id {rest:?}: {e}")
            )?;
          return Ok(View::Project(id));
        }
        | "archive" => {
          return Ok(View::archive(rest));
        }
        | _ => {}
      }
    }

    Err(anyhow!(
      "unknown view: {token} (expected \
       inbox, today, upcoming, archive \
       or project:<id>)"
    ))
  }
}

/// Tasks of `tasks` that belong to
/// `view`, in their original order. The
/// input is never modified.
#[tracing::instrument(skip(tasks, now), fields(view = %view, total = tasks.len()))]
pub fn select<'a>(
  tasks: &'a [Task],
  view: &View,
  now: DateTime<Utc>
) -> Vec<&'a Task> {
  tasks
    .iter()
    .filter(|task| view.matches(task, now))
    .collect()
}

/// Per-view task counts for a sidebar.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct ViewCounts {
  pub inbox:    usize,
  pub today:    usize,
  pub upcoming: usize,
  pub archive:  usize,
  pub projects:
    BTreeMap<ProjectId, usize>
}

impl ViewCounts {
  pub fn tally(
    tasks: &[Task],
    now: DateTime<Utc>
  ) -> Self {
    let mut counts = Self::default();
    let archive = View::Archive {
      query: None
    };

    for task in tasks {
      if View::Inbox.matches(task, now) {
        counts.inbox += 1;
      }
      if View::Today.matches(task, now) {
        counts.today += 1;
      }
      if View::Upcoming.matches(task, now)
      {
        counts.upcoming += 1;
      }
      if archive.matches(task, now) {
        counts.archive += 1;
      }
      if let Some(project_id) =
        task.project_id
        && !task.completed
      {
        *counts
          .projects
          .entry(project_id)
          .or_default() += 1;
      }
    }

    counts
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Duration,
    TimeZone,
    Utc
  };

  use super::{
    View,
    ViewCounts,
    select
  };
  use crate::datetime::{
    is_upcoming,
    start_of_day
  };
  use crate::task::{
    Priority,
    Task
  };

  fn now() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 16, 12, 0, 0
      )
      .unwrap()
  }

  fn task(
    id: u64,
    title: &str
  ) -> Task {
    Task {
      id,
      title: title.to_string(),
      description: None,
      project_id: None,
      priority: Priority::Normal,
      due: None,
      completed: false,
      completed_at: None,
      created_at: now(),
      order: 0
    }
  }

  fn done(mut task: Task) -> Task {
    task.completed = true;
    task.completed_at = Some(now());
    task
  }

  #[test]
  fn overdue_surfaces_in_today_not_upcoming()
  {
    let now = now();
    let mut late = task(1, "late");
    late.due =
      Some(now - Duration::days(1));

    assert!(View::Today.matches(&late, now));
    assert!(
      !View::Upcoming.matches(&late, now)
    );
  }

  #[test]
  fn any_time_today_is_today() {
    let now = now();
    for due in [
      start_of_day(now),
      now + Duration::hours(3),
      start_of_day(now + Duration::days(1))
        - Duration::milliseconds(1)
    ] {
      let mut t = task(1, "today");
      t.due = Some(due);
      assert!(
        View::Today.matches(&t, now),
        "due {due}"
      );
      assert!(
        !View::Upcoming.matches(&t, now),
        "due {due}"
      );
    }
  }

  #[test]
  fn tomorrow_is_upcoming_only() {
    let now = now();
    let mut t = task(1, "tomorrow");
    t.due = Some(now + Duration::days(1));
    assert!(View::Upcoming.matches(&t, now));
    assert!(!View::Today.matches(&t, now));
  }

  #[test]
  fn upcoming_starts_at_next_local_midnight()
  {
    let now = now();
    let tomorrow =
      start_of_day(now + Duration::days(1));
    let cases = [
      (tomorrow - Duration::milliseconds(1), false),
      (tomorrow, true),
      (tomorrow + Duration::hours(23), true)
    ];

    for (due, expected) in cases {
      let mut t = task(1, "edge");
      t.due = Some(due);
      assert_eq!(
        View::Upcoming.matches(&t, now),
        expected,
        "due {due}"
      );
      assert_eq!(
        is_upcoming(due, now),
        expected,
        "due {due}"
      );
    }
  }

  #[test]
  fn completed_tasks_only_in_archive() {
    let now = now();
    let mut t = task(1, "finished");
    t.due = Some(now);
    t.project_id = Some(4);
    let t = done(t);

    assert!(!View::Inbox.matches(&t, now));
    assert!(!View::Today.matches(&t, now));
    assert!(!View::Upcoming.matches(&t, now));
    assert!(
      !View::Project(4).matches(&t, now)
    );
    assert!(
      View::archive("").matches(&t, now)
    );
  }

  #[test]
  fn projectless_task_due_today_shows_in_inbox_and_today()
   {
    let now = now();
    let mut t = task(1, "both");
    t.due = Some(now);

    assert!(View::Inbox.matches(&t, now));
    assert!(View::Today.matches(&t, now));

    let undated = task(2, "inbox only");
    assert!(
      View::Inbox.matches(&undated, now)
    );
    assert!(
      !View::Today.matches(&undated, now)
    );
  }

  #[test]
  fn project_view_needs_matching_open_task()
  {
    let now = now();
    let mut a = task(1, "a");
    a.project_id = Some(2);
    let mut b = task(2, "b");
    b.project_id = Some(3);

    assert!(View::Project(2).matches(&a, now));
    assert!(!View::Project(2).matches(&b, now));
    assert!(!View::Inbox.matches(&a, now));
  }

  #[test]
  fn archive_search_is_case_insensitive() {
    let now = now();
    let mut a = done(task(1, "Pay RENT"));
    a.description =
      Some("landlord".to_string());
    let b = done(task(2, "Groceries"));
    let tasks = vec![a, b];

    let hits =
      select(&tasks, &View::archive("rent"), now);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);

    let hits = select(
      &tasks,
      &View::archive("LANDLORD"),
      now
    );
    assert_eq!(hits.len(), 1);

    let all =
      select(&tasks, &View::archive("  "), now);
    assert_eq!(all.len(), 2);
  }

  #[test]
  fn select_keeps_order_and_source() {
    let now = now();
    let tasks = vec![
      task(3, "c"),
      done(task(2, "b")),
      task(1, "a"),
    ];
    let before = tasks.clone();

    let inbox =
      select(&tasks, &View::Inbox, now);
    let ids: Vec<u64> =
      inbox.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![3, 1]);
    assert_eq!(tasks, before);
  }

  #[test]
  fn parses_view_names() {
    assert_eq!(
      "Today".parse::<View>().unwrap(),
      View::Today
    );
    assert_eq!(
      "project:12".parse::<View>().unwrap(),
      View::Project(12)
    );
    assert_eq!(
      "archive:rent".parse::<View>().unwrap(),
      View::archive("rent")
    );
    assert!("project:x".parse::<View>().is_err());
    assert!("someday".parse::<View>().is_err());
  }

  #[test]
  fn counts_cover_every_view() {
    let now = now();
    let mut due_today = task(1, "a");
    due_today.due = Some(now);
    let mut later = task(2, "b");
    later.due = Some(now + Duration::days(3));
    later.project_id = Some(9);
    let archived = done(task(3, "c"));

    let counts = ViewCounts::tally(
      &[due_today, later, archived],
      now
    );
    assert_eq!(counts.inbox, 1);
    assert_eq!(counts.today, 1);
    assert_eq!(counts.upcoming, 1);
    assert_eq!(counts.archive, 1);
    assert_eq!(counts.projects.get(&9), Some(&1));
  }
}
