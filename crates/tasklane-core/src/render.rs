use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::board::Board;
use crate::config::Config;
use crate::datetime::{format_due, format_timestamp};
use crate::filter::ViewCounts;
use crate::task::{Priority, Project, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn print_tasks(
        &mut self,
        tasks: &[&Task],
        board: &Board,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.write_tasks(io::stdout().lock(), tasks, board, now)
    }

    pub fn print_projects(&mut self, board: &Board, counts: &ViewCounts) -> anyhow::Result<()> {
        self.write_projects(io::stdout().lock(), board, counts)
    }

    pub fn print_task_info(
        &mut self,
        task: &Task,
        board: &Board,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task, board, now)
    }

    pub fn print_summary(&mut self, counts: &ViewCounts) -> anyhow::Result<()> {
        self.write_summary(io::stdout().lock(), counts)
    }

    #[tracing::instrument(skip(self, out, tasks, board, now), fields(count = tasks.len()))]
    pub fn write_tasks<W: Write>(
        &self,
        mut out: W,
        tasks: &[&Task],
        board: &Board,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Due", "Pri", "Project", "Title"];
        let mut rows = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id = self.paint(&task.id.to_string(), "33");

            let due = task
                .due
                .map(|due| {
                    let label = format_due(due, now);
                    if task.is_overdue(now) {
                        self.paint(&label, "31")
                    } else {
                        label
                    }
                })
                .unwrap_or_default();

            let priority = match task.priority {
                Priority::Normal => String::new(),
                Priority::Urgent => self.paint(task.priority.as_str(), "1;31"),
                other => other.as_str().to_string(),
            };

            let project = board
                .project_of(task)
                .map(|p| p.name.clone())
                .unwrap_or_default();

            let title = if task.completed {
                self.paint(&task.title, "9")
            } else {
                task.title.clone()
            };

            rows.push(vec![id, due, priority, project, title]);
        }

        write_table(&mut out, &headers, rows)?;
        writeln!(out)?;
        writeln!(
            out,
            "{} task{}",
            tasks.len(),
            if tasks.len() == 1 { "" } else { "s" }
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, board, counts))]
    pub fn write_projects<W: Write>(
        &self,
        mut out: W,
        board: &Board,
        counts: &ViewCounts,
    ) -> anyhow::Result<()> {
        let visible: Vec<&Project> = board.projects.iter().filter(|p| !p.archived).collect();
        if visible.is_empty() {
            writeln!(out, "No projects.")?;
            return Ok(());
        }

        let headers = ["ID", "Name", "Color", "Open"];
        let rows = visible
            .into_iter()
            .map(|project| {
                vec![
                    self.paint(&project.id.to_string(), "33"),
                    project.name.clone(),
                    project.color.clone(),
                    counts
                        .projects
                        .get(&project.id)
                        .copied()
                        .unwrap_or(0)
                        .to_string(),
                ]
            })
            .collect();

        write_table(&mut out, &headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, task, board, now))]
    pub fn write_task_info<W: Write>(
        &self,
        mut out: W,
        task: &Task,
        board: &Board,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(
            out,
            "description {}",
            task.description.as_deref().unwrap_or_default()
        )?;
        writeln!(
            out,
            "project     {}",
            board
                .project_of(task)
                .map(|p| p.name.as_str())
                .unwrap_or_default()
        )?;
        writeln!(out, "priority    {}", task.priority)?;
        if let Some(due) = task.due {
            writeln!(out, "due         {}", format_due(due, now))?;
        }
        writeln!(
            out,
            "status      {}",
            if task.completed { "completed" } else { "open" }
        )?;
        writeln!(out, "created     {}", format_timestamp(task.created_at))?;
        if let Some(completed_at) = task.completed_at {
            writeln!(out, "completed   {}", format_timestamp(completed_at))?;
        }
        Ok(())
    }

    pub fn write_summary<W: Write>(&self, mut out: W, counts: &ViewCounts) -> anyhow::Result<()> {
        for (label, count) in [
            ("Inbox", counts.inbox),
            ("Today", counts.today),
            ("Upcoming", counts.upcoming),
            ("Archive", counts.archive),
        ] {
            writeln!(out, "{label:<9}{count}")?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(mut writer: W, headers: &[&str], rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(*header));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = column_count.saturating_sub(1);
    for (idx, header) in headers.iter().enumerate() {
        if idx == last {
            write!(writer, "{header}")?;
        } else {
            write!(writer, "{:width$} ", header, width = widths[idx])?;
        }
    }
    writeln!(writer)?;

    for (idx, width) in widths.iter().enumerate() {
        write!(writer, "{:-<width$}", "", width = *width)?;
        if idx != last {
            write!(writer, " ")?;
        }
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if idx == last {
                write!(writer, "{cell}")?;
                continue;
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{Renderer, strip_ansi};
    use crate::board::Board;
    use crate::config::Config;
    use crate::filter::ViewCounts;
    use crate::task::{Priority, Project, Task};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap()
    }

    fn task(id: u64, title: &str) -> Task {
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
            order: 0,
        }
    }

    fn render_tasks(board: &Board) -> String {
        let refs: Vec<&Task> = board.tasks.iter().collect();
        let mut buf = Vec::new();
        Renderer::plain()
            .write_tasks(&mut buf, &refs, board, now())
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn task_table_shows_due_labels_and_project_names() {
        let mut with_project = task(1, "Fix tap");
        with_project.project_id = Some(7);
        with_project.due = Some(now() + Duration::days(1));
        let mut dangling = task(2, "Orphan");
        dangling.project_id = Some(99);
        dangling.priority = Priority::High;

        let board = Board {
            tasks: vec![with_project, dangling],
            projects: vec![Project {
                id: 7,
                name: "Home".to_string(),
                color: "#5B4AE4".to_string(),
                order: 0,
                task_count: 0,
                archived: false,
            }],
        };

        let text = render_tasks(&board);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("ID"));
        assert!(lines[2].contains("Tomorrow"));
        assert!(lines[2].contains("Home"));
        assert!(lines[3].contains("high"));
        assert!(!lines[3].contains("Home"));
        assert!(text.ends_with("2 tasks\n"));
    }

    #[test]
    fn empty_views_say_so() {
        assert_eq!(render_tasks(&Board::default()), "No tasks.\n");
    }

    #[test]
    fn summary_lists_every_view() {
        let counts = ViewCounts {
            inbox: 3,
            today: 1,
            ..ViewCounts::default()
        };
        let mut buf = Vec::new();
        Renderer::plain().write_summary(&mut buf, &counts).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Inbox    3\nToday    1\n"));
        assert!(text.contains("Archive  0"));
    }

    #[test]
    fn unknown_color_setting_is_rejected() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("color".to_string(), "sometimes".to_string())]);
        let err = Renderer::new(&cfg).unwrap_err();
        assert!(err.to_string().contains("invalid color setting"));

        cfg.apply_overrides([("color".to_string(), "off".to_string())]);
        assert!(Renderer::new(&cfg).is_ok());
    }

    #[test]
    fn ansi_codes_do_not_count_toward_width() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }
}
