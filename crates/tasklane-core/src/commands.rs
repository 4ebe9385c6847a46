use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::board::Board;
use crate::cli::Invocation;
use crate::config::parse_bool;
use crate::datetime::{parse_calendar_day, parse_natural_language};
use crate::error::StoreError;
use crate::filter::View;
use crate::render::Renderer;
use crate::service::Services;
use crate::task::{
    Priority, ProjectDraft, ProjectId, ProjectPatch, TaskDraft, TaskId, TaskPatch,
};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "inbox",
        "today",
        "upcoming",
        "archive",
        "project",
        "projects",
        "summary",
        "add",
        "modify",
        "done",
        "reopen",
        "delete",
        "info",
        "project-add",
        "project-modify",
        "project-delete",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(services, renderer, inv), fields(command = %inv.command))]
pub async fn dispatch(
    services: &Services,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = services.tasks.now();
    let args = inv.args.as_slice();
    debug!(args = ?args, "dispatching command");

    match inv.command.as_str() {
        "inbox" => cmd_view(services, renderer, View::Inbox, now).await,
        "today" => cmd_view(services, renderer, View::Today, now).await,
        "upcoming" => cmd_view(services, renderer, View::Upcoming, now).await,
        "archive" => cmd_view(services, renderer, View::archive(args.join(" ")), now).await,
        "project" => {
            let id = single_id(args, "project")?;
            services.projects.get(id).await?;
            cmd_view(services, renderer, View::Project(id), now).await
        }
        "projects" => cmd_projects(services, renderer, now).await,
        "summary" => cmd_summary(services, renderer, now).await,
        "add" => cmd_add(services, args, now).await,
        "modify" => cmd_modify(services, args, now).await,
        "done" => cmd_set_completed(services, args, true).await,
        "reopen" => cmd_set_completed(services, args, false).await,
        "delete" => cmd_delete(services, args).await,
        "info" => cmd_info(services, renderer, args, now).await,
        "project-add" => cmd_project_add(services, args, now).await,
        "project-modify" => cmd_project_modify(services, args, now).await,
        "project-delete" => cmd_project_delete(services, args).await,
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(services, renderer, now), fields(view = %view))]
async fn cmd_view(
    services: &Services,
    renderer: &mut Renderer,
    view: View,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let board = Board::load(services).await?;
    let tasks = board.view(&view, now);
    info!(shown = tasks.len(), "command view");
    renderer.print_tasks(&tasks, &board, now)
}

async fn cmd_projects(
    services: &Services,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let board = Board::load(services).await?;
    renderer.print_projects(&board, &board.counts(now))
}

async fn cmd_summary(
    services: &Services,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let board = Board::load(services).await?;
    renderer.print_summary(&board.counts(now))
}

#[instrument(skip(services, args, now))]
async fn cmd_add(services: &Services, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let (text, mods) = parse_text_and_mods(args, now)?;
    let mut draft =
        TaskDraft::quick_add(&text, now).ok_or_else(|| anyhow!("add: a title is required"))?;

    let mut view = None;
    for one_mod in mods {
        match one_mod {
            Mod::Project(project_id) => draft.project_id = project_id,
            Mod::Priority(priority) => draft.priority = priority,
            Mod::Due(due) => draft.due = due,
            Mod::Description(description) => draft.description = description,
            Mod::View(v) => view = Some(v),
            other => return Err(anyhow!("add: {} does not apply to tasks", other.key())),
        }
    }
    if let Some(view) = view {
        draft = Board::draft_for_view(&view, draft, now);
    }

    let task = services.tasks.create(draft).await?;
    println!("Created task {}.", task.id);
    Ok(())
}

#[instrument(skip(services, args, now))]
async fn cmd_modify(services: &Services, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command modify");

    let (id, rest) = leading_id(args, "modify")?;
    let (text, mods) = parse_text_and_mods(rest, now)?;

    let mut patch = TaskPatch::default();
    if !text.is_empty() {
        patch.title = Some(text);
    }
    for one_mod in mods {
        match one_mod {
            Mod::Project(project_id) => patch.project_id = Some(project_id),
            Mod::Priority(priority) => patch.priority = Some(priority),
            Mod::Due(due) => patch.due = Some(due),
            Mod::Description(description) => patch.description = Some(description),
            Mod::Order(order) => patch.order = Some(order),
            other => return Err(anyhow!("modify: {} does not apply to tasks", other.key())),
        }
    }
    if patch.is_empty() {
        return Err(anyhow!("modify: nothing to change"));
    }

    let task = services.tasks.update(id, patch).await?;
    println!("Modified task {} '{}'.", task.id, task.title);
    Ok(())
}

#[instrument(skip(services, args))]
async fn cmd_set_completed(
    services: &Services,
    args: &[String],
    completed: bool,
) -> anyhow::Result<()> {
    let verb = if completed { "Completed" } else { "Reopened" };
    for id in ids(args, if completed { "done" } else { "reopen" })? {
        let task = services
            .tasks
            .update(id, TaskPatch::completion(completed))
            .await?;
        println!("{verb} task {} '{}'.", task.id, task.title);
    }
    Ok(())
}

#[instrument(skip(services, args))]
async fn cmd_delete(services: &Services, args: &[String]) -> anyhow::Result<()> {
    for id in ids(args, "delete")? {
        services.tasks.delete(id).await?;
        println!("Deleted task {id}.");
    }
    Ok(())
}

async fn cmd_info(
    services: &Services,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let id = single_id(args, "info")?;
    let board = Board::load(services).await?;
    let task = board
        .task(id)
        .ok_or_else(|| StoreError::not_found("task", id))?;
    renderer.print_task_info(task, &board, now)
}

#[instrument(skip(services, args, now))]
async fn cmd_project_add(
    services: &Services,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let (name, mods) = parse_text_and_mods(args, now)?;
    let mut draft = ProjectDraft::new(name);
    for one_mod in mods {
        match one_mod {
            Mod::Color(color) => draft.color = Some(color),
            other => {
                return Err(anyhow!(
                    "project-add: {} does not apply to projects",
                    other.key()
                ));
            }
        }
    }

    let project = services.projects.create(draft).await?;
    println!("Created project {} '{}'.", project.id, project.name);
    Ok(())
}

#[instrument(skip(services, args, now))]
async fn cmd_project_modify(
    services: &Services,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let (id, rest) = leading_id(args, "project-modify")?;
    let (text, mods) = parse_text_and_mods(rest, now)?;

    let mut patch = ProjectPatch::default();
    if !text.is_empty() {
        patch.name = Some(text);
    }
    for one_mod in mods {
        match one_mod {
            Mod::Name(name) => patch.name = Some(name),
            Mod::Color(color) => patch.color = Some(color),
            Mod::Order(order) => patch.order = Some(order),
            Mod::Archived(archived) => patch.archived = Some(archived),
            other => {
                return Err(anyhow!(
                    "project-modify: {} does not apply to projects",
                    other.key()
                ));
            }
        }
    }
    if patch.is_empty() {
        return Err(anyhow!("project-modify: nothing to change"));
    }

    let project = services.projects.update(id, patch).await?;
    println!("Modified project {} '{}'.", project.id, project.name);
    Ok(())
}

#[instrument(skip(services, args))]
async fn cmd_project_delete(services: &Services, args: &[String]) -> anyhow::Result<()> {
    for id in ids(args, "project-delete")? {
        services.projects.delete(id).await?;
        println!("Deleted project {id}.");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Views: inbox, today, upcoming, archive [search], project <id>, projects, summary\n\
         Tasks: add <title> [project:<id>] [priority:<p>] [due:<date>] [desc:<text>] [view:<view>]\n\
         \x20      modify <id> [title] [mods], done <id>.., reopen <id>.., delete <id>.., info <id>\n\
         Projects: project-add <name> [color:#RRGGBB], project-modify <id> [name] [color:] [order:] [archived:], project-delete <id>.."
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mod {
    Project(Option<ProjectId>),
    Priority(Priority),
    Due(Option<DateTime<Utc>>),
    Description(Option<String>),
    View(View),
    Order(i64),
    Name(String),
    Color(String),
    Archived(bool),
}

impl Mod {
    fn key(&self) -> &'static str {
        match self {
            Mod::Project(_) => "project:",
            Mod::Priority(_) => "priority:",
            Mod::Due(_) => "due:",
            Mod::Description(_) => "desc:",
            Mod::View(_) => "view:",
            Mod::Order(_) => "order:",
            Mod::Name(_) => "name:",
            Mod::Color(_) => "color:",
            Mod::Archived(_) => "archived:",
        }
    }
}

/// Separates `key:value` modifiers from free text. Everything after `--` is
/// text, as is any token whose key is not a known modifier.
#[instrument(skip(args, now))]
fn parse_text_and_mods(args: &[String], now: DateTime<Utc>) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut text_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" && !literal {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, now)? {
            mods.push(one_mod);
            continue;
        }

        text_parts.push(arg.as_str());
    }

    Ok((text_parts.join(" "), mods))
}

fn parse_one_mod(tok: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };
    let value = value.trim();
    let cleared = value.is_empty() || value.eq_ignore_ascii_case("none");

    let one_mod = match key.to_ascii_lowercase().as_str() {
        "project" | "proj" => Mod::Project(if cleared {
            None
        } else {
            Some(
                value
                    .parse::<ProjectId>()
                    .with_context(|| format!("invalid project id: {value}"))?,
            )
        }),
        "pri" | "priority" => Mod::Priority(value.parse::<Priority>()?),
        "due" => Mod::Due(if cleared { None } else { Some(parse_due(value, now)?) }),
        "desc" | "description" => {
            Mod::Description((!cleared).then(|| value.to_string()))
        }
        "view" => Mod::View(value.parse::<View>()?),
        "order" => Mod::Order(
            value
                .parse::<i64>()
                .with_context(|| format!("invalid order: {value}"))?,
        ),
        "name" => Mod::Name(value.to_string()),
        "color" | "colour" => Mod::Color(value.to_string()),
        "archived" => Mod::Archived(
            parse_bool(value).ok_or_else(|| anyhow!("invalid archived value: {value}"))?,
        ),
        _ => return Ok(None),
    };
    Ok(Some(one_mod))
}

/// `due:` accepts a calendar day, an RFC 3339 timestamp or a single-token
/// phrase such as `today` or `tomorrow`.
fn parse_due(value: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if let Some(due) = parse_natural_language(value, now) {
        return Ok(due);
    }
    parse_calendar_day(value).with_context(|| format!("invalid due date: {value}"))
}

fn ids(args: &[String], command: &str) -> anyhow::Result<Vec<TaskId>> {
    if args.is_empty() {
        return Err(anyhow!("{command}: at least one id is required"));
    }
    args.iter()
        .map(|raw| {
            raw.parse::<u64>()
                .with_context(|| format!("{command}: invalid id {raw:?}"))
        })
        .collect()
}

fn single_id(args: &[String], command: &str) -> anyhow::Result<u64> {
    let parsed = ids(args, command)?;
    if parsed.len() > 1 {
        warn!(command, extra = parsed.len() - 1, "ignoring extra ids");
    }
    Ok(parsed[0])
}

fn leading_id<'a>(args: &'a [String], command: &str) -> anyhow::Result<(u64, &'a [String])> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("{command}: an id is required"))?;
    let id = first
        .parse::<u64>()
        .with_context(|| format!("{command}: invalid id {first:?}"))?;
    Ok((id, rest))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{Mod, dispatch, expand_command_abbrev, known_command_names, parse_text_and_mods};
    use crate::board::Board;
    use crate::cli::Invocation;
    use crate::clock::FixedClock;
    use crate::datetime::to_project_date;
    use crate::filter::View;
    use crate::render::Renderer;
    use crate::service::Services;
    use crate::store::Stores;
    use crate::task::Priority;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap()
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    async fn run(services: &Services, command: &str, args: &[&str]) -> anyhow::Result<()> {
        let inv = Invocation {
            command: command.to_string(),
            args: strings(args),
        };
        dispatch(services, &mut Renderer::plain(), inv).await
    }

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("inb", &known), Some("inbox"));
        assert_eq!(expand_command_abbrev("project", &known), Some("project"));
        assert_eq!(expand_command_abbrev("project-a", &known), Some("project-add"));
        assert_eq!(expand_command_abbrev("d", &known), None);
    }

    #[test]
    fn modifiers_are_split_from_text() {
        let (text, mods) = parse_text_and_mods(
            &strings(&["call", "mom", "priority:high", "project:3", "--", "due:later"]),
            now(),
        )
        .unwrap();

        assert_eq!(text, "call mom due:later");
        assert_eq!(mods, vec![Mod::Priority(Priority::High), Mod::Project(Some(3))]);

        let (_, mods) = parse_text_and_mods(&strings(&["due:none", "ratio:2"]), now()).unwrap();
        assert_eq!(mods, vec![Mod::Due(None)]);

        assert!(parse_text_and_mods(&strings(&["priority:whenever"]), now()).is_err());

        let (_, mods) = parse_text_and_mods(&strings(&["archived:yes"]), now()).unwrap();
        assert_eq!(mods, vec![Mod::Archived(true)]);
        assert!(parse_text_and_mods(&strings(&["archived:maybe"]), now()).is_err());
    }

    #[tokio::test]
    async fn add_complete_and_delete_through_commands() {
        let services = Services::new(
            Stores::in_memory(Duration::ZERO),
            Arc::new(FixedClock::new(now())),
        );

        run(&services, "project-add", &["Home", "color:#112233"]).await.unwrap();
        run(&services, "add", &["Fix", "tap", "tomorrow", "project:1"]).await.unwrap();
        run(&services, "add", &["Buy", "milk", "view:today"]).await.unwrap();

        let board = Board::load(&services).await.unwrap();
        assert_eq!(board.view(&View::Project(1), now()).len(), 1);
        let today = board.view(&View::Today, now());
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].title, "Buy milk");
        let upcoming = board.view(&View::Upcoming, now());
        assert_eq!(
            to_project_date(upcoming[0].due.unwrap()),
            to_project_date(now()).succ_opt().unwrap()
        );

        run(&services, "done", &["2"]).await.unwrap();
        run(&services, "delete", &["1"]).await.unwrap();
        let board = Board::load(&services).await.unwrap();
        assert_eq!(board.tasks.len(), 1);
        assert_eq!(board.counts(now()).archive, 1);

        let err = run(&services, "done", &["1"]).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(run(&services, "modify", &["2"]).await.is_err());
        assert!(run(&services, "add", &["color:#000000", "x"]).await.is_err());
    }
}
