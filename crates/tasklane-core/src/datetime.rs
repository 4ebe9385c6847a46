use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  NaiveDateTime,
  SecondsFormat,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "tasklane-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TASKLANE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TASKLANE_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "UTC";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Timezone that defines where a
/// calendar day starts and ends.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

/// First instant of the calendar day
/// containing `now`.
#[must_use]
pub fn start_of_day(
  now: DateTime<Utc>
) -> DateTime<Utc> {
  local_midnight(to_project_date(now))
}

#[must_use]
pub fn is_overdue(
  due: DateTime<Utc>,
  now: DateTime<Utc>
) -> bool {
  due < start_of_day(now)
}

/// Due on a later calendar day than
/// `now`, in the project timezone.
#[must_use]
pub fn is_upcoming(
  due: DateTime<Utc>,
  now: DateTime<Utc>
) -> bool {
  to_project_date(due)
    > to_project_date(now)
}

/// Maps quick-add text to a due date.
///
/// Recognised phrases, first match
/// wins: `today`, `tomorrow`, `next
/// week`, `in N day(s)`, `in N
/// week(s)`. Anything else yields
/// `None`; the text itself is never
/// altered.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_natural_language(
  input: &str,
  now: DateTime<Utc>
) -> Option<DateTime<Utc>> {
  let text =
    input.trim().to_lowercase();

  if text.contains("today") {
    return Some(now);
  }

  if text.contains("tomorrow") {
    return add_days(now, 1);
  }

  if text.contains("next week") {
    return add_days(now, 7);
  }

  if let Some(days) = relative_count(
    &text,
    r"in (\d+) days?"
  ) {
    return add_days(now, days);
  }

  if let Some(weeks) = relative_count(
    &text,
    r"in (\d+) weeks?"
  ) {
    return add_days(
      now,
      weeks.checked_mul(7)?
    );
  }

  tracing::trace!(
    "no date phrase recognised"
  );
  None
}

/// Parses a stored due date.
///
/// Calendar-day strings land on local
/// midnight; full RFC 3339 timestamps
/// are accepted as-is.
pub fn parse_calendar_day(
  raw: &str
) -> anyhow::Result<DateTime<Utc>> {
  let token = raw.trim();

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(local_midnight(date));
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  Err(anyhow!(
    "unrecognized calendar day: \
     {raw}"
  ))
  .context(
    "expected YYYY-MM-DD or RFC3339"
  )
}

#[must_use]
pub fn format_calendar_day(
  dt: DateTime<Utc>
) -> String {
  to_project_date(dt)
    .format("%Y-%m-%d")
    .to_string()
}

pub fn parse_timestamp(
  raw: &str
) -> anyhow::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(
    raw.trim()
  )
  .map(|dt| dt.with_timezone(&Utc))
  .with_context(|| {
    format!(
      "invalid RFC3339 timestamp: \
       {raw}"
    )
  })
}

#[must_use]
pub fn format_timestamp(
  dt: DateTime<Utc>
) -> String {
  dt.to_rfc3339_opts(
    SecondsFormat::Millis,
    true
  )
}

/// Short human label for a due date:
/// `Today`, `Tomorrow`, `Yesterday`,
/// the weekday name inside the current
/// week, otherwise e.g. `Mar 4`.
#[must_use]
pub fn format_due(
  due: DateTime<Utc>,
  now: DateTime<Utc>
) -> String {
  let day = to_project_date(due);
  let today = to_project_date(now);
  let delta =
    (day - today).num_days();

  match delta {
    | 0 => return "Today".to_string(),
    | 1 => {
      return "Tomorrow".to_string();
    }
    | -1 => {
      return "Yesterday".to_string();
    }
    | _ => {}
  }

  let week_start = today
    - Duration::days(i64::from(
      today
        .weekday()
        .num_days_from_sunday()
    ));
  let week_end =
    week_start + Duration::days(6);
  if day >= week_start && day <= week_end
  {
    return day
      .format("%A")
      .to_string();
  }

  day.format("%b %-d").to_string()
}

fn add_days(
  now: DateTime<Utc>,
  days: i64
) -> Option<DateTime<Utc>> {
  now.checked_add_signed(
    Duration::try_days(days)?
  )
}

fn relative_count(
  text: &str,
  pattern: &str
) -> Option<i64> {
  let re = Regex::new(pattern).ok()?;
  let caps = re.captures(text)?;
  caps
    .get(1)?
    .as_str()
    .parse::<i64>()
    .ok()
}

fn local_midnight(
  date: NaiveDate
) -> DateTime<Utc> {
  let tz = project_timezone();
  let midnight: NaiveDateTime =
    date.and_time(
      chrono::NaiveTime::MIN
    );

  if let Some(local) = tz
    .from_local_datetime(&midnight)
    .earliest()
  {
    return local.with_timezone(&Utc);
  }

  // midnight falls in a DST gap
  let shifted =
    midnight + Duration::hours(1);
  match tz
    .from_local_datetime(&shifted)
    .earliest()
  {
    | Some(local) => {
      local.with_timezone(&Utc)
    }
    | None => {
      tracing::warn!(
        date = %date,
        "no local midnight in project timezone; using UTC"
      );
      midnight.and_utc()
    }
  }
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
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
    format_calendar_day,
    format_due,
    is_overdue,
    is_upcoming,
    parse_calendar_day,
    parse_natural_language,
    start_of_day,
    to_project_date
  };

  fn noon() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn recognises_tomorrow_anywhere_in_title()
  {
    let now = noon();
    let parsed = parse_natural_language(
      "Buy milk tomorrow",
      now
    )
    .expect("tomorrow parses");
    assert_eq!(
      to_project_date(parsed),
      to_project_date(
        now + Duration::days(1)
      )
    );
  }

  #[test]
  fn plain_title_has_no_date() {
    assert_eq!(
      parse_natural_language(
        "Buy milk",
        noon()
      ),
      None
    );
  }

  #[test]
  fn relative_day_and_week_counts() {
    let now = noon();
    assert_eq!(
      parse_natural_language(
        "Review in 3 days",
        now
      ),
      Some(now + Duration::days(3))
    );
    assert_eq!(
      parse_natural_language(
        "ship IN 1 DAY",
        now
      ),
      Some(now + Duration::days(1))
    );
    assert_eq!(
      parse_natural_language(
        "Retro in 2 weeks",
        now
      ),
      Some(now + Duration::days(14))
    );
  }

  #[test]
  fn earlier_phrases_take_precedence() {
    let now = noon();
    assert_eq!(
      parse_natural_language(
        "today or tomorrow",
        now
      ),
      Some(now)
    );
    assert_eq!(
      parse_natural_language(
        "next week, not in 3 days",
        now
      ),
      Some(now + Duration::days(7))
    );
  }

  #[test]
  fn oversized_counts_yield_no_date() {
    assert_eq!(
      parse_natural_language(
        "in 99999999999999999999 days",
        noon()
      ),
      None
    );
    assert_eq!(
      parse_natural_language(
        "in 9999999999999 weeks",
        noon()
      ),
      None
    );
  }

  #[test]
  fn calendar_day_lands_on_local_midnight()
  {
    let parsed =
      parse_calendar_day("2026-03-01")
        .expect("parse day");
    assert_eq!(
      format_calendar_day(parsed),
      "2026-03-01"
    );
    assert_eq!(
      start_of_day(parsed),
      parsed
    );
    assert!(
      parse_calendar_day("March 1")
        .is_err()
    );
  }

  fn last_instant_of_today(
    now: DateTime<Utc>
  ) -> DateTime<Utc> {
    start_of_day(now + Duration::days(1))
      - Duration::milliseconds(1)
  }

  #[test]
  fn day_boundaries_bracket_now() {
    let now = noon();
    assert!(start_of_day(now) <= now);
    assert!(!is_overdue(now, now));
    assert!(is_overdue(
      now - Duration::days(1),
      now
    ));
    assert!(!is_upcoming(
      last_instant_of_today(now),
      now
    ));
    assert!(is_upcoming(
      last_instant_of_today(now)
        + Duration::milliseconds(1),
      now
    ));
    assert!(is_upcoming(
      now + Duration::days(1),
      now
    ));
  }

  #[test]
  fn due_labels() {
    let now = noon();
    assert_eq!(
      format_due(now, now),
      "Today"
    );
    assert_eq!(
      format_due(
        now + Duration::days(1),
        now
      ),
      "Tomorrow"
    );
    assert_eq!(
      format_due(
        now - Duration::days(1),
        now
      ),
      "Yesterday"
    );
    assert_eq!(
      format_due(
        now + Duration::days(40),
        now
      ),
      to_project_date(
        now + Duration::days(40)
      )
      .format("%b %-d")
      .to_string()
    );
  }
}
