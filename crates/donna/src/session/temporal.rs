//! Timezone resolution and the date/time block of the system prompt.

use std::fmt::Write as _;

use chrono::{DateTime, Datelike, Days, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use tracing::debug;

/// Placeholder the onboarding flow writes before the user picks a zone.
const UNSET_TIMEZONE: &str = "TBD";

/// Where the effective timezone came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneSource {
    Client,
    Preference,
    System,
    Fallback,
}

/// Pick the session timezone: client hint, stored preference, host zone, UTC.
///
/// A value that does not name an IANA zone falls through to the next source.
pub fn resolve_timezone(client: Option<&str>, stored: Option<&str>) -> (Tz, ZoneSource) {
    if let Some(tz) = client.and_then(parse_zone) {
        return (tz, ZoneSource::Client);
    }
    if let Some(tz) = stored
        .filter(|name| name.trim() != UNSET_TIMEZONE)
        .and_then(parse_zone)
    {
        return (tz, ZoneSource::Preference);
    }
    if let Some(tz) = system_zone() {
        return (tz, ZoneSource::System);
    }
    (Tz::UTC, ZoneSource::Fallback)
}

fn parse_zone(name: &str) -> Option<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    match name.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(err) => {
            debug!("Ignoring unknown timezone {name:?}: {err}");
            None
        }
    }
}

fn system_zone() -> Option<Tz> {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| parse_zone(&name))
}

/// Date context for the current instant in `tz`.
pub fn current_date_context(tz: Tz) -> String {
    date_context(Utc::now().with_timezone(&tz))
}

/// Render the date/time block for `now`.
pub fn date_context(now: DateTime<Tz>) -> String {
    let today = now.date_naive();
    let mut out = String::new();

    out.push_str("═══ DATE & TIME CONTEXT ═══\n");
    let _ = writeln!(out, "Today: {}, {}", now.format("%A"), readable(today));
    let _ = writeln!(
        out,
        "Current time: {} {} ({}) [{}]",
        now.format("%-I:%M %p"),
        now.format("%Z"),
        now.timezone().name(),
        now.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    );
    out.push('\n');
    out.push_str("─── This Week ───\n");

    let days_left_in_week = 6 - now.weekday().num_days_from_monday();
    for offset in 1..=7u32 {
        let date = today + Days::new(u64::from(offset));
        let label = if offset == 1 {
            format!("Tomorrow ({})", date.format("%a"))
        } else if offset > days_left_in_week {
            format!("Next {}", date.format("%A"))
        } else {
            date.format("%A").to_string()
        };
        let _ = writeln!(
            out,
            "{:<18} {} [{}]",
            format!("{label}:"),
            readable(date),
            iso(date)
        );
    }

    out.push('\n');
    out.push_str("─── Reference Points ───\n");
    reference_line(&mut out, "1 week from now:", today + Days::new(7));
    reference_line(&mut out, "2 weeks from now:", today + Days::new(14));
    reference_line(&mut out, "End of month:", end_of_month(today));

    // No trailing newline; the prompt builder adds its own spacing.
    out.truncate(out.trim_end_matches('\n').len());
    out
}

fn reference_line(out: &mut String, label: &str, date: NaiveDate) {
    let _ = writeln!(
        out,
        "{label:<18} {}, {} [{}]",
        date.format("%A"),
        readable(date),
        iso(date)
    );
}

fn readable(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn end_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}
