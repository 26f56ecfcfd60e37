//! Pure helpers for displaying, rounding and parsing tracked durations.

use once_cell::sync::Lazy;
use regex::Regex;

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
/// Largest duration accepted from user input; keeps values valid as `i64` timestamps.
const MAX_INPUT_MS: u64 = i64::MAX as u64;

static CLOCK_INPUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+):([0-5]?\d)(?::([0-5]?\d))?$").expect("invalid clock duration regex")
});
static TOKEN_INPUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+(?:\.\d+)?)\s*h)?\s*(?:(\d+)\s*m)?\s*(?:(\d+)\s*s)?$")
        .expect("invalid token duration regex")
});

/// Formats milliseconds as `H:MM:SS`; negative input yields an empty string.
pub fn format_timer(ms: i64) -> String {
    if ms < 0 {
        return String::new();
    }
    let total_secs = ms as u64 / MS_PER_SECOND;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Float variant of [`format_timer`]; NaN, infinite and negative input yield an empty string.
pub fn format_timer_f64(ms: f64) -> String {
    if !ms.is_finite() || ms < 0.0 {
        return String::new();
    }
    format_timer(ms.floor() as i64)
}

/// Rounds the minutes part of `ms` to the nearest multiple of `interval_minutes`.
///
/// Seconds count as a fraction of a minute and are dropped from the result; an
/// exact half rounds up and overflow past 60 minutes carries into the hours.
/// With interval 15: 7m29s becomes 0m, 7m30s becomes 15m, 23m becomes 30m.
/// An interval of zero leaves the value untouched.
pub fn round_time_nearest_interval(ms: u64, interval_minutes: u32) -> u64 {
    if interval_minutes == 0 {
        return ms;
    }
    let interval_ms = u64::from(interval_minutes) * MS_PER_MINUTE;
    let hours_ms = ms - ms % MS_PER_HOUR;
    let within_hour = ms % MS_PER_HOUR;
    let rounded = (within_hour + interval_ms / 2) / interval_ms * interval_ms;
    hours_ms.saturating_add(rounded)
}

/// Formats decimal hours as `H:MM`, e.g. `1.5` as `1:30`.
pub fn format_hours_usually(decimal_hours: f64) -> String {
    if !decimal_hours.is_finite() {
        return String::new();
    }
    let sign = if decimal_hours < 0.0 { "-" } else { "" };
    let total_minutes = (decimal_hours.abs() * 60.0).round() as u64;
    format!("{}{}:{:02}", sign, total_minutes / 60, total_minutes % 60)
}

/// Rounds decimal hours to two decimals.
pub fn round_hours(decimal_hours: f64) -> f64 {
    (decimal_hours * 100.0).round() / 100.0
}

/// Converts milliseconds to the two-decimal hours Redmine stores.
pub fn millis_to_hours(ms: u64) -> f64 {
    round_hours(ms as f64 / MS_PER_HOUR as f64)
}

/// Parses a user supplied duration into milliseconds.
///
/// Accepts `H:MM` / `H:MM:SS`, tokens such as `1h 30m`, `45m` or `90s`, and
/// decimal hours (`1.5`, `1,5`). Returns `None` for anything else.
pub fn parse_duration_input(input: &str) -> Option<u64> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    if let Some(captures) = CLOCK_INPUT_REGEX.captures(&normalized) {
        let hours: u64 = captures[1].parse().ok()?;
        let minutes: u64 = captures[2].parse().ok()?;
        let seconds: u64 = captures
            .get(3)
            .map(|m| m.as_str().parse())
            .transpose()
            .ok()?
            .unwrap_or(0);
        return sum_parts(hours.checked_mul(MS_PER_HOUR)?, minutes, seconds);
    }

    let decimal = normalized.replace(',', ".");
    if let Ok(hours) = decimal.parse::<f64>() {
        return hours_to_millis(hours);
    }

    let captures = TOKEN_INPUT_REGEX.captures(&normalized)?;
    if captures.get(1).is_none() && captures.get(2).is_none() && captures.get(3).is_none() {
        return None;
    }
    let hours: f64 = captures
        .get(1)
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0.0);
    let minutes: u64 = captures
        .get(2)
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);
    let seconds: u64 = captures
        .get(3)
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);
    sum_parts(hours_to_millis(hours)?, minutes, seconds)
}

fn hours_to_millis(hours: f64) -> Option<u64> {
    if !hours.is_finite() || hours < 0.0 {
        return None;
    }
    let ms = (hours * MS_PER_HOUR as f64).round();
    if ms > MAX_INPUT_MS as f64 {
        return None;
    }
    Some(ms as u64)
}

fn sum_parts(hours_ms: u64, minutes: u64, seconds: u64) -> Option<u64> {
    let total = hours_ms
        .checked_add(minutes.checked_mul(MS_PER_MINUTE)?)?
        .checked_add(seconds.checked_mul(MS_PER_SECOND)?)?;
    (total <= MAX_INPUT_MS).then_some(total)
}
