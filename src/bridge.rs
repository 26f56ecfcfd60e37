//! Display-facing rows combining timers with cached issue details.
//!
//! These are the shapes the command-line surface prints, either as text
//! lines or as JSON.

use serde::Serialize;

use crate::issue_cache::IssueCache;
use crate::time_format::{format_hours_usually, format_timer};
use crate::timer::{TimerStatus, TimerView};

const LABEL_LIMIT: usize = 60;

/// One timer as shown to the user.
#[derive(Serialize, Debug, Clone)]
pub struct TimerRow {
    pub issue_id: u64,
    pub label: String,
    pub project: Option<String>,
    pub status: TimerStatus,
    pub elapsed_ms: u64,
    pub elapsed: String,
    pub pinned: bool,
    pub remembered: bool,
}

/// Assigned issue with the local timer state, if any.
#[derive(Serialize, Debug, Clone)]
pub struct IssueRow {
    pub issue_id: u64,
    pub label: String,
    pub status: Option<String>,
    pub spent: Option<String>,
    pub timer: Option<String>,
}

pub fn timer_rows(views: &[TimerView], cache: &IssueCache) -> Vec<TimerRow> {
    views
        .iter()
        .map(|view| {
            let issue = cache.get_any(view.issue_id);
            let label = issue
                .as_ref()
                .map(|issue| truncate_text(&collapse_whitespace(&issue.label()), LABEL_LIMIT))
                .unwrap_or_else(|| format!("#{}", view.issue_id));
            TimerRow {
                issue_id: view.issue_id,
                label,
                project: issue.map(|issue| issue.project.name),
                status: view.status,
                elapsed_ms: view.elapsed,
                elapsed: format_timer(view.elapsed as i64),
                pinned: view.pinned,
                remembered: view.remembered,
            }
        })
        .collect()
}

pub fn issue_rows(issues: &[redmine_api::Issue], timers: &[TimerView]) -> Vec<IssueRow> {
    issues
        .iter()
        .map(|issue| {
            let timer = timers
                .iter()
                .find(|view| view.issue_id == issue.id)
                .map(|view| {
                    let marker = if view.active { " ▶" } else { "" };
                    format!("{}{}", format_timer(view.elapsed as i64), marker)
                });
            IssueRow {
                issue_id: issue.id,
                label: truncate_text(&collapse_whitespace(&issue.label()), LABEL_LIMIT),
                status: issue.status.as_ref().map(|status| status.name.clone()),
                spent: issue.spent_hours.map(format_hours_usually),
                timer,
            }
        })
        .collect()
}

/// `▶ 0:12:03  #42 Fix login [Web] (pinned)`
pub fn format_timer_line(row: &TimerRow) -> String {
    let marker = match row.status {
        TimerStatus::Running => "▶",
        TimerStatus::Idle => "‖",
    };
    let mut line = format!("{} {:>9}  {}", marker, row.elapsed, row.label);
    if let Some(project) = &row.project {
        line.push_str(&format!(" [{}]", project));
    }
    let mut flags = Vec::new();
    if row.pinned {
        flags.push("pinned");
    }
    if row.remembered {
        flags.push("remembered");
    }
    if !flags.is_empty() {
        line.push_str(&format!(" ({})", flags.join(", ")));
    }
    line
}

pub fn format_issue_line(row: &IssueRow) -> String {
    let mut line = row.label.clone();
    if let Some(status) = &row.status {
        line.push_str(&format!(" [{}]", status));
    }
    if let Some(spent) = &row.spent {
        line.push_str(&format!(" spent {}", spent));
    }
    if let Some(timer) = &row.timer {
        line.push_str(&format!(" timer {}", timer));
    }
    line
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_text(value: &str, limit: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    if limit <= 1 {
        return "…".to_string();
    }
    let mut truncated: String = trimmed.chars().take(limit - 1).collect();
    truncated.push('…');
    truncated
}
