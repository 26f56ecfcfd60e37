use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::NamedRef;

#[derive(Debug, Deserialize, Clone)]
pub struct TimeEntry {
    pub id: u64,
    pub project: NamedRef,
    #[serde(default)]
    pub issue: Option<IssueRef>,
    #[serde(default)]
    pub user: Option<NamedRef>,
    pub activity: NamedRef,
    pub hours: f64,
    #[serde(default)]
    pub comments: Option<String>,
    pub spent_on: NaiveDate,
    #[serde(default)]
    pub created_on: Option<String>,
}

/// Issues are embedded in time entries by id only.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub id: u64,
}

#[derive(Debug, Serialize, Clone)]
pub struct TimeEntryCreate {
    pub issue_id: u64,
    pub hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent_on: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct TimeEntryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent_on: Option<NaiveDate>,
}
