//! Typed Redmine API client crate used by the timer backend.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod rate_limiter;

pub use client::{IssueQuery, RedmineClient, TimeEntryQuery};
pub use config::RedmineConfig;
pub use error::{RedmineError, Result};
pub use models::{
    Activity, CurrentUser, Issue, IssueStatus, IssueUpdate, NamedRef, Page, Project, TimeEntry,
    TimeEntryCreate, TimeEntryUpdate,
};
