//! Turns a local timer into a Redmine time entry.

use std::future::Future;

use chrono::{Local, NaiveDate};
use log::{info, warn};
use redmine_api::{RedmineClient, RedmineError, TimeEntry, TimeEntryCreate};
use thiserror::Error;

use crate::issue_cache::IssueCache;
use crate::store::KeyValueStore;
use crate::time_format::{millis_to_hours, round_time_nearest_interval};
use crate::timer::TimerRegistry;

/// Destination for committed time.
pub trait TimeEntrySink: Send + Sync {
    fn submit_time_entry(
        &self,
        entry: &TimeEntryCreate,
    ) -> impl Future<Output = redmine_api::Result<TimeEntry>> + Send;
}

impl TimeEntrySink for RedmineClient {
    async fn submit_time_entry(&self, entry: &TimeEntryCreate) -> redmine_api::Result<TimeEntry> {
        self.create_time_entry(entry).await
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("timer for issue #{0} has no time to log")]
    NothingToCommit(u64),
    #[error("failed to create time entry: {0}")]
    Remote(#[from] RedmineError),
}

/// User supplied details of the time entry.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    pub activity_id: Option<u64>,
    pub comments: Option<String>,
    /// Defaults to today in local time.
    pub spent_on: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub entry: TimeEntry,
    /// Milliseconds submitted after optional rounding.
    pub committed_ms: u64,
    pub hours: f64,
}

/// Builds the time entry that `commit_timer` would submit for `elapsed_ms`.
pub fn draft_entry(
    issue_id: u64,
    elapsed_ms: u64,
    round_to_interval: Option<u32>,
    request: CommitRequest,
) -> Result<(TimeEntryCreate, u64), CommitError> {
    let committed_ms = match round_to_interval {
        Some(interval) => round_time_nearest_interval(elapsed_ms, interval),
        None => elapsed_ms,
    };
    let hours = millis_to_hours(committed_ms);
    if hours <= 0.0 {
        return Err(CommitError::NothingToCommit(issue_id));
    }
    let comments = request
        .comments
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    let entry = TimeEntryCreate {
        issue_id,
        hours,
        activity_id: request.activity_id,
        comments,
        spent_on: Some(request.spent_on.unwrap_or_else(|| Local::now().date_naive())),
    };
    Ok((entry, committed_ms))
}

/// Submits the timer's elapsed time once. On success the timer is reset and
/// the cached issue invalidated; on failure the timer is left untouched so the
/// time can be submitted again.
pub async fn commit_timer<S, K>(
    registry: &TimerRegistry<S>,
    sink: &K,
    cache: Option<&IssueCache>,
    issue_id: u64,
    request: CommitRequest,
) -> Result<CommitOutcome, CommitError>
where
    S: KeyValueStore,
    K: TimeEntrySink,
{
    let timer = registry.timer(issue_id);
    let elapsed = timer.elapsed().await;
    let settings = registry.settings().await;
    let rounding = settings
        .round_to_nearest_interval
        .then_some(settings.rounding_interval);
    let (draft, committed_ms) = draft_entry(issue_id, elapsed, rounding, request)?;

    match sink.submit_time_entry(&draft).await {
        Ok(entry) => {
            timer.reset().await;
            if let Some(cache) = cache {
                cache.invalidate(issue_id);
            }
            info!(
                "Logged {:.2}h on issue #{} as time entry {}",
                draft.hours, issue_id, entry.id
            );
            Ok(CommitOutcome {
                entry,
                committed_ms,
                hours: draft.hours,
            })
        }
        Err(err) => {
            warn!("Time entry for issue #{} was rejected: {}", issue_id, err);
            Err(CommitError::Remote(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TimerSettings;
    use crate::store::MemoryStore;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        submitted: Mutex<Vec<TimeEntryCreate>>,
        fail: bool,
    }

    impl TimeEntrySink for RecordingSink {
        async fn submit_time_entry(&self, entry: &TimeEntryCreate) -> redmine_api::Result<TimeEntry> {
            self.submitted.lock().unwrap().push(entry.clone());
            if self.fail {
                return Err(RedmineError::Timeout("no answer".to_string()));
            }
            Ok(serde_json::from_value(serde_json::json!({
                "id": 501,
                "project": {"id": 1, "name": "Web"},
                "issue": {"id": entry.issue_id},
                "activity": {"id": entry.activity_id.unwrap_or(9), "name": "Development"},
                "hours": entry.hours,
                "spent_on": "2024-05-06"
            }))
            .unwrap())
        }
    }

    fn registry(rounding: bool) -> (TimerRegistry<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(0);
        let settings = TimerSettings {
            auto_pause_on_switch: true,
            round_to_nearest_interval: rounding,
            rounding_interval: 15,
        };
        (
            TimerRegistry::new(MemoryStore::new(), settings, Arc::new(clock.clone())),
            clock,
        )
    }

    fn cached_issue(cache: &IssueCache, id: u64) {
        cache.insert(
            serde_json::from_value(serde_json::json!({
                "id": id, "subject": "s", "project": {"id": 1, "name": "Web"}
            }))
            .unwrap(),
        );
    }

    #[tokio::test]
    async fn successful_commit_resets_timer_and_invalidates_cache() {
        let (registry, clock) = registry(false);
        let cache = IssueCache::new(Duration::from_secs(60));
        cached_issue(&cache, 42);
        registry.timer(42).start().await;
        clock.advance(5_400_000);

        let sink = RecordingSink::default();
        let outcome = commit_timer(
            &registry,
            &sink,
            Some(&cache),
            42,
            CommitRequest {
                activity_id: Some(9),
                comments: Some("  reviewed PR  ".to_string()),
                spent_on: NaiveDate::from_ymd_opt(2024, 5, 6),
            },
        )
        .await
        .expect("commit succeeds");

        assert_eq!(outcome.hours, 1.5);
        assert_eq!(outcome.entry.id, 501);
        let submitted = sink.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].comments.as_deref(), Some("reviewed PR"));
        assert!(registry.snapshot_all().await.is_empty());
        assert!(cache.get_any(42).is_none());
    }

    #[tokio::test]
    async fn failed_commit_keeps_accumulated_time() {
        let (registry, clock) = registry(false);
        registry.timer(7).start().await;
        clock.advance(600_000);
        registry.timer(7).pause().await;

        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let err = commit_timer(&registry, &sink, None, 7, CommitRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CommitError::Remote(RedmineError::Timeout(_))));
        assert_eq!(sink.submitted.lock().unwrap().len(), 1);
        assert_eq!(registry.timer(7).snapshot().await.time, 600_000);
    }

    #[tokio::test]
    async fn rounding_setting_applies_before_submission() {
        let (registry, _clock) = registry(true);
        registry.timer(3).override_time(1_380_000).await;

        let sink = RecordingSink::default();
        let outcome = commit_timer(&registry, &sink, None, 3, CommitRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.committed_ms, 1_800_000);
        assert_eq!(outcome.hours, 0.5);
    }

    #[tokio::test]
    async fn empty_timer_is_not_submitted() {
        let (registry, _clock) = registry(true);
        registry.timer(4).override_time(400_000).await;

        let sink = RecordingSink::default();
        let err = commit_timer(&registry, &sink, None, 4, CommitRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::NothingToCommit(4)));
        assert!(sink.submitted.lock().unwrap().is_empty());
        assert_eq!(registry.timer(4).elapsed().await, 400_000);
    }

    #[test]
    fn draft_defaults_spent_on_to_today_and_drops_blank_comments() {
        let (entry, committed) = draft_entry(
            1,
            3_600_000,
            None,
            CommitRequest {
                comments: Some("   ".to_string()),
                ..CommitRequest::default()
            },
        )
        .unwrap();
        assert_eq!(committed, 3_600_000);
        assert_eq!(entry.hours, 1.0);
        assert!(entry.comments.is_none());
        assert_eq!(entry.spent_on, Some(Local::now().date_naive()));
    }
}
