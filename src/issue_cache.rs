//! In-memory issue cache with per-entry staleness, used to enrich timers
//! without refetching an issue on every read.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use redmine_api::Issue;

struct CachedIssue {
    issue: Issue,
    fetched_at: Instant,
}

/// Thread-safe issue snapshot store; clones share the same entries.
#[derive(Clone)]
pub struct IssueCache {
    entries: Arc<Mutex<HashMap<u64, CachedIssue>>>,
    stale_after: Duration,
}

impl IssueCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            stale_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CachedIssue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the snapshot with a freshly fetched issue list.
    pub fn replace_all(&self, issues: Vec<Issue>) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.clear();
        for issue in issues {
            entries.insert(issue.id, CachedIssue {
                issue,
                fetched_at: now,
            });
        }
    }

    pub fn insert(&self, issue: Issue) {
        self.lock().insert(issue.id, CachedIssue {
            issue,
            fetched_at: Instant::now(),
        });
    }

    /// Returns the cached issue only while it is younger than the stale time.
    pub fn get_fresh(&self, issue_id: u64) -> Option<Issue> {
        self.lock()
            .get(&issue_id)
            .filter(|cached| cached.fetched_at.elapsed() < self.stale_after)
            .map(|cached| cached.issue.clone())
    }

    /// Returns the cached issue regardless of age, for display labels.
    pub fn get_any(&self, issue_id: u64) -> Option<Issue> {
        self.lock().get(&issue_id).map(|cached| cached.issue.clone())
    }

    pub fn is_stale(&self, issue_id: u64) -> bool {
        self.get_fresh(issue_id).is_none()
    }

    /// Returns a fresh cached issue or fetches and caches it.
    pub async fn get_or_fetch<F, Fut, E>(&self, issue_id: u64, fetch: F) -> Result<Issue, E>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<Issue, E>>,
    {
        if let Some(issue) = self.get_fresh(issue_id) {
            return Ok(issue);
        }
        let issue = fetch(issue_id).await?;
        self.insert(issue.clone());
        Ok(issue)
    }

    /// Drops one issue so the next read refetches it, e.g. after logging time.
    pub fn invalidate(&self, issue_id: u64) {
        self.lock().remove(&issue_id);
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    /// Cached issues ordered by id.
    pub fn snapshot(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .lock()
            .values()
            .map(|cached| cached.issue.clone())
            .collect();
        issues.sort_by_key(|issue| issue.id);
        issues
    }
}
