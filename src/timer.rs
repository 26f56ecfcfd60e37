//! Per-issue timer registry used for local time tracking.
//!
//! Only the accumulated `time` and the `start` of the current run are stored;
//! the running value is recomputed from the clock on every read, so restarts
//! of the process do not lose tracked time.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::TimerSettings;
use crate::store::KeyValueStore;
use crate::timer_blob;

/// Store key holding the whole registry blob.
pub const TIMERS_KEY: &str = "timers";

pub type TimerMap = BTreeMap<u64, TimerRecord>;

/// Persisted state of one issue's timer. `start` is set exactly while `active`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub active: bool,
    /// Milliseconds since the Unix epoch when the current run began.
    pub start: Option<i64>,
    /// Milliseconds accumulated before the current run.
    pub time: u64,
    pub pinned: bool,
    pub remembered: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Idle,
    Running,
}

impl TimerRecord {
    /// Accumulated time plus the current run, never negative.
    pub fn elapsed_at(&self, now: i64) -> u64 {
        match (self.active, self.start) {
            (true, Some(start)) => {
                let run = now.saturating_sub(start).max(0) as u64;
                self.time.saturating_add(run)
            }
            _ => self.time,
        }
    }

    pub fn status(&self) -> TimerStatus {
        if self.active {
            TimerStatus::Running
        } else {
            TimerStatus::Idle
        }
    }

    /// Reset records that nobody asked to keep are removed from the registry.
    pub fn is_disposable(&self) -> bool {
        !self.pinned && !self.remembered
    }

    fn start_at(&mut self, now: i64) {
        if self.active {
            return;
        }
        self.active = true;
        self.start = Some(now);
    }

    fn pause_at(&mut self, now: i64) {
        if !self.active {
            return;
        }
        self.time = self.elapsed_at(now);
        self.active = false;
        self.start = None;
    }

    fn clear(&mut self) {
        self.time = 0;
        self.active = false;
        self.start = None;
    }

    fn override_at(&mut self, time: u64, now: i64) {
        self.time = time;
        if self.active {
            self.start = Some(now);
        }
    }
}

/// Read view of one timer at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimerView {
    pub issue_id: u64,
    pub status: TimerStatus,
    pub active: bool,
    pub start: Option<i64>,
    pub time: u64,
    pub pinned: bool,
    pub remembered: bool,
    /// Current elapsed time in milliseconds.
    pub elapsed: u64,
}

impl TimerView {
    fn new(issue_id: u64, record: &TimerRecord, now: i64) -> Self {
        Self {
            issue_id,
            status: record.status(),
            active: record.active,
            start: record.start,
            time: record.time,
            pinned: record.pinned,
            remembered: record.remembered,
            elapsed: record.elapsed_at(now),
        }
    }
}

struct RegistryState {
    timers: TimerMap,
    settings: TimerSettings,
}

/// In-memory projection of the stored timers for one surface of the app.
///
/// Each mutation rewrites the whole blob. Several registries on the same store
/// do not coordinate; the last writer's blob wins.
pub struct TimerRegistry<S> {
    store: S,
    clock: Arc<dyn Clock>,
    state: Mutex<RegistryState>,
}

impl<S: KeyValueStore> TimerRegistry<S> {
    /// Creates an empty registry without reading the store.
    pub fn new(store: S, settings: TimerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            state: Mutex::new(RegistryState {
                timers: TimerMap::new(),
                settings,
            }),
        }
    }

    /// Creates a registry populated from the stored blob.
    pub async fn load(store: S, settings: TimerSettings, clock: Arc<dyn Clock>) -> Self {
        let registry = Self::new(store, settings, clock);
        registry.reload().await;
        registry
    }

    /// Replaces the in-memory timers with the stored blob, e.g. after another
    /// surface wrote it. Read or decode failures leave an empty registry.
    pub async fn reload(&self) {
        let timers = self.read_stored().await;
        let mut state = self.state.lock().await;
        debug!("Loaded {} timers from store", timers.len());
        state.timers = timers;
    }

    async fn read_stored(&self) -> TimerMap {
        let blob = match self.store.get(TIMERS_KEY).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return TimerMap::new(),
            Err(err) => {
                warn!("Failed to read timers from store: {}", err);
                return TimerMap::new();
            }
        };
        match timer_blob::decode(&blob, self.clock.now_millis()) {
            Ok(decoded) => {
                if decoded.legacy {
                    info!("Migrating {} timers from legacy layout", decoded.timers.len());
                }
                if decoded.repaired > 0 || decoded.dropped > 0 {
                    warn!(
                        "Stored timers needed repair: {} normalized, {} dropped",
                        decoded.repaired, decoded.dropped
                    );
                }
                decoded.timers
            }
            Err(err) => {
                warn!("Discarding stored timers: {}", err);
                TimerMap::new()
            }
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn settings(&self) -> TimerSettings {
        self.state.lock().await.settings
    }

    pub async fn update_settings(&self, settings: TimerSettings) {
        self.state.lock().await.settings = settings;
    }

    /// Handle bound to one issue's timer.
    pub fn timer(&self, issue_id: u64) -> TimerHandle<'_, S> {
        TimerHandle {
            registry: self,
            issue_id,
        }
    }

    pub async fn active_timer_count(&self) -> usize {
        let state = self.state.lock().await;
        state.timers.values().filter(|record| record.active).count()
    }

    /// Every known timer, pinned ones first, then by issue id.
    pub async fn snapshot_all(&self) -> Vec<TimerView> {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        let mut views: Vec<TimerView> = state
            .timers
            .iter()
            .map(|(id, record)| TimerView::new(*id, record, now))
            .collect();
        views.sort_by_key(|view| (!view.pinned, view.issue_id));
        views
    }

    pub async fn running(&self) -> Vec<TimerView> {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        state
            .timers
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(id, record)| TimerView::new(*id, record, now))
            .collect()
    }

    async fn view(&self, issue_id: u64) -> TimerView {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        let record = state.timers.get(&issue_id).copied().unwrap_or_default();
        TimerView::new(issue_id, &record, now)
    }

    /// Applies `apply` to the whole registry and writes the full blob back.
    /// The lock is held through the write so this surface never interleaves
    /// its own read-modify-write cycles.
    async fn mutate<R>(&self, apply: impl FnOnce(&mut RegistryState, i64) -> R) -> R {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        let result = apply(&mut *state, now);
        self.persist(&state.timers).await;
        result
    }

    async fn persist(&self, timers: &TimerMap) {
        let blob = match timer_blob::encode(timers) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("Failed to encode timers: {}", err);
                return;
            }
        };
        if let Err(err) = self.store.set(TIMERS_KEY, blob).await {
            warn!("Failed to persist timers: {}", err);
        }
    }
}

/// Timer operations bound to a single issue id.
pub struct TimerHandle<'a, S> {
    registry: &'a TimerRegistry<S>,
    issue_id: u64,
}

impl<S: KeyValueStore> TimerHandle<'_, S> {
    pub fn issue_id(&self) -> u64 {
        self.issue_id
    }

    /// Current state; unknown issues read as an idle zero timer without being created.
    pub async fn snapshot(&self) -> TimerView {
        self.registry.view(self.issue_id).await
    }

    pub async fn elapsed(&self) -> u64 {
        self.snapshot().await.elapsed
    }

    /// Starts the timer. With auto-pause enabled every other running timer is
    /// paused in the same write. Starting a running timer keeps its run.
    pub async fn start(&self) -> TimerView {
        let issue_id = self.issue_id;
        self.registry
            .mutate(|state, now| {
                if state.settings.auto_pause_on_switch {
                    for (id, record) in state.timers.iter_mut() {
                        if *id != issue_id && record.active {
                            record.pause_at(now);
                            debug!("Auto-paused timer for issue #{}", id);
                        }
                    }
                }
                let record = state.timers.entry(issue_id).or_default();
                record.start_at(now);
                TimerView::new(issue_id, record, now)
            })
            .await
    }

    /// Folds the current run into `time` and stops. Idle timers are unchanged.
    pub async fn pause(&self) -> TimerView {
        let issue_id = self.issue_id;
        self.registry
            .mutate(|state, now| {
                let record = state.timers.entry(issue_id).or_default();
                record.pause_at(now);
                TimerView::new(issue_id, record, now)
            })
            .await
    }

    /// Zeroes the timer. Returns `None` when the record was removed because it
    /// was neither pinned nor remembered.
    pub async fn reset(&self) -> Option<TimerView> {
        let issue_id = self.issue_id;
        self.registry
            .mutate(|state, now| {
                let record = state.timers.entry(issue_id).or_default();
                record.clear();
                if record.is_disposable() {
                    state.timers.remove(&issue_id);
                    None
                } else {
                    Some(TimerView::new(issue_id, record, now))
                }
            })
            .await
    }

    /// Replaces the accumulated time; a running timer restarts its run from now.
    pub async fn override_time(&self, time: u64) -> TimerView {
        let issue_id = self.issue_id;
        self.registry
            .mutate(|state, now| {
                let record = state.timers.entry(issue_id).or_default();
                record.override_at(time, now);
                TimerView::new(issue_id, record, now)
            })
            .await
    }

    pub async fn set_pinned(&self, pinned: bool) -> TimerView {
        self.update_flags(|record| record.pinned = pinned).await
    }

    pub async fn set_remembered(&self, remembered: bool) -> TimerView {
        self.update_flags(|record| record.remembered = remembered).await
    }

    pub async fn set_both(&self, pinned: bool, remembered: bool) -> TimerView {
        self.update_flags(|record| {
            record.pinned = pinned;
            record.remembered = remembered;
        })
        .await
    }

    async fn update_flags(&self, apply: impl FnOnce(&mut TimerRecord)) -> TimerView {
        let issue_id = self.issue_id;
        self.registry
            .mutate(|state, now| {
                let record = state.timers.entry(issue_id).or_default();
                apply(record);
                TimerView::new(issue_id, record, now)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, StoreError};
    use std::future::Future;

    fn settings(auto_pause: bool) -> TimerSettings {
        TimerSettings {
            auto_pause_on_switch: auto_pause,
            ..TimerSettings::default()
        }
    }

    fn registry(auto_pause: bool) -> (TimerRegistry<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(0);
        let registry =
            TimerRegistry::new(MemoryStore::new(), settings(auto_pause), Arc::new(clock.clone()));
        (registry, clock)
    }

    async fn stored_records(registry: &TimerRegistry<MemoryStore>) -> TimerMap {
        let blob = registry.store().get(TIMERS_KEY).await.unwrap().unwrap();
        timer_blob::decode(&blob, 0).unwrap().timers
    }

    async fn assert_invariant(registry: &TimerRegistry<MemoryStore>) {
        for view in registry.snapshot_all().await {
            assert_eq!(view.active, view.start.is_some(), "issue #{}", view.issue_id);
        }
    }

    #[tokio::test]
    async fn start_then_pause_records_exact_elapsed() {
        let (registry, clock) = registry(true);
        let timer = registry.timer(42);

        timer.start().await;
        clock.set(65_000);
        let paused = timer.pause().await;

        assert_eq!(paused.elapsed, 65_000);
        let stored = stored_records(&registry).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[&42],
            TimerRecord {
                active: false,
                start: None,
                time: 65_000,
                pinned: false,
                remembered: false,
            }
        );
    }

    #[tokio::test]
    async fn elapsed_grows_while_running_and_survives_pause_resume() {
        let (registry, clock) = registry(true);
        let timer = registry.timer(1);

        timer.start().await;
        let mut last = 0;
        for _ in 0..5 {
            clock.advance(1_234);
            let elapsed = timer.elapsed().await;
            assert!(elapsed >= last);
            last = elapsed;
        }

        let before = timer.elapsed().await;
        timer.pause().await;
        assert_eq!(timer.elapsed().await, before);
        timer.start().await;
        assert_eq!(timer.elapsed().await, before);

        clock.advance(500);
        assert_eq!(timer.elapsed().await, before + 500);
        assert_invariant(&registry).await;
    }

    #[tokio::test]
    async fn starting_a_running_timer_keeps_its_run() {
        let (registry, clock) = registry(true);
        let timer = registry.timer(5);
        timer.start().await;
        clock.advance(10_000);
        let view = timer.start().await;
        assert_eq!(view.elapsed, 10_000);
        assert_eq!(view.start, Some(0));
    }

    #[tokio::test]
    async fn reset_removes_plain_timers_and_keeps_pinned_or_remembered() {
        let (registry, clock) = registry(false);

        registry.timer(1).start().await;
        registry.timer(2).set_pinned(true).await;
        registry.timer(2).start().await;
        registry.timer(3).set_remembered(true).await;
        registry.timer(3).override_time(9_000).await;
        clock.advance(3_000);

        assert!(registry.timer(1).reset().await.is_none());
        let pinned = registry.timer(2).reset().await.expect("pinned timer kept");
        let remembered = registry.timer(3).reset().await.expect("remembered timer kept");

        for view in [pinned, remembered] {
            assert_eq!(view.time, 0);
            assert!(!view.active);
            assert!(view.start.is_none());
        }
        let stored = stored_records(&registry).await;
        assert_eq!(stored.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn auto_pause_leaves_a_single_running_timer() {
        let (registry, clock) = registry(true);

        registry.timer(1).start().await;
        clock.advance(2_000);
        registry.timer(2).start().await;
        clock.advance(3_000);
        let two_before = registry.timer(2).elapsed().await;
        assert_eq!(two_before, 3_000);

        registry.timer(3).start().await;

        assert_eq!(registry.active_timer_count().await, 1);
        let two = registry.timer(2).snapshot().await;
        assert_eq!(two.status, TimerStatus::Idle);
        assert_eq!(two.time, two_before);
        assert_eq!(registry.timer(1).snapshot().await.time, 2_000);
        assert!(registry.timer(3).snapshot().await.active);
        assert_invariant(&registry).await;
    }

    #[tokio::test]
    async fn without_auto_pause_timers_run_concurrently() {
        let (registry, clock) = registry(false);

        for id in [1, 2, 3] {
            registry.timer(id).start().await;
            clock.advance(1_000);
        }

        assert_eq!(registry.active_timer_count().await, 3);
        let running = registry.running().await;
        let elapsed: Vec<u64> = running.iter().map(|view| view.elapsed).collect();
        assert_eq!(elapsed, vec![3_000, 2_000, 1_000]);
    }

    #[tokio::test]
    async fn override_sets_time_and_restarts_running_run() {
        let (registry, clock) = registry(true);
        let idle = registry.timer(8);
        idle.override_time(123_456).await;
        assert_eq!(idle.elapsed().await, 123_456);

        let running = registry.timer(9);
        running.start().await;
        clock.advance(50_000);
        let view = running.override_time(60_000).await;
        assert!(view.active);
        assert_eq!(view.elapsed, 60_000);
        clock.advance(1_000);
        assert_eq!(running.elapsed().await, 61_000);
    }

    #[tokio::test]
    async fn flags_do_not_touch_timing() {
        let (registry, clock) = registry(true);
        let timer = registry.timer(4);
        timer.start().await;
        clock.advance(700);

        let view = timer.set_both(true, true).await;
        assert!(view.pinned && view.remembered && view.active);
        assert_eq!(view.elapsed, 700);

        let view = timer.set_pinned(false).await;
        assert!(!view.pinned && view.remembered);
        assert_eq!(view.start, Some(0));
    }

    #[tokio::test]
    async fn reading_an_unknown_issue_does_not_create_it() {
        let (registry, _clock) = registry(true);
        let view = registry.timer(77).snapshot().await;
        assert_eq!(view.elapsed, 0);
        assert!(registry.snapshot_all().await.is_empty());
        assert_eq!(registry.store().write_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_all_lists_pinned_first() {
        let (registry, _clock) = registry(false);
        registry.timer(5).override_time(1).await;
        registry.timer(9).set_pinned(true).await;
        registry.timer(2).override_time(1).await;

        let order: Vec<u64> = registry
            .snapshot_all()
            .await
            .iter()
            .map(|view| view.issue_id)
            .collect();
        assert_eq!(order, vec![9, 2, 5]);
    }

    #[tokio::test]
    async fn running_time_survives_a_fresh_registry() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(1_000);
        let first = TimerRegistry::new(store.clone(), settings(true), Arc::new(clock.clone()));
        first.timer(42).override_time(10_000).await;
        first.timer(42).start().await;
        drop(first);

        clock.advance(30_000);
        let reopened = TimerRegistry::load(store, settings(true), Arc::new(clock.clone())).await;
        let view = reopened.timer(42).snapshot().await;
        assert!(view.active);
        assert_eq!(view.elapsed, 40_000);
    }

    #[tokio::test]
    async fn reload_picks_up_another_surface_and_last_writer_wins() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(0);
        let popup = TimerRegistry::new(store.clone(), settings(false), Arc::new(clock.clone()));
        let popout = TimerRegistry::new(store.clone(), settings(false), Arc::new(clock.clone()));

        popup.timer(1).start().await;
        popout.timer(2).start().await;

        popup.reload().await;
        let ids: Vec<u64> = popup.snapshot_all().await.iter().map(|v| v.issue_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn update_settings_changes_auto_pause_policy() {
        let (registry, _clock) = registry(true);
        registry.update_settings(settings(false)).await;
        registry.timer(1).start().await;
        registry.timer(2).start().await;
        assert_eq!(registry.active_timer_count().await, 2);
        assert!(!registry.settings().await.auto_pause_on_switch);
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send {
            async { Err(StoreError::Io(std::io::Error::other("disk gone"))) }
        }

        fn set(&self, _key: &str, _value: String) -> impl Future<Output = Result<(), StoreError>> + Send {
            async { Err(StoreError::Io(std::io::Error::other("disk gone"))) }
        }
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let clock = ManualClock::new(0);
        let registry = TimerRegistry::load(BrokenStore, settings(true), Arc::new(clock.clone())).await;
        assert!(registry.snapshot_all().await.is_empty());

        registry.timer(3).start().await;
        clock.advance(2_000);
        assert_eq!(registry.timer(3).pause().await.time, 2_000);
    }

    #[tokio::test]
    async fn corrupt_blob_falls_back_to_empty_registry() {
        let store = MemoryStore::new();
        store.set(TIMERS_KEY, "{{{".to_string()).await.unwrap();
        let registry =
            TimerRegistry::load(store, settings(true), Arc::new(ManualClock::new(0))).await;
        assert!(registry.snapshot_all().await.is_empty());
    }
}
