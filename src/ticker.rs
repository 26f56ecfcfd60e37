//! Periodic refresh of running timers for live displays.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::store::KeyValueStore;
use crate::timer::{TimerRegistry, TimerView};

/// Display refresh period.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Calls `on_tick` with the running timers every `period` until the returned
/// handle is aborted. Only reads the registry; nothing is persisted.
pub fn spawn_ticker<S, F>(
    registry: Arc<TimerRegistry<S>>,
    period: Duration,
    mut on_tick: F,
) -> JoinHandle<()>
where
    S: KeyValueStore + 'static,
    F: FnMut(Vec<TimerView>) + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            on_tick(registry.running().await);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TimerSettings;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn ticks_report_recomputed_elapsed_without_writing() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::new();
        let registry = Arc::new(TimerRegistry::new(
            store.clone(),
            TimerSettings::default(),
            Arc::new(clock.clone()),
        ));
        registry.timer(42).start().await;
        let writes_before = store.write_count();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_ticker(registry.clone(), Duration::from_millis(5), move |views| {
            let _ = tx.send(views);
        });

        let first = rx.recv().await.expect("first tick");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].issue_id, 42);

        clock.advance(3_000);
        let later = loop {
            let views = rx.recv().await.expect("tick");
            if views[0].elapsed == 3_000 {
                break views;
            }
        };
        assert!(later[0].active);

        handle.abort();
        assert_eq!(store.write_count(), writes_before);
    }
}
