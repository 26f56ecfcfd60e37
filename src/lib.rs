//! Local per-issue timers persisted in a durable store, committed to Redmine
//! as time entries.

pub mod bridge;
pub mod clock;
pub mod commit;
pub mod config;
pub mod issue_cache;
pub mod secrets;
pub mod store;
pub mod ticker;
pub mod time_format;
pub mod timer;
pub mod timer_blob;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commit::{commit_timer, CommitError, CommitOutcome, CommitRequest, TimeEntrySink};
pub use config::{Config, ConfigManager, TimerSettings};
pub use issue_cache::IssueCache;
pub use secrets::{CredentialStore, KeyringCredentials, SecretsError};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use timer::{TimerHandle, TimerRecord, TimerRegistry, TimerStatus, TimerView};

/// Initializes `env_logger` with an `info` default; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
