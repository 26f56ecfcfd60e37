use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use redmine_api::models::default_activity;
use redmine_api::{IssueQuery, RedmineClient, RedmineConfig, RedmineError};
use serde::Serialize;

use redmine_timer_lib::bridge::{self, TimerRow};
use redmine_timer_lib::config::default_data_dir;
use redmine_timer_lib::secrets::{
    migrate_file_key, with_stored_api_key, CredentialStore, KeyringCredentials,
};
use redmine_timer_lib::ticker::{spawn_ticker, TICK_PERIOD};
use redmine_timer_lib::time_format::{format_hours_usually, format_timer, parse_duration_input};
use redmine_timer_lib::{
    commit_timer, init_logging, CommitRequest, Config, ConfigManager, FileStore, IssueCache,
    SystemClock, TimerRegistry, TimerView,
};

/// Interval at which `watch` re-reads timers written by other invocations.
const WATCH_RELOAD_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "redmine-timer", version, about = "Track time on Redmine issues")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List local timers
    List,
    /// Start (or resume) the timer of an issue
    Start { issue: u64 },
    /// Pause the timer of an issue
    Pause { issue: u64 },
    /// Zero the timer of an issue
    Reset { issue: u64 },
    /// Replace the tracked time, e.g. `1:30`, `1h 30m` or `1.5`
    Set { issue: u64, duration: String },
    /// Pin a timer to the top of the list
    Pin {
        issue: u64,
        #[arg(long)]
        off: bool,
    },
    /// Keep an issue listed even when it is not assigned to you
    Remember {
        issue: u64,
        #[arg(long)]
        off: bool,
    },
    /// Log the tracked time as a Redmine time entry and reset the timer
    Done {
        issue: u64,
        /// Time entry activity id (defaults to the configured or server default)
        #[arg(long)]
        activity: Option<u64>,
        #[arg(long, short)]
        comment: Option<String>,
        /// Spent-on date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Live view of running timers
    Watch,
    /// Open issues assigned to you plus pinned and remembered ones
    Issues,
    /// Time entry activities available on the server
    Activities,
    /// Settings management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Set the Redmine base URL
    SetUrl { url: String },
    /// Store the Redmine API key in the OS keyring
    SetKey { key: String },
    /// Remove the Redmine API key from the OS keyring
    ClearKey,
    /// Pause other timers when one starts (`on`/`off`)
    AutoPause {
        #[arg(value_parser = parse_switch)]
        enabled: bool,
    },
    /// Round committed time to N minutes, or `off`
    Rounding { value: String },
    /// Default time entry activity id
    Activity { id: u64 },
}

fn is_not_found(err: &RedmineError) -> bool {
    err.status().map(|status| status.as_u16()) == Some(404)
}

/// Loads settings with the API key resolved from the environment, then the
/// keyring. A key left in an older settings file is moved into the keyring.
fn load_settings(manager: &ConfigManager, credentials: &dyn CredentialStore) -> Config {
    let config = manager.load();
    match migrate_file_key(&config, credentials) {
        Ok(true) => {
            if let Err(err) = manager.save(&config) {
                warn!("Could not rewrite {}: {}", manager.path().display(), err);
            }
        }
        Ok(false) => {}
        Err(err) => warn!("Could not move API key into the keyring: {}", err),
    }
    with_stored_api_key(config, credentials).with_env_overrides()
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(format!("expected on/off, got `{other}`")),
    }
}

struct App {
    config: Config,
    registry: TimerRegistry<FileStore>,
    cache: IssueCache,
    json: bool,
}

impl App {
    async fn open(json: bool) -> Result<Self, String> {
        let manager =
            ConfigManager::new().ok_or_else(|| "Could not determine config directory".to_string())?;
        let config = load_settings(&manager, &KeyringCredentials::new());
        let data_dir =
            default_data_dir().ok_or_else(|| "Could not determine data directory".to_string())?;
        let registry = TimerRegistry::load(
            FileStore::new(data_dir),
            config.timer_settings(),
            Arc::new(SystemClock),
        )
        .await;
        let cache = IssueCache::new(Duration::from_secs(config.cache_stale_secs));
        Ok(Self {
            config,
            registry,
            cache,
            json,
        })
    }

    fn client(&self) -> Result<RedmineClient, String> {
        if !self.config.has_remote() {
            return Err(
                "Redmine is not configured; run `config set-url` and `config set-key` \
                 or set REDMINE_URL and REDMINE_API_KEY"
                    .to_string(),
            );
        }
        RedmineClient::new(RedmineConfig::new(
            self.config.redmine_url.clone(),
            self.config.api_key.clone(),
        ))
        .map_err(|err| err.to_string())
    }

    /// Refreshes cached issue details for the given timers; failures only degrade labels.
    async fn enrich(&self, views: &[TimerView]) {
        if !self.config.has_remote() || views.is_empty() {
            return;
        }
        let missing: Vec<u64> = views
            .iter()
            .map(|view| view.issue_id)
            .filter(|id| self.cache.is_stale(*id))
            .collect();
        if missing.is_empty() {
            return;
        }
        let result = match self.client() {
            Ok(client) => client
                .all_issues(&IssueQuery::by_ids(missing))
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err),
        };
        match result {
            Ok(issues) => issues.into_iter().for_each(|issue| self.cache.insert(issue)),
            Err(err) => warn!("Could not load issue details: {}", err),
        }
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<(), String> {
        if self.json {
            let out = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
            println!("{}", out);
        } else {
            println!("{}", text());
        }
        Ok(())
    }

    async fn print_timer(&self, view: TimerView) -> Result<(), String> {
        self.enrich(&[view]).await;
        let row = bridge::timer_rows(&[view], &self.cache).remove(0);
        self.print(&row, || bridge::format_timer_line(&row))
    }

    async fn list(&self) -> Result<(), String> {
        let views = self.registry.snapshot_all().await;
        self.enrich(&views).await;
        let rows = bridge::timer_rows(&views, &self.cache);
        self.print(&rows, || {
            if rows.is_empty() {
                "No timers".to_string()
            } else {
                rows.iter()
                    .map(bridge::format_timer_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        })
    }

    /// Confirms the issue exists before tracking it; offline or auth problems
    /// only warn so tracking keeps working without the server.
    async fn validate_issue(&self, issue_id: u64) -> Result<(), String> {
        if !self.config.has_remote() {
            return Ok(());
        }
        let client = self.client()?;
        let lookup = self
            .cache
            .get_or_fetch(issue_id, |id| client.get_issue(id))
            .await;
        match lookup {
            Ok(issue) => {
                info!("Tracking {}", issue.label());
                Ok(())
            }
            Err(err) if is_not_found(&err) => Err(format!("Issue #{} not found", issue_id)),
            Err(err) => {
                warn!("Could not verify issue #{}: {}", issue_id, err);
                Ok(())
            }
        }
    }

    async fn done(
        &self,
        issue_id: u64,
        activity: Option<u64>,
        comment: Option<String>,
        date: Option<NaiveDate>,
    ) -> Result<(), String> {
        let client = self.client()?;
        let activity_id = match activity.or(self.config.default_activity_id) {
            Some(id) => Some(id),
            None => match client.activities().await {
                Ok(activities) => default_activity(&activities).map(|activity| activity.id),
                Err(err) => {
                    warn!("Could not load activities: {}", err);
                    None
                }
            },
        };
        let request = CommitRequest {
            activity_id,
            comments: comment,
            spent_on: date,
        };
        let outcome = commit_timer(&self.registry, &client, Some(&self.cache), issue_id, request)
            .await
            .map_err(|err| err.to_string())?;
        let summary = CommitSummary {
            issue_id,
            time_entry_id: outcome.entry.id,
            hours: outcome.hours,
            spent_on: outcome.entry.spent_on.to_string(),
        };
        self.print(&summary, || {
            format!(
                "Logged {} ({:.2}h) on #{} as time entry {}",
                format_hours_usually(outcome.hours),
                outcome.hours,
                issue_id,
                outcome.entry.id
            )
        })
    }

    async fn issues(&self) -> Result<(), String> {
        let client = self.client()?;
        let mut issues = client
            .all_issues(&IssueQuery::assigned_to_me())
            .await
            .map_err(|err| err.to_string())?;
        let views = self.registry.snapshot_all().await;

        let listed: HashSet<u64> = issues.iter().map(|issue| issue.id).collect();
        let kept: Vec<u64> = views
            .iter()
            .filter(|view| (view.pinned || view.remembered) && !listed.contains(&view.issue_id))
            .map(|view| view.issue_id)
            .collect();
        if !kept.is_empty() {
            match client.all_issues(&IssueQuery::by_ids(kept)).await {
                Ok(extra) => issues.extend(extra),
                Err(err) => warn!("Could not load remembered issues: {}", err),
            }
        }
        self.cache.replace_all(issues.clone());

        let rows = bridge::issue_rows(&issues, &views);
        self.print(&rows, || {
            if rows.is_empty() {
                "No open issues assigned to you".to_string()
            } else {
                rows.iter()
                    .map(bridge::format_issue_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        })
    }

    async fn activities(&self) -> Result<(), String> {
        let client = self.client()?;
        let activities = client.activities().await.map_err(|err| err.to_string())?;
        let lines: Vec<ActivityLine> = activities
            .iter()
            .filter(|activity| activity.active)
            .map(|activity| ActivityLine {
                id: activity.id,
                name: activity.name.clone(),
                is_default: activity.is_default,
            })
            .collect();
        self.print(&lines, || {
            lines
                .iter()
                .map(|line| {
                    let marker = if line.is_default { " (default)" } else { "" };
                    format!("{:>4}  {}{}", line.id, line.name, marker)
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    async fn watch(self) -> Result<(), String> {
        let views = self.registry.snapshot_all().await;
        self.enrich(&views).await;

        let registry = Arc::new(self.registry);
        let cache = self.cache.clone();
        let ticker = spawn_ticker(registry.clone(), TICK_PERIOD, move |running| {
            if running.is_empty() {
                println!("No running timers");
                return;
            }
            let rows: Vec<TimerRow> = bridge::timer_rows(&running, &cache);
            let line = rows
                .iter()
                .map(|row| format!("{} {}", row.elapsed, row.label))
                .collect::<Vec<_>>()
                .join(" | ");
            println!("{}", line);
        });
        let reloader = {
            let registry = registry.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(WATCH_RELOAD_PERIOD).await;
                    registry.reload().await;
                }
            })
        };

        let result = tokio::signal::ctrl_c().await.map_err(|err| err.to_string());
        ticker.abort();
        reloader.abort();
        result
    }
}

#[derive(Serialize)]
struct CommitSummary {
    issue_id: u64,
    time_entry_id: u64,
    hours: f64,
    spent_on: String,
}

#[derive(Serialize)]
struct ActivityLine {
    id: u64,
    name: String,
    is_default: bool,
}

#[derive(Serialize)]
struct SettingsView<'a> {
    config_path: String,
    redmine_url: &'a str,
    api_key_set: bool,
    auto_pause_on_switch: bool,
    round_to_nearest_interval: bool,
    rounding_interval: u32,
    cache_stale_secs: u64,
    default_activity_id: Option<u64>,
}

fn run_config(action: ConfigAction, json: bool) -> Result<(), String> {
    let manager =
        ConfigManager::new().ok_or_else(|| "Could not determine config directory".to_string())?;
    let credentials = KeyringCredentials::new();
    let mut config = manager.load();

    match action {
        ConfigAction::Show => {
            let effective = with_stored_api_key(config, &credentials).with_env_overrides();
            let view = SettingsView {
                config_path: manager.path().display().to_string(),
                redmine_url: &effective.redmine_url,
                api_key_set: !effective.api_key.is_empty(),
                auto_pause_on_switch: effective.auto_pause_on_switch,
                round_to_nearest_interval: effective.round_to_nearest_interval,
                rounding_interval: effective.rounding_interval,
                cache_stale_secs: effective.cache_stale_secs,
                default_activity_id: effective.default_activity_id,
            };
            let out = if json {
                serde_json::to_string_pretty(&view).map_err(|err| err.to_string())?
            } else {
                let rounding = if view.round_to_nearest_interval {
                    format!("{} min", view.rounding_interval)
                } else {
                    "off".to_string()
                };
                format!(
                    "config: {}\nurl: {}\napi key: {}\nauto-pause: {}\nrounding: {}\ndefault activity: {}",
                    view.config_path,
                    if view.redmine_url.is_empty() { "-" } else { view.redmine_url },
                    if view.api_key_set { "set" } else { "not set" },
                    if view.auto_pause_on_switch { "on" } else { "off" },
                    rounding,
                    view.default_activity_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "server default".to_string()),
                )
            };
            println!("{}", out);
            return Ok(());
        }
        ConfigAction::SetUrl { url } => config.redmine_url = url,
        ConfigAction::SetKey { key } => {
            credentials.set_api_key(&key).map_err(|err| err.to_string())?;
            config.api_key.clear();
            info!("Stored API key in the keyring");
        }
        ConfigAction::ClearKey => {
            credentials.clear_api_key().map_err(|err| err.to_string())?;
            config.api_key.clear();
            info!("Removed API key from the keyring");
        }
        ConfigAction::AutoPause { enabled } => config.auto_pause_on_switch = enabled,
        ConfigAction::Rounding { value } => {
            if parse_switch(&value) == Ok(false) {
                config.round_to_nearest_interval = false;
            } else {
                let minutes: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("expected minutes or `off`, got `{}`", value))?;
                config.round_to_nearest_interval = true;
                config.rounding_interval = minutes;
            }
        }
        ConfigAction::Activity { id } => config.default_activity_id = Some(id),
    }

    // Saving drops a key still held in the file, so it has to reach the keyring first.
    migrate_file_key(&config, &credentials)
        .map_err(|err| format!("Could not move API key into the keyring: {err}"))?;
    let config = config.normalized();
    manager.save(&config).map_err(|err| err.to_string())?;
    info!("Saved settings to {}", manager.path().display());
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    let json = cli.json;
    let command = match cli.command {
        Commands::Config { action } => return run_config(action, json),
        command => command,
    };

    let app = App::open(json).await?;
    match command {
        Commands::List => app.list().await,
        Commands::Start { issue } => {
            app.validate_issue(issue).await?;
            let view = app.registry.timer(issue).start().await;
            app.print_timer(view).await
        }
        Commands::Pause { issue } => {
            let view = app.registry.timer(issue).pause().await;
            app.print_timer(view).await
        }
        Commands::Reset { issue } => match app.registry.timer(issue).reset().await {
            Some(view) => app.print_timer(view).await,
            None => app.print(&serde_json::json!({ "issue_id": issue, "removed": true }), || {
                format!("Timer for #{} removed", issue)
            }),
        },
        Commands::Set { issue, duration } => {
            let time = parse_duration_input(&duration)
                .ok_or_else(|| format!("Unrecognized duration `{}`", duration))?;
            let view = app.registry.timer(issue).override_time(time).await;
            info!("Timer for #{} set to {}", issue, format_timer(time as i64));
            app.print_timer(view).await
        }
        Commands::Pin { issue, off } => {
            let view = app.registry.timer(issue).set_pinned(!off).await;
            app.print_timer(view).await
        }
        Commands::Remember { issue, off } => {
            let view = app.registry.timer(issue).set_remembered(!off).await;
            app.print_timer(view).await
        }
        Commands::Done {
            issue,
            activity,
            comment,
            date,
        } => app.done(issue, activity, comment, date).await,
        Commands::Watch => app.watch().await,
        Commands::Issues => app.issues().await,
        Commands::Activities => app.activities().await,
        Commands::Config { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
