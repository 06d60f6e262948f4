use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tidy_monster::logging;
use tidy_monster::retry::BackoffPolicy;
use tidy_monster::settings::{
    self, CachedStore, EnvOverride, KeyValueStore, ShortcutFilter, TomlFileStore, WatchSettings,
};
use tidy_monster::tidy::{file_delete_action, settings_factory, TidyOrchestrator};

/// Keeps desktops free of shortcuts by deleting them as they appear.
#[derive(Parser, Debug)]
#[command(name = "tidy", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the desktop and delete shortcuts until interrupted.
    Run(RunArgs),
    /// Read or change persisted settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory to watch instead of the desktop (repeatable).
    #[arg(long = "dir", value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Shortcut file pattern, e.g. "*.desktop;*.lnk".
    #[arg(long)]
    pattern: Option<String>,

    /// Which shortcuts to delete.
    #[arg(long, value_enum)]
    filter: Option<ShortcutFilter>,

    /// Also tidy the shared desktops.
    #[arg(long)]
    all_users: Option<bool>,

    /// First retry delay in milliseconds.
    #[arg(long, default_value_t = 10)]
    min_delay_ms: u64,

    /// Longest retry delay in seconds.
    #[arg(long, default_value_t = 3600)]
    max_delay_secs: u64,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print a setting.
    Get { key: String },
    /// Store a setting.
    Set { key: String, value: String },
    /// Print the settings file location.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_store = TomlFileStore::default_location(settings::APP_NAME)?;
    let settings_path = file_store.path().to_path_buf();
    let store = CachedStore::new(EnvOverride::new(settings::ENV_PREFIX, file_store));

    let level = settings::minimum_severity(&store)?;
    logging::init(level);
    info!(level = %level, "logging initialized");

    match cli.command {
        Command::Run(args) => run(&store, args).await,
        Command::Config { action } => config(&store, settings_path, action),
    }
}

async fn run(store: &dyn KeyValueStore, args: RunArgs) -> Result<()> {
    let mut watch = WatchSettings::load(store)?;
    if !args.dirs.is_empty() {
        watch.directories = args.dirs;
    }
    if let Some(pattern) = args.pattern {
        watch.pattern = pattern;
    }
    if let Some(filter) = args.filter {
        watch.filter = filter;
    }
    if let Some(all_users) = args.all_users {
        watch.tidy_all_users = all_users;
    }

    let policy = BackoffPolicy::new(
        Duration::from_millis(args.min_delay_ms),
        Duration::from_secs(args.max_delay_secs),
    )?;
    let orchestrator = TidyOrchestrator::new(settings_factory(watch), file_delete_action(), policy);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, stopping"),
                Err(err) => warn!(error = %err, "cannot listen for interrupt, stopping"),
            }
            cancel.cancel();
        }
    });

    orchestrator
        .run(cancel)
        .await
        .context("Background service terminated with error")
}

fn config(store: &dyn KeyValueStore, path: PathBuf, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            check_key(&key)?;
            match store.read(&key)? {
                Some(value) => println!("{}", value),
                None => println!("(unset)"),
            }
        }
        ConfigAction::Set { key, value } => {
            check_key(&key)?;
            settings::validate(&key, &value)?;
            store.write(&key, &value)?;
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn check_key(key: &str) -> Result<()> {
    if !settings::KNOWN_KEYS.contains(&key) {
        bail!(
            "Unknown setting: {}\nKnown settings: {}",
            key,
            settings::KNOWN_KEYS.join(", ")
        );
    }
    Ok(())
}
