//! `roster`, the operator command line for the Roster schedule store.
//!
//! Reads `roster.toml` (or the path given with `--config`) plus `ROSTER_*`
//! environment variables, opens the SQLite store and runs one command. Results
//! are printed to stdout as JSON.
//!
//! # Usage
//!
//! ```text
//! roster calendar --facility 1 --from 2024-03-01 --to 2024-03-31
//! roster attend --event 5 --user 9 --date 2024-03-04 --status present
//! roster delete-override --event 5 --override 12
//! ROSTER_SCHEDULE__HORIZON_DAYS=180 roster conflicts --user 9 --class 3
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use roster_core::{ScheduleConfig, Scheduler};
use roster_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Roster class scheduling")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "roster.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Settings {
  #[serde(default = "default_store_path")]
  store_path: String,
  #[serde(default)]
  schedule:   ScheduleConfig,
}

fn default_store_path() -> String { "roster.db".to_string() }

/// `ROSTER_STORE_PATH`, `ROSTER_SCHEDULE__HORIZON_DAYS`, ...
fn environment() -> config::Environment {
  config::Environment::with_prefix("ROSTER")
    .prefix_separator("_")
    .separator("__")
    .try_parsing(true)
}

fn load_settings(path: PathBuf, env: config::Environment) -> anyhow::Result<Settings> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(env)
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise settings")
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
  match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
    (Some(rest), Some(home)) => Path::new(&home).join(rest),
    _ => PathBuf::from(path),
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = load_settings(cli.config, environment())?;

  let store_path = expand_tilde(&settings.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let scheduler = Scheduler::new(store, settings.schedule);
  let output = commands::run(&scheduler, cli.command).await?;
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tilde_expands_against_home() {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let expanded = expand_tilde("~/roster.db");
    match home {
      Some(home) => assert_eq!(expanded, home.join("roster.db")),
      None => assert_eq!(expanded, PathBuf::from("~/roster.db")),
    }
    assert_eq!(expand_tilde("/var/lib/roster.db"), PathBuf::from("/var/lib/roster.db"));
  }

  #[test]
  fn missing_config_file_falls_back_to_defaults() {
    let env = environment().source(Some(config::Map::new()));
    let settings = load_settings(PathBuf::from("/nonexistent/roster.toml"), env).unwrap();
    assert_eq!(settings.store_path, "roster.db");
    assert_eq!(settings.schedule, ScheduleConfig::default());
  }

  #[test]
  fn delete_override_takes_event_and_override_ids() {
    let cli = Cli::try_parse_from(["roster", "delete-override", "--event", "5", "--override", "7"])
      .unwrap();
    assert!(matches!(cli.command, Command::DeleteOverride { event: 5, override_id: 7 }));
    assert!(Cli::try_parse_from(["roster", "delete-override", "--event", "5"]).is_err());
  }

  #[test]
  fn environment_variables_override_defaults() {
    let vars: config::Map<String, String> = [
      ("ROSTER_STORE_PATH", "/var/lib/roster/test.db"),
      ("ROSTER_SCHEDULE__HORIZON_DAYS", "180"),
      ("ROSTER_SCHEDULE__ABSENCE_THRESHOLD", "4"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    let env = environment().source(Some(vars));

    let settings = load_settings(PathBuf::from("/nonexistent/roster.toml"), env).unwrap();
    assert_eq!(settings.store_path, "/var/lib/roster/test.db");
    assert_eq!(settings.schedule.horizon_days, 180);
    assert_eq!(settings.schedule.absence_threshold, 4);
    assert_eq!(settings.schedule.default_zone, ScheduleConfig::default().default_zone);
  }
}
