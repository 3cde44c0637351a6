//! Command-line interface and config loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use ah_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "aihub", about = "AI Hub admission & coordination gateway")]
pub struct Cli {
    /// Path to the TOML config file (default: ./aihub.toml, then
    /// $AIHUB_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP gateway (default when no subcommand is given).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Check the config file for problems.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the config file, falling back to built-in defaults when no file
/// exists. Returns the config and the path it came from (for messages).
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, String)> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("AIHUB_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("aihub.toml"));

    if !path.exists() {
        return Ok((Config::default(), format!("{} (defaults)", path.display())));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, path.display().to_string()))
}

/// `config validate` — print findings, return overall pass/fail.
pub fn validate(config: &Config, source: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{source}: OK");
        return true;
    }
    for issue in &issues {
        println!("{source}: {:?}: {issue}", issue.severity);
    }
    !issues
        .iter()
        .any(|issue| issue.severity == ah_domain::config::ConfigSeverity::Error)
}

/// `config show` — dump the effective config as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
