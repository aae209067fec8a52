//! libman: headless front-end for the library core
//!
//! Loads configuration, installs logging, opens the library and runs one
//! subcommand against it.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use libman_core::config::default_config_path;
use libman_core::Config;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = Config::load(config_path.as_deref()).context("load configuration")?;
    if let Some(db_path) = &cli.db_path {
        config.database_path = db_path.clone();
    }
    debug!(?config, "Configuration loaded");

    let db = commands::open_database(&config)?;

    let result = match cli.command {
        Command::Scan { dir, no_recursive } => {
            commands::scan(&db, &config, &dir, recursive(&config, no_recursive)).map(|_| ())
        }
        Command::Process => commands::process(&db, &config),
        Command::Import { dir, no_recursive } => {
            commands::scan(&db, &config, &dir, recursive(&config, no_recursive))
                .and_then(|_| commands::process(&db, &config))
        }
        Command::Jobs { status } => commands::jobs(&db, status),
        Command::Purge { status } => commands::purge(&db, status),
        Command::Tracks { search } => commands::tracks(&db, search.as_deref()),
        Command::Duplicates => commands::duplicates(&db),
    };

    db.close();
    result
}

fn recursive(config: &Config, no_recursive: bool) -> bool {
    config.scanner.recursive && !no_recursive
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
