use std::path::PathBuf;

use clap::{Parser, Subcommand};
use libman_core::JobStatus;

#[derive(Debug, Parser)]
#[command(name = "libman")]
#[command(about = "Audio library manager: queue, analyse and inspect your music collection")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to <config dir>/libman/config.toml)
    #[arg(long, global = true, env = "LIBMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the library database path
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue an analysis job for every audio file under a directory
    Scan {
        dir: PathBuf,

        /// Only look at the top level
        #[arg(long)]
        no_recursive: bool,
    },

    /// Run the worker until the job queue is empty
    Process,

    /// Scan a directory, then process the queue
    Import {
        dir: PathBuf,

        #[arg(long)]
        no_recursive: bool,
    },

    /// List jobs, newest first
    Jobs {
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,
    },

    /// Delete finished jobs
    Purge {
        #[arg(long, value_parser = parse_status, default_value = "completed")]
        status: JobStatus,
    },

    /// List catalogued tracks
    Tracks {
        /// Substring match on title, artist, album or genre
        #[arg(long)]
        search: Option<String>,
    },

    /// Group tracks that share an acoustic fingerprint
    Duplicates,
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    s.parse::<JobStatus>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from(["libman", "scan", "/music", "--no-recursive", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Scan { dir, no_recursive } => {
                assert_eq!(dir, PathBuf::from("/music"));
                assert!(no_recursive);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_purge_defaults_to_completed() {
        let cli = Cli::try_parse_from(["libman", "purge"]).unwrap();
        assert!(matches!(cli.command, Command::Purge { status: JobStatus::Completed }));

        let cli = Cli::try_parse_from(["libman", "jobs", "--status", "FAILED"]).unwrap();
        assert!(matches!(cli.command, Command::Jobs { status: Some(JobStatus::Failed) }));

        assert!(Cli::try_parse_from(["libman", "jobs", "--status", "stuck"]).is_err());
    }
}
