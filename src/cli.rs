//! Command-line front end: a thin wrapper over [`crate::tailer::Tailer`].
//!
//! Process entry point: load config, construct collaborators, dispatch to
//! one of the three operations this crate exposes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use logtailer::config::Config;
use logtailer::persist_store::FileStore;
use logtailer::tailer::{QueryRegex, Tailer};

#[derive(Debug, Parser)]
#[command(name = "logtailer", about = "Log-file tailer with persistent resume state")]
pub struct Cli {
    /// Path to a YAML config file; falls back to built-in defaults if absent.
    #[arg(long, default_value = "logtailer.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read new matching lines since the last call for (path, qid).
    ReadMatches {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        qid: String,
        /// Repeatable `<index>:<regex>`, e.g. `--pattern 0:ERROR`.
        #[arg(long = "pattern", required = true)]
        patterns: Vec<String>,
    },
    /// Mark (path, qid) to skip or replay the current backlog.
    ResetOne {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        qid: String,
        #[arg(long)]
        reset_on_read: bool,
    },
    /// Reset every persisted record found under the state directory.
    ResetAll {
        #[arg(long)]
        reset_on_read: bool,
    },
}

fn parse_pattern(raw: &str) -> anyhow::Result<QueryRegex> {
    let (index, pattern) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("pattern `{raw}` is not `<index>:<regex>`"))?;
    let index = index
        .parse::<usize>()
        .map_err(|e| anyhow::anyhow!("pattern index `{index}`: {e}"))?;
    Ok(QueryRegex::new(index, pattern))
}

pub fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        tracing::debug!(error = %e, path = %cli.config, "no config file, using defaults");
        Config::default()
    });

    let store = FileStore::new(&config.state_dir);
    let tailer = Tailer::new(&store);

    match cli.command {
        Command::ReadMatches { path, qid, patterns } => {
            let regexes = patterns
                .iter()
                .map(|p| parse_pattern(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let (lines, partial) = tailer.read_matches(&path, &qid, &regexes)?;
            for line in &lines {
                println!("{line}");
            }
            if partial {
                eprintln!("(partial read - more input remained at the cap)");
            }
            Ok(0)
        }
        Command::ResetOne { path, qid, reset_on_read } => {
            Ok(tailer.reset_one(&path, &qid, reset_on_read)?)
        }
        Command::ResetAll { reset_on_read } => {
            Ok(tailer.reset_all(&config.state_dir, reset_on_read))
        }
    }
}
