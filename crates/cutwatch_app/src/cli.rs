use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use cutwatch_core::{TimeRange, TrimMode};

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(
    name = "cutwatch",
    about = "Follow long-running editing tasks and shape trim ranges",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_FILE,
        help = "RON configuration file"
    )]
    pub config: PathBuf,

    #[arg(
        long = "log-level",
        global = true,
        value_name = "LEVEL",
        help = "Override the configured log level (error, warn, info, debug, trace)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow a task that is already running
    Watch(WatchArgs),
    /// Start a task and wait for its terminal state
    Run(RunArgs),
    /// Normalize intervals and print the trim payload as JSON
    Ranges(RangesArgs),
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[arg(long, help = "Task scope, e.g. merge_videos")]
    pub scope: String,

    #[arg(long, value_name = "ID")]
    pub project: Option<String>,

    #[arg(long, value_name = "ID")]
    pub task: Option<String>,

    #[arg(
        long = "no-poll",
        action = clap::ArgAction::SetTrue,
        help = "Rely on the push channel only"
    )]
    pub no_poll: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, help = "Task scope, e.g. merge_videos")]
    pub scope: String,

    #[arg(long, value_name = "ID")]
    pub project: Option<String>,

    #[arg(long, value_name = "JSON", default_value = "{}", help = "Request body for the start call")]
    pub params: String,

    #[arg(long = "ceiling-secs", value_name = "SECS", help = "Override the operation ceiling")]
    pub ceiling_secs: Option<u64>,
}

#[derive(Args, Debug)]
pub struct RangesArgs {
    #[arg(long = "duration-ms", value_name = "MS")]
    pub duration_ms: i64,

    #[arg(long, value_enum, default_value_t = ModeArg::Keep)]
    pub mode: ModeArg,

    #[arg(
        long,
        action = clap::ArgAction::SetTrue,
        help = "Emit the complementary payload (keep <-> delete)"
    )]
    pub invert: bool,

    #[arg(
        value_name = "RANGE",
        value_parser = parse_range,
        help = "START-END in milliseconds, optionally prefixed with ID="
    )]
    pub ranges: Vec<TimeRange>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Keep,
    Delete,
}

impl From<ModeArg> for TrimMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Keep => TrimMode::Keep,
            ModeArg::Delete => TrimMode::Delete,
        }
    }
}

/// Parses `START-END` or `ID=START-END`. Unnamed ranges get `r<START>`.
pub fn parse_range(text: &str) -> Result<TimeRange, String> {
    let (id, span) = match text.split_once('=') {
        Some((id, span)) if !id.trim().is_empty() => (Some(id.trim()), span),
        Some(_) => return Err(format!("empty range id in '{text}'")),
        None => (None, text),
    };
    let (start, end) = span
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got '{span}'"))?;
    let start_ms: i64 = start
        .trim()
        .parse()
        .map_err(|err| format!("bad start '{start}': {err}"))?;
    let end_ms: i64 = end
        .trim()
        .parse()
        .map_err(|err| format!("bad end '{end}': {err}"))?;
    let id = id.map_or_else(|| format!("r{start_ms}"), str::to_string);
    Ok(TimeRange::new(id, start_ms, end_ms))
}
