use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Drives native calls from worker threads through a simulated engine",
    version
)]
pub struct Args {
    /// JSON call plan replayed by every worker thread
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Lua chunk executed on every worker thread with the `native` table installed
    #[arg(long)]
    pub lua: Option<PathBuf>,

    /// Optional JSON host configuration (workers, tick interval, engine responses)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of worker threads (overrides the config file)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Owner-thread tick interval in milliseconds (overrides the config file)
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Path to write the recorded native call trace as JSON
    #[arg(long)]
    pub trace_json: Option<PathBuf>,

    /// Print every recorded native call after the run
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub enum Command {
    Replay(ReplayArgs),
    RunLua(RunLuaArgs),
}

#[derive(Debug, Clone)]
pub struct HostArgs {
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub tick_ms: Option<u64>,
    pub trace_json: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct ReplayArgs {
    pub plan: PathBuf,
    pub host: HostArgs,
}

#[derive(Debug)]
pub struct RunLuaArgs {
    pub script: PathBuf,
    pub host: HostArgs,
}

pub fn parse() -> Result<Command> {
    let args = Args::parse();
    args.into_command()
}

impl Args {
    pub fn into_command(self) -> Result<Command> {
        if self.workers == Some(0) {
            bail!("--workers must be at least 1");
        }
        let host = HostArgs {
            config: self.config,
            workers: self.workers,
            tick_ms: self.tick_ms,
            trace_json: self.trace_json,
            verbose: self.verbose,
        };
        match (self.plan, self.lua) {
            (Some(plan), None) => Ok(Command::Replay(ReplayArgs { plan, host })),
            (None, Some(script)) => Ok(Command::RunLua(RunLuaArgs { script, host })),
            (Some(_), Some(_)) => bail!("--plan and --lua cannot be combined"),
            (None, None) => bail!("one of --plan or --lua is required"),
        }
    }
}
