use std::{any::Any, fs, sync::Arc, thread};

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use serde::Serialize;

mod cli;
mod config;
mod engine;
mod lua_host;
mod replay;
mod trace;

use cli::{Command, HostArgs};
use config::HostConfig;
use engine::SimulatedEngine;
use replay::CallPlan;
use trace::RunTrace;

#[derive(Debug, Serialize)]
struct ScriptOutcome {
    worker: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    match cli::parse()? {
        Command::Replay(args) => {
            let plan = Arc::new(CallPlan::from_json_file(&args.plan)?);
            info!(
                "replaying {} step(s) from {}",
                plan.calls.len(),
                args.plan.display()
            );
            run_workers(&args.host, "replay", move |handle, worker| {
                let outcomes = replay::run_worker(&handle, worker, &plan);
                for outcome in outcomes.iter().filter(|outcome| outcome.error.is_some()) {
                    warn!(
                        "worker {} step {} failed: {}",
                        outcome.worker,
                        outcome.step,
                        outcome.error.as_deref().unwrap_or_default()
                    );
                }
                outcomes
            })?;
        }
        Command::RunLua(args) => {
            let source = fs::read_to_string(&args.script)
                .with_context(|| format!("reading Lua script {}", args.script.display()))?;
            let name = args.script.display().to_string();
            let source = Arc::<str>::from(source);
            let outcomes = run_workers(&args.host, "lua", move |handle, worker| {
                let error = lua_host::run_chunk(handle, worker, &source, &name)
                    .err()
                    .map(|err| {
                        warn!("worker {worker} Lua error: {err}");
                        err.to_string()
                    });
                ScriptOutcome { worker, error }
            })?;
            let failed = outcomes.iter().filter(|outcome| outcome.error.is_some()).count();
            if failed > 0 {
                bail!("{failed} Lua worker(s) failed");
            }
        }
    }
    Ok(())
}

/// Spawns the configured workers, ticks the engine on this thread until they
/// finish, then reports the recorded trace.
fn run_workers<T, F>(host: &HostArgs, label: &str, work: F) -> Result<Vec<T>>
where
    T: Serialize + Send + 'static,
    F: Fn(hook_bridge::DomainHandle, usize) -> T + Clone + Send + 'static,
{
    let config = HostConfig::resolve(host).context("loading host configuration")?;
    let mut engine = SimulatedEngine::new(&config);

    let mut workers = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let handle = engine.handle();
        let work = work.clone();
        let spawned = thread::Builder::new()
            .name(format!("{label}-worker-{worker}"))
            .spawn(move || work(handle, worker))
            .with_context(|| format!("spawning worker thread {worker}"))?;
        workers.push(spawned);
    }

    let mut outcomes = Vec::with_capacity(workers.len());
    for (worker, joined) in engine.run_until_finished(workers).into_iter().enumerate() {
        let outcome =
            joined.map_err(|panic| anyhow!("worker {worker} panicked: {}", panic_message(&*panic)))?;
        outcomes.push(outcome);
    }

    let trace = RunTrace::capture(&engine, outcomes);
    info!(
        "{} worker(s) issued {} native call(s) over {} tick(s)",
        config.workers, trace.summary.executed, trace.summary.ticks
    );
    if !trace.summary.well_formed {
        warn!("recorded native call sequences are interleaved");
    }
    if let Some(path) = host.trace_json.as_deref() {
        trace.write_json(path)?;
    }
    if host.verbose {
        println!("Native calls:");
        trace.print_calls();
    }
    Ok(trace.workers)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}
