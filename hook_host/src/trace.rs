use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use hook_bridge::{DispatchStats, RecordedCall, StackEvent};
use serde::Serialize;

use crate::engine::SimulatedEngine;

#[derive(Debug, Serialize)]
pub struct TraceSummary {
    pub ticks: u64,
    pub executed: u64,
    pub accepted: u64,
    /// False if the recorded events interleave or end mid-call.
    pub well_formed: bool,
}

/// Everything the owner thread saw during a run, plus per-worker outcomes.
#[derive(Debug, Serialize)]
pub struct RunTrace<T: Serialize> {
    pub summary: TraceSummary,
    pub calls: Vec<RecordedCall>,
    pub events: Vec<StackEvent>,
    pub workers: Vec<T>,
}

impl<T: Serialize> RunTrace<T> {
    pub fn capture(engine: &SimulatedEngine, workers: Vec<T>) -> Self {
        let DispatchStats {
            executed, accepted, ..
        } = engine.stats();
        let calls = engine.calls();
        Self {
            summary: TraceSummary {
                ticks: engine.ticks(),
                executed,
                accepted,
                well_formed: calls.is_some(),
            },
            calls: calls.unwrap_or_default(),
            events: engine.events(),
            workers,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing native call trace")?;
        fs::write(path, json)
            .with_context(|| format!("writing native call trace to {}", path.display()))?;
        println!("Saved native call trace to {}", path.display());
        Ok(())
    }

    pub fn print_calls(&self) {
        for (index, call) in self.calls.iter().enumerate() {
            let words: Vec<String> = call.words.iter().map(|word| format!("{word:#x}")).collect();
            println!("  {:>4}. {} [{}]", index + 1, call.key, words.join(", "));
        }
    }
}
