use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hook_bridge::{
    DispatchStats, DomainHandle, FunctionKey, RecordedCall, RecordingStack, Response,
    ScriptDomain, StackEvent, StackLog,
};
use log::debug;

use crate::config::{HostConfig, ResponseSpec};

/// Owner-thread side of the host: a recording engine behind a script domain.
///
/// Must stay on the thread that created it; worker threads only ever see
/// [`DomainHandle`]s.
pub struct SimulatedEngine {
    domain: ScriptDomain,
    log: StackLog,
    tick: Duration,
    ticks: u64,
}

impl SimulatedEngine {
    pub fn new(config: &HostConfig) -> Self {
        let log = StackLog::new();
        let responses: BTreeMap<FunctionKey, ResponseSpec> = config.responses.clone();
        let stack = RecordingStack::with_responder(log.clone(), move |key, _args| {
            responses
                .get(&key)
                .map_or(Response::Void, ResponseSpec::to_response)
        });
        Self {
            domain: ScriptDomain::new(stack),
            log,
            tick: config.tick_interval(),
            ticks: 0,
        }
    }

    pub fn handle(&self) -> DomainHandle {
        self.domain.handle()
    }

    /// One engine frame: run whatever the workers have queued.
    pub fn tick(&mut self) -> usize {
        self.ticks += 1;
        self.domain.drain()
    }

    /// Ticks until every worker has finished, then collects their outcomes.
    pub fn run_until_finished<T>(&mut self, workers: Vec<JoinHandle<T>>) -> Vec<thread::Result<T>> {
        while !workers.iter().all(|worker| worker.is_finished()) {
            if self.tick() == 0 && !self.tick.is_zero() {
                thread::sleep(self.tick);
            }
        }
        // Late submissions cannot exist once every worker has returned.
        self.tick();
        debug!(
            "workers finished after {} tick(s), {} native call(s)",
            self.ticks,
            self.domain.stats().executed
        );
        workers.into_iter().map(JoinHandle::join).collect()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stats(&self) -> DispatchStats {
        self.domain.stats()
    }

    pub fn events(&self) -> Vec<StackEvent> {
        self.log.events()
    }

    pub fn calls(&self) -> Option<Vec<RecordedCall>> {
        self.log.calls()
    }
}
