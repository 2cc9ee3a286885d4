//! A simulated engine that records every protocol step.

use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::key::FunctionKey;
use crate::stack::NativeStack;
use crate::sync::lock;

/// Words available in the simulated result buffer.
pub const RESULT_SLOT_WORDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StackEvent {
    Begin { key: FunctionKey },
    Push { word: u64 },
    Execute,
}

/// One complete begin / push / execute sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedCall {
    pub key: FunctionKey,
    pub words: Vec<u64>,
}

/// Shared, cloneable view of the events a [`RecordingStack`] has seen.
#[derive(Debug, Clone, Default)]
pub struct StackLog {
    events: Arc<Mutex<Vec<StackEvent>>>,
}

impl StackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StackEvent> {
        lock(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Groups the events into calls.
    ///
    /// Returns `None` if the stream is not a series of complete,
    /// non-interleaved sequences.
    pub fn calls(&self) -> Option<Vec<RecordedCall>> {
        let events = lock(&self.events);
        let mut calls = Vec::new();
        let mut open: Option<RecordedCall> = None;
        for event in events.iter() {
            match *event {
                StackEvent::Begin { key } => {
                    if open.is_some() {
                        return None;
                    }
                    open = Some(RecordedCall {
                        key,
                        words: Vec::new(),
                    });
                }
                StackEvent::Push { word } => open.as_mut()?.words.push(word),
                StackEvent::Execute => calls.push(open.take()?),
            }
        }
        if open.is_some() {
            return None;
        }
        Some(calls)
    }

    fn record(&self, event: StackEvent) {
        lock(&self.events).push(event);
    }
}

/// What the simulated engine answers for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Null result pointer.
    Void,
    Word(u64),
    /// Leading result words; anything past [`RESULT_SLOT_WORDS`] is dropped.
    Words(Vec<u64>),
    /// A pointer to engine-owned NUL-terminated text in the first word.
    Text(String),
}

pub type Responder = Box<dyn FnMut(FunctionKey, &[u64]) -> Response + Send>;

/// [`NativeStack`] that logs each step and answers through a responder.
///
/// The result buffer has a fixed address and is overwritten by every call,
/// matching the lifetime the real engine gives its results.
pub struct RecordingStack {
    log: StackLog,
    responder: Responder,
    key: Option<FunctionKey>,
    args: Vec<u64>,
    slot: Box<[u64; RESULT_SLOT_WORDS]>,
    text: Option<CString>,
}

impl RecordingStack {
    pub fn new(log: StackLog) -> Self {
        Self::with_responder(log, |_, _| Response::Void)
    }

    pub fn with_responder<F>(log: StackLog, responder: F) -> Self
    where
        F: FnMut(FunctionKey, &[u64]) -> Response + Send + 'static,
    {
        Self {
            log,
            responder: Box::new(responder),
            key: None,
            args: Vec::new(),
            slot: Box::new([0; RESULT_SLOT_WORDS]),
            text: None,
        }
    }

    pub fn log(&self) -> &StackLog {
        &self.log
    }
}

impl NativeStack for RecordingStack {
    fn begin(&mut self, key: FunctionKey) {
        self.log.record(StackEvent::Begin { key });
        self.key = Some(key);
        self.args.clear();
    }

    fn push(&mut self, word: u64) {
        self.log.record(StackEvent::Push { word });
        self.args.push(word);
    }

    fn execute(&mut self) -> Option<NonNull<u64>> {
        self.log.record(StackEvent::Execute);
        let key = self.key.take()?;
        let response = (self.responder)(key, &self.args);
        self.slot.fill(0);
        match response {
            Response::Void => return None,
            Response::Word(word) => self.slot[0] = word,
            Response::Words(words) => {
                for (dst, src) in self.slot.iter_mut().zip(words) {
                    *dst = src;
                }
            }
            Response::Text(text) => {
                let owned = CString::new(text.replace('\0', "")).unwrap_or_default();
                self.slot[0] = owned.as_ptr() as u64;
                self.text = Some(owned);
            }
        }
        NonNull::new(self.slot.as_mut_ptr())
    }
}
