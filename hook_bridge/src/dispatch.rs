//! Routes native calls from any thread onto the thread that owns the stack.
//!
//! A [`ScriptDomain`] lives on the owner thread and drains queued requests
//! between the owner's own work. Worker threads talk to it through cloneable
//! [`DomainHandle`]s: a submit from the owner thread runs at once, a submit
//! from anywhere else is queued and the worker sleeps until the owner has run
//! it. Requests run strictly one after another in acceptance order, and every
//! begin/push/execute sequence completes before the next one starts.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use log::{debug, trace, warn};

use crate::error::{BridgeError, Result};
use crate::key::{FunctionKey, LITERAL_STRING, VAR_STRING, VAR_STRING_LITERAL_FLAGS};
use crate::marshal::{marshal, Argument, MarshaledArgs};
use crate::pinned::{PinnedStrings, PinnedText};
use crate::result::{FromNativeWord, NativeResult};
use crate::stack::{NativeStack, StackCell};
use crate::sync::lock;
use crate::text::emit_chunked;

/// A function key and its marshaled words, ready to run.
///
/// Text leases ride along with the request and are released when it drops,
/// after the call has executed.
#[derive(Debug)]
pub struct CallRequest {
    key: FunctionKey,
    words: Vec<u64>,
    _pins: Vec<PinnedText>,
}

impl CallRequest {
    pub fn new(key: FunctionKey, words: Vec<u64>) -> Self {
        Self {
            key,
            words,
            _pins: Vec::new(),
        }
    }

    pub fn from_args(key: FunctionKey, args: &[Argument], pins: &Arc<PinnedStrings>) -> Result<Self> {
        Ok(Self::from_marshaled(key, marshal(args, pins)?))
    }

    pub fn from_marshaled(key: FunctionKey, args: MarshaledArgs) -> Self {
        let (words, pins) = args.into_parts();
        Self {
            key,
            words,
            _pins: pins,
        }
    }

    pub fn key(&self) -> FunctionKey {
        self.key
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }
}

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallState::Queued => "queued",
            CallState::Running => "running",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
        };
        f.write_str(label)
    }
}

fn transition(ticket: u64, key: FunctionKey, from: CallState, to: CallState) {
    trace!("call #{ticket} {key}: {from} -> {to}");
}

/// Runs on the owner thread right after the call, while its result is live.
type Completion = Box<dyn FnOnce(NativeResult) + Send>;

struct PendingCall {
    ticket: u64,
    request: CallRequest,
    complete: Completion,
}

struct CallQueue {
    open: bool,
    next_ticket: u64,
    pending: VecDeque<PendingCall>,
}

struct Shared {
    owner: ThreadId,
    cell: Arc<Mutex<StackCell>>,
    queue: Mutex<CallQueue>,
    pins: Arc<PinnedStrings>,
}

impl Shared {
    fn is_open(&self) -> bool {
        lock(&self.queue).open
    }

    fn execute(&self, request: &CallRequest) -> NativeResult {
        let (address, generation) = lock(&self.cell).call(request.key, &request.words);
        NativeResult::new(address, generation, Arc::clone(&self.cell))
    }
}

/// Counters describing a domain's dispatch activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Calls that have run on the native stack, queued or immediate.
    pub executed: u64,
    /// Requests accepted into the queue since the domain opened.
    pub accepted: u64,
    /// Requests waiting for the next drain.
    pub pending: usize,
}

/// Owner-thread side of the dispatcher.
///
/// Not `Send`: the thread that creates the domain is the only thread allowed
/// to drive the native stack, and the type keeps it there. Dropping the domain
/// closes it; queued and future requests then fail with
/// [`BridgeError::NoActiveDomain`].
pub struct ScriptDomain {
    shared: Arc<Shared>,
    _owner_thread: PhantomData<Rc<()>>,
}

impl ScriptDomain {
    pub fn new<S>(stack: S) -> Self
    where
        S: NativeStack + 'static,
    {
        Self::with_pins(stack, Arc::new(PinnedStrings::new()))
    }

    pub fn with_pins<S>(stack: S, pins: Arc<PinnedStrings>) -> Self
    where
        S: NativeStack + 'static,
    {
        let shared = Shared {
            owner: thread::current().id(),
            cell: Arc::new(Mutex::new(StackCell::new(Box::new(stack)))),
            queue: Mutex::new(CallQueue {
                open: true,
                next_ticket: 0,
                pending: VecDeque::new(),
            }),
            pins,
        };
        debug!("script domain opened on {:?}", shared.owner);
        Self {
            shared: Arc::new(shared),
            _owner_thread: PhantomData,
        }
    }

    pub fn handle(&self) -> DomainHandle {
        DomainHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pins(&self) -> &Arc<PinnedStrings> {
        &self.shared.pins
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).pending.len()
    }

    /// Keys of the queued requests in the order they will run.
    pub fn queued_keys(&self) -> Vec<FunctionKey> {
        lock(&self.shared.queue)
            .pending
            .iter()
            .map(|call| call.request.key)
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        let executed = lock(&self.shared.cell).generation();
        let queue = lock(&self.shared.queue);
        DispatchStats {
            executed,
            accepted: queue.next_ticket,
            pending: queue.pending.len(),
        }
    }

    /// Runs every queued request in FIFO order and returns how many ran.
    ///
    /// Never waits for workers: an empty queue returns immediately.
    pub fn drain(&self) -> usize {
        let mut executed = 0;
        loop {
            let next = lock(&self.shared.queue).pending.pop_front();
            let Some(PendingCall {
                ticket,
                request,
                complete,
            }) = next
            else {
                break;
            };

            transition(ticket, request.key, CallState::Queued, CallState::Running);
            let result = self.shared.execute(&request);
            transition(ticket, request.key, CallState::Running, CallState::Completed);
            drop(request);
            complete(result);
            executed += 1;
        }
        if executed > 0 {
            debug!("drained {executed} queued native call(s)");
        }
        executed
    }

    /// Runs a call right now, bypassing the queue.
    pub fn invoke_immediate(&self, key: FunctionKey, words: &[u64]) -> NativeResult {
        self.shared.execute(&CallRequest::new(key, words.to_vec()))
    }

    pub fn invoke_immediate_args(&self, key: FunctionKey, args: &[Argument]) -> Result<NativeResult> {
        let request = CallRequest::from_args(key, args, &self.shared.pins)?;
        Ok(self.shared.execute(&request))
    }
}

impl Drop for ScriptDomain {
    fn drop(&mut self) {
        let abandoned = {
            let mut queue = lock(&self.shared.queue);
            queue.open = false;
            std::mem::take(&mut queue.pending)
        };
        if !abandoned.is_empty() {
            warn!(
                "script domain closed with {} queued call(s)",
                abandoned.len()
            );
        }
        // Dropping each completion wakes its worker with NoActiveDomain.
        for call in abandoned {
            transition(call.ticket, call.request.key, CallState::Queued, CallState::Failed);
        }
        debug!("script domain on {:?} closed", self.shared.owner);
    }
}

/// Thread-safe entry point for issuing native calls into a [`ScriptDomain`].
#[derive(Clone)]
pub struct DomainHandle {
    shared: Arc<Shared>,
}

impl DomainHandle {
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_open()
    }

    pub fn pins(&self) -> &Arc<PinnedStrings> {
        &self.shared.pins
    }

    /// Runs `request` on the owner thread and returns its result.
    ///
    /// Blocks the calling thread until the owner has drained the request,
    /// unless the caller is the owner thread, which runs it immediately.
    /// Reading the returned result from a worker fails with
    /// [`BridgeError::StaleResult`] once the owner has run another call; use
    /// [`DomainHandle::submit_with`] to read it in place.
    pub fn submit(&self, request: CallRequest) -> Result<NativeResult> {
        self.submit_with(request, |result| result)
    }

    /// Runs `request` and applies `read` to its result on the owner thread,
    /// before any other call can replace it.
    pub fn submit_with<T, F>(&self, request: CallRequest, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(NativeResult) -> T + Send + 'static,
    {
        if self.is_owner_thread() {
            if !self.shared.is_open() {
                return Err(BridgeError::NoActiveDomain);
            }
            return Ok(read(self.shared.execute(&request)));
        }

        let (reply, outcome) = mpsc::sync_channel(1);
        {
            let mut queue = lock(&self.shared.queue);
            if !queue.open {
                return Err(BridgeError::NoActiveDomain);
            }
            let ticket = queue.next_ticket;
            queue.next_ticket += 1;
            trace!("call #{ticket} {}: {}", request.key, CallState::Queued);
            let complete: Completion = Box::new(move |result| {
                if reply.send(read(result)).is_err() {
                    warn!("call #{ticket} finished after its requester went away");
                }
            });
            queue.pending.push_back(PendingCall {
                ticket,
                request,
                complete,
            });
        }

        // A closed domain drops the completion, and with it the sender.
        outcome.recv().map_err(|_| BridgeError::NoActiveDomain)
    }

    /// Calls `key` with pre-marshaled words.
    pub fn invoke(&self, key: FunctionKey, words: &[u64]) -> Result<NativeResult> {
        self.submit(CallRequest::new(key, words.to_vec()))
    }

    /// Marshals `args` and calls `key`.
    pub fn invoke_args(&self, key: FunctionKey, args: &[Argument]) -> Result<NativeResult> {
        if !self.is_active() {
            return Err(BridgeError::NoActiveDomain);
        }
        let request = CallRequest::from_args(key, args, &self.shared.pins)?;
        self.submit(request)
    }

    /// Marshals `args`, calls `key` and decodes the first result word.
    pub fn invoke_value<T>(&self, key: FunctionKey, args: &[Argument]) -> Result<T>
    where
        T: FromNativeWord + Send + 'static,
    {
        if !self.is_active() {
            return Err(BridgeError::NoActiveDomain);
        }
        let request = CallRequest::from_args(key, args, &self.shared.pins)?;
        self.submit_with(request, |result| result.read::<T>())?
    }

    /// Marshals `args`, calls `key` and copies the C string it returns.
    pub fn invoke_text(&self, key: FunctionKey, args: &[Argument]) -> Result<Option<String>> {
        if !self.is_active() {
            return Err(BridgeError::NoActiveDomain);
        }
        let request = CallRequest::from_args(key, args, &self.shared.pins)?;
        self.submit_with(request, |result| {
            if result.is_null() {
                return Ok(None);
            }
            result.read_c_str()
        })?
    }

    /// Sends `text` to the engine as one literal-text call per chunk.
    pub fn push_long_string(&self, text: &str) -> Result<()> {
        if !self.is_active() {
            return Err(BridgeError::NoActiveDomain);
        }
        emit_chunked(text, |chunk| self.push_literal_text(chunk))
    }

    /// Like [`DomainHandle::push_long_string`] for UTF-16 script strings.
    ///
    /// Unpaired surrogates become U+FFFD before chunking, so the replacement
    /// character's three bytes count against the chunk budget.
    pub fn push_long_string_utf16(&self, units: &[u16]) -> Result<()> {
        self.push_long_string(&String::from_utf16_lossy(units))
    }

    fn push_literal_text(&self, chunk: &str) -> Result<()> {
        let args = [
            Argument::Int(VAR_STRING_LITERAL_FLAGS),
            Argument::from(LITERAL_STRING),
            Argument::from(chunk),
        ];
        self.invoke_args(VAR_STRING, &args).map(|_| ())
    }
}

impl fmt::Debug for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainHandle")
            .field("owner", &self.shared.owner)
            .field("active", &self.is_active())
            .finish()
    }
}
