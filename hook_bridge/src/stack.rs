//! The three-phase native call protocol.

use std::ptr::NonNull;

use crate::key::FunctionKey;

/// Begin / push / execute entry points of the native call stack.
///
/// One call is exactly `begin`, zero or more `push`, then `execute`. A second
/// `begin` before `execute` corrupts the native stack; implementations do not
/// guard against it; the dispatcher serializes every sequence.
pub trait NativeStack: Send {
    fn begin(&mut self, key: FunctionKey);

    fn push(&mut self, word: u64);

    /// Runs the pending call. The pointer stays valid until the next `begin`.
    fn execute(&mut self) -> Option<NonNull<u64>>;
}

impl<S: NativeStack + ?Sized> NativeStack for Box<S> {
    fn begin(&mut self, key: FunctionKey) {
        (**self).begin(key)
    }

    fn push(&mut self, word: u64) {
        (**self).push(word)
    }

    fn execute(&mut self) -> Option<NonNull<u64>> {
        (**self).execute()
    }
}

/// Raw entry points exported by the engine's script hook.
#[derive(Debug, Clone, Copy)]
pub struct NativeEntryPoints {
    pub init: unsafe extern "C" fn(u64),
    pub push64: unsafe extern "C" fn(u64),
    pub call: unsafe extern "C" fn() -> *mut u64,
}

/// Direct pass-through to the engine's exported entry points.
#[derive(Debug)]
pub struct ExternStack {
    entry: NativeEntryPoints,
}

impl ExternStack {
    /// # Safety
    ///
    /// The entry points must implement the three-phase protocol and may only
    /// be driven from the engine's script thread, which the dispatcher
    /// guarantees for calls routed through a `ScriptDomain` created there.
    pub unsafe fn new(entry: NativeEntryPoints) -> Self {
        Self { entry }
    }
}

impl NativeStack for ExternStack {
    fn begin(&mut self, key: FunctionKey) {
        // SAFETY: upheld by the contract of `ExternStack::new`.
        unsafe { (self.entry.init)(key.raw()) }
    }

    fn push(&mut self, word: u64) {
        // SAFETY: upheld by the contract of `ExternStack::new`.
        unsafe { (self.entry.push64)(word) }
    }

    fn execute(&mut self) -> Option<NonNull<u64>> {
        // SAFETY: upheld by the contract of `ExternStack::new`.
        NonNull::new(unsafe { (self.entry.call)() })
    }
}

/// Drives one complete begin / push / execute sequence.
pub fn run_call<S>(stack: &mut S, key: FunctionKey, words: &[u64]) -> Option<NonNull<u64>>
where
    S: NativeStack + ?Sized,
{
    stack.begin(key);
    for &word in words {
        stack.push(word);
    }
    stack.execute()
}

/// The stack together with a count of completed calls.
///
/// The count doubles as the generation that result capabilities compare
/// against: a result is readable only while no later call has run.
pub(crate) struct StackCell {
    stack: Box<dyn NativeStack>,
    generation: u64,
}

impl StackCell {
    pub(crate) fn new(stack: Box<dyn NativeStack>) -> Self {
        Self {
            stack,
            generation: 0,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Runs one full sequence and returns the result address and its generation.
    pub(crate) fn call(&mut self, key: FunctionKey, words: &[u64]) -> (usize, u64) {
        let result = run_call(self.stack.as_mut(), key, words);
        self.generation += 1;
        let address = result.map_or(0, |ptr| ptr.as_ptr() as usize);
        (address, self.generation)
    }
}
