//! Short-lived access to values returned by native calls.

use std::ffi::{c_char, CStr};
use std::sync::{Arc, Mutex};

use crate::error::{BridgeError, Result};
use crate::stack::StackCell;
use crate::sync::lock;

/// Decodes a value from a native stack word.
pub trait FromNativeWord: Sized {
    fn from_word(word: u64) -> Self;
}

impl FromNativeWord for bool {
    // Native booleans are 32 bits wide; the upper half is unspecified.
    fn from_word(word: u64) -> Self {
        word as u32 != 0
    }
}

impl FromNativeWord for u8 {
    fn from_word(word: u64) -> Self {
        word as u8
    }
}

impl FromNativeWord for i32 {
    fn from_word(word: u64) -> Self {
        word as i32
    }
}

impl FromNativeWord for u32 {
    fn from_word(word: u64) -> Self {
        word as u32
    }
}

impl FromNativeWord for i64 {
    fn from_word(word: u64) -> Self {
        word as i64
    }
}

impl FromNativeWord for u64 {
    fn from_word(word: u64) -> Self {
        word
    }
}

impl FromNativeWord for f32 {
    fn from_word(word: u64) -> Self {
        f32::from_bits(word as u32)
    }
}

impl FromNativeWord for usize {
    fn from_word(word: u64) -> Self {
        word as usize
    }
}

/// Result pointer of one native call.
///
/// The pointee belongs to the engine and is only valid until the next call on
/// the same stack. Reads lock the stack and check that no call has run since
/// this result was produced, failing with [`BridgeError::StaleResult`]
/// otherwise. Copy what you need out before issuing another call.
pub struct NativeResult {
    address: usize,
    generation: u64,
    cell: Arc<Mutex<StackCell>>,
}

impl NativeResult {
    pub(crate) fn new(address: usize, generation: u64, cell: Arc<Mutex<StackCell>>) -> Self {
        Self {
            address,
            generation,
            cell,
        }
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Raw result address, for callers that hand it back to native code.
    pub fn address(&self) -> usize {
        self.address
    }

    /// Sequence number of the call that produced this result.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        lock(&self.cell).generation() == self.generation
    }

    /// Reads the first result word as `T`.
    pub fn read<T: FromNativeWord>(&self) -> Result<T> {
        // SAFETY: `with_live` only yields a non-null pointer while the call
        // that produced it is still the latest one, and holds the stack lock
        // so no other call can begin during the read.
        self.with_live(|ptr| T::from_word(unsafe { ptr.read() }))
    }

    /// Copies `count` consecutive result words.
    pub fn read_words(&self, count: usize) -> Result<Vec<u64>> {
        // SAFETY: as in `read`; the caller vouches that the native function
        // returns at least `count` words.
        self.with_live(|ptr| (0..count).map(|idx| unsafe { ptr.add(idx).read() }).collect())
    }

    /// Reads the first result word as a C string pointer and copies the text.
    pub fn read_c_str(&self) -> Result<Option<String>> {
        self.with_live(|ptr| {
            // SAFETY: as in `read`.
            let text_ptr = unsafe { ptr.read() } as usize as *const c_char;
            if text_ptr.is_null() {
                return None;
            }
            // SAFETY: a non-null string result points at a NUL-terminated
            // buffer owned by the engine, valid for the same window.
            let text = unsafe { CStr::from_ptr(text_ptr) };
            Some(text.to_string_lossy().into_owned())
        })
    }

    fn with_live<R>(&self, read: impl FnOnce(*const u64) -> R) -> Result<R> {
        if self.is_null() {
            return Err(BridgeError::NullResult);
        }
        let cell = lock(&self.cell);
        let current = cell.generation();
        if current != self.generation {
            return Err(BridgeError::StaleResult {
                produced: self.generation,
                current,
            });
        }
        let value = read(self.address as *const u64);
        drop(cell);
        Ok(value)
    }
}

impl std::fmt::Debug for NativeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeResult")
            .field("address", &format_args!("{:#x}", self.address))
            .field("generation", &self.generation)
            .finish()
    }
}
