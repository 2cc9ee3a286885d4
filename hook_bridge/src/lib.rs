//! Thread-safe bridge into a single-threaded native engine's call stack.
//!
//! Script threads marshal typed arguments into 64-bit stack words, hand the
//! request to a [`DomainHandle`], and block until the [`ScriptDomain`] on the
//! engine's owner thread has run the begin/push/execute sequence. Long text is
//! split into chunks that fit the engine's literal text buffer and sent as
//! separate calls.

pub mod dispatch;
pub mod error;
pub mod key;
pub mod marshal;
pub mod pinned;
pub mod recording;
pub mod result;
pub mod stack;
mod sync;
pub mod text;

pub use dispatch::{CallRequest, CallState, DispatchStats, DomainHandle, ScriptDomain};
pub use error::{BridgeError, Result};
pub use key::{FunctionKey, VAR_STRING};
pub use marshal::{marshal, marshal_dynamic, Argument, MarshaledArgs};
pub use pinned::{PinnedStrings, PinnedText};
pub use recording::{RecordedCall, RecordingStack, Response, StackEvent, StackLog};
pub use result::{FromNativeWord, NativeResult};
pub use stack::{run_call, ExternStack, NativeEntryPoints, NativeStack};
pub use text::{chunks, emit_chunked, TextChunks, MAX_TEXT_CHUNK_BYTES};
