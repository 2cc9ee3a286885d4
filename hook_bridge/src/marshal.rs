//! Converts typed call arguments into native stack words.

use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::pinned::{PinnedStrings, PinnedText};

/// One logical argument of a native call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Bool(bool),
    Byte(u8),
    Int(i32),
    U64(u64),
    Float(f32),
    Pointer(usize),
    Text(String),
}

impl Argument {
    pub fn type_name(&self) -> &'static str {
        match self {
            Argument::Bool(_) => "bool",
            Argument::Byte(_) => "byte",
            Argument::Int(_) => "int",
            Argument::U64(_) => "u64",
            Argument::Float(_) => "float",
            Argument::Pointer(_) => "pointer",
            Argument::Text(_) => "text",
        }
    }
}

impl From<bool> for Argument {
    fn from(value: bool) -> Self {
        Argument::Bool(value)
    }
}

impl From<u8> for Argument {
    fn from(value: u8) -> Self {
        Argument::Byte(value)
    }
}

impl From<i32> for Argument {
    fn from(value: i32) -> Self {
        Argument::Int(value)
    }
}

impl From<u64> for Argument {
    fn from(value: u64) -> Self {
        Argument::U64(value)
    }
}

impl From<f32> for Argument {
    fn from(value: f32) -> Self {
        Argument::Float(value)
    }
}

impl From<*const c_void> for Argument {
    fn from(value: *const c_void) -> Self {
        Argument::Pointer(value as usize)
    }
}

impl From<*mut c_void> for Argument {
    fn from(value: *mut c_void) -> Self {
        Argument::Pointer(value as usize)
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Argument::Text(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Text(value.to_string())
    }
}

/// Words ready for the native stack, plus the leases keeping text alive.
#[derive(Debug, Default)]
pub struct MarshaledArgs {
    words: Vec<u64>,
    pins: Vec<PinnedText>,
}

impl MarshaledArgs {
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn into_parts(self) -> (Vec<u64>, Vec<PinnedText>) {
        (self.words, self.pins)
    }
}

/// Marshals `args` in order, pinning text through `pins`.
///
/// On failure nothing is returned and any text pinned for earlier arguments
/// is released.
pub fn marshal(args: &[Argument], pins: &Arc<PinnedStrings>) -> Result<MarshaledArgs> {
    let mut marshaled = MarshaledArgs {
        words: Vec::with_capacity(args.len()),
        pins: Vec::new(),
    };
    for (position, arg) in args.iter().enumerate() {
        let word = match *arg {
            Argument::Bool(value) => u64::from(value),
            Argument::Byte(value) => u64::from(value),
            // Sign-extends, matching the native two's-complement widening.
            Argument::Int(value) => value as i64 as u64,
            Argument::U64(value) => value,
            Argument::Float(value) => u64::from(value.to_bits()),
            Argument::Pointer(address) => address as u64,
            Argument::Text(ref text) => {
                let lease = pins
                    .pin(text)
                    .map_err(|_| BridgeError::InteriorNul { position })?;
                let word = lease.word();
                marshaled.pins.push(lease);
                word
            }
        };
        marshaled.words.push(word);
    }
    Ok(marshaled)
}

/// Maps a dynamically typed value onto an [`Argument`].
pub fn argument_from_any(value: &dyn Any) -> Option<Argument> {
    if let Some(v) = value.downcast_ref::<bool>() {
        return Some(Argument::Bool(*v));
    }
    if let Some(v) = value.downcast_ref::<u8>() {
        return Some(Argument::Byte(*v));
    }
    if let Some(v) = value.downcast_ref::<i32>() {
        return Some(Argument::Int(*v));
    }
    if let Some(v) = value.downcast_ref::<u64>() {
        return Some(Argument::U64(*v));
    }
    if let Some(v) = value.downcast_ref::<f32>() {
        return Some(Argument::Float(*v));
    }
    if let Some(v) = value.downcast_ref::<usize>() {
        return Some(Argument::Pointer(*v));
    }
    if let Some(v) = value.downcast_ref::<*const c_void>() {
        return Some(Argument::Pointer(*v as usize));
    }
    if let Some(v) = value.downcast_ref::<*mut c_void>() {
        return Some(Argument::Pointer(*v as usize));
    }
    if let Some(v) = value.downcast_ref::<String>() {
        return Some(Argument::Text(v.clone()));
    }
    if let Some(v) = value.downcast_ref::<&'static str>() {
        return Some(Argument::Text((*v).to_string()));
    }
    None
}

/// Marshals values whose kinds are only known at run time.
///
/// Every value is classified before anything is pinned, so an unsupported
/// value leaves the registry untouched.
pub fn marshal_dynamic(values: &[&dyn Any], pins: &Arc<PinnedStrings>) -> Result<MarshaledArgs> {
    let args = values
        .iter()
        .enumerate()
        .map(|(position, value)| {
            argument_from_any(*value).ok_or(BridgeError::UnsupportedArgumentType {
                position,
                type_name: "unknown",
            })
        })
        .collect::<Result<Vec<_>>>()?;
    marshal(&args, pins)
}
