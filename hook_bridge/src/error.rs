use thiserror::Error;

/// Error conditions surfaced synchronously to the thread that issued a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("illegal native call outside an active script domain")]
    NoActiveDomain,
    #[error("argument {position} has unsupported type {type_name}")]
    UnsupportedArgumentType {
        position: usize,
        type_name: &'static str,
    },
    #[error("text argument {position} contains an interior NUL byte")]
    InteriorNul { position: usize },
    #[error("native call returned a null result")]
    NullResult,
    #[error("result of call #{produced} read after call #{current} replaced it")]
    StaleResult { produced: u64, current: u64 },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
