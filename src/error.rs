use crate::types::Rank;

pub type Result<T> = std::result::Result<T, ArborError>;

/// Why a collective was abandoned.
///
/// This is the classification handed to the recovery layer; would-block
/// conditions never surface here (the engine simply retries them on the
/// next selector wake).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Fatal socket condition (connection reset, broken pipe, host
    /// unreachable) or an orderly peer shutdown observed mid-stream.
    SockError,
    /// Out-of-band readiness signaled on a watched socket; treated as a
    /// peer-initiated abort of the current collective.
    GetExcept,
}

/// A collective aborted because one peer link faulted.
///
/// The engine records the faulted rank but does not close the link; the
/// next rebuild handshake replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("link to rank {rank} faulted: {kind:?}")]
pub struct LinkFault {
    pub rank: Rank,
    pub kind: FaultKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ArborError {
    #[error("tracker handshake failed: {0}")]
    Handshake(String),

    #[error("tracker magic mismatch: expected {expected:#x}, got {got:#x}")]
    MagicMismatch { expected: i32, got: i32 },

    #[error("peer rank mismatch: tracker announced {expected}, peer reported {got}")]
    RankMismatch { expected: Rank, got: Rank },

    #[error("link to rank {0} is still live, refusing to replace it")]
    LinkOverride(Rank),

    #[error("no bindable port in [{lo}, {hi})")]
    PortExhausted { lo: u16, hi: u16 },

    #[error("invalid value {value:?} for parameter {name}: {reason}")]
    InvalidParam {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("hadoop mode is set but {0} is missing from the environment")]
    HadoopEnv(&'static str),

    #[error("invalid broadcast root {root}: world size is {world_size}")]
    InvalidRoot { root: Rank, world_size: u32 },

    #[error("buffer holds {actual} bytes, collective needs {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Fault(#[from] LinkFault),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
