use std::time::SystemTimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("payload cannot be canonically encoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timestamp {0} has no canonical encoding")]
    NonFiniteTimestamp(f64),

    #[error("difficulty {difficulty} exceeds the {max} hex digits of a block hash")]
    InvalidDifficulty { difficulty: usize, max: usize },

    #[error("system clock is before the unix epoch: {0}")]
    Clock(#[from] SystemTimeError),

    #[error("a chain needs at least its genesis block")]
    EmptyChain,

    #[error("mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("nonce space exhausted without meeting the difficulty")]
    NonceSpaceExhausted,

    #[error("mining task failed: {0}")]
    MiningTask(#[from] tokio::task::JoinError),
}

/// Why a chain failed verification. `index` is the block's position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("block {index}: stored hash {stored} does not match recomputed {computed}")]
    HashMismatch {
        index: usize,
        stored: String,
        computed: String,
    },

    #[error("block {index}: previous_hash {previous_hash} does not link to {expected}")]
    BrokenLink {
        index: usize,
        previous_hash: String,
        expected: String,
    },

    #[error("block {index}: hash {hash} has fewer than {difficulty} leading zeros")]
    InsufficientWork {
        index: usize,
        hash: String,
        difficulty: usize,
    },
}

impl ValidationError {
    pub fn index(&self) -> usize {
        match self {
            ValidationError::HashMismatch { index, .. }
            | ValidationError::BrokenLink { index, .. }
            | ValidationError::InsufficientWork { index, .. } => *index,
        }
    }
}
