//! Append-only hash chain with proof-of-work sealing.

pub mod block;
pub mod canonical;
pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;
pub mod pow;

pub type Hash = [u8; 32];

pub use block::{Block, UnsealedBlock};
pub use chain::Chain;
pub use error::{LedgerError, ValidationError};
pub use pow::CancelToken;
