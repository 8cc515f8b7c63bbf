pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;

/// Leading zero hex digits required of a mined block unless configured otherwise.
pub const DEFAULT_DIFFICULTY: usize = 3;
/// A difficulty above this can never be satisfied by a SHA-256 hex digest.
pub const MAX_DIFFICULTY: usize = HASH_HEX_SIZE;

pub const GENESIS_DATA: &str = "Genesis Block";
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Nonce attempts between polls of a `CancelToken`.
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;
