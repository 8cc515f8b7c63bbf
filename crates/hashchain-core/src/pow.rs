//! Proof-of-work: a block is mined once its hex hash starts with
//! `difficulty` zero digits.

use crate::{
    block::{Block, UnsealedBlock},
    constants::CANCEL_CHECK_INTERVAL,
    error::LedgerError,
    Hash,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::info;

/// Shared flag for aborting an in-progress search. Once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Leading zero hex digits of a digest.
pub fn leading_zero_nibbles(hash: &Hash) -> usize {
    let mut total = 0usize;
    for b in hash {
        if *b == 0 {
            total += 2;
        } else {
            if *b < 0x10 {
                total += 1;
            }
            break;
        }
    }
    total
}

pub fn meets_difficulty(hash_hex: &str, difficulty: usize) -> bool {
    hash_hex.len() >= difficulty && hash_hex.bytes().take(difficulty).all(|b| b == b'0')
}

/// Increments the nonce from its current value until the hash meets
/// `difficulty`. Never returns if the difficulty cannot be met.
pub fn mine(block: UnsealedBlock, difficulty: usize) -> Block {
    let start = block.nonce();
    let mut nonce = start;
    loop {
        let hash = block.preimage().digest(nonce);
        if leading_zero_nibbles(&hash) >= difficulty {
            return found(block, nonce, nonce.wrapping_sub(start).wrapping_add(1), &hash);
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Like [`mine`], but polls `cancel` every `CANCEL_CHECK_INTERVAL` attempts.
pub fn mine_cancellable(
    block: UnsealedBlock,
    difficulty: usize,
    cancel: &CancelToken,
) -> Result<Block, LedgerError> {
    let mut nonce = block.nonce();
    let mut attempts = 0u64;
    loop {
        if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            info!(index = block.index(), attempts, "mining cancelled");
            return Err(LedgerError::Cancelled { attempts });
        }
        let hash = block.preimage().digest(nonce);
        attempts += 1;
        if leading_zero_nibbles(&hash) >= difficulty {
            return Ok(found(block, nonce, attempts, &hash));
        }
        nonce = nonce.wrapping_add(1);
    }
}

pub(crate) fn found(block: UnsealedBlock, nonce: u64, attempts: u64, hash: &Hash) -> Block {
    let hash = hex::encode(hash);
    info!(
        "Mined block {} with nonce {} after {} attempts, hash {}",
        block.index(),
        nonce,
        attempts,
        hash
    );
    block.seal_with(nonce, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unsealed() -> UnsealedBlock {
        UnsealedBlock::new(
            1,
            1_700_000_000.5,
            json!({"from": "alice", "to": "bob", "amount": 10}),
            "3181e00a36c1c32a994215249b79f9074734ff254b304d58da8fb52bf078649b",
        )
        .unwrap()
    }

    #[test]
    fn leading_zero_nibble_examples() {
        let mut h = [0u8; 32];
        assert_eq!(leading_zero_nibbles(&h), 64);
        h[0] = 0x0F;
        assert_eq!(leading_zero_nibbles(&h), 1);
        h[0] = 0x10;
        assert_eq!(leading_zero_nibbles(&h), 0);
        h = [0u8; 32];
        h[1] = 0x80;
        assert_eq!(leading_zero_nibbles(&h), 2);
        h[1] = 0x08;
        assert_eq!(leading_zero_nibbles(&h), 3);
    }

    #[test]
    fn meets_difficulty_examples() {
        assert!(meets_difficulty("000abc", 3));
        assert!(meets_difficulty("000abc", 0));
        assert!(!meets_difficulty("00abc", 3));
        assert!(!meets_difficulty("00", 3));
        assert!(meets_difficulty("", 0));
    }

    #[test]
    fn mines_the_smallest_nonce() {
        // Reference nonces for this block at each difficulty.
        let cases = [
            (1, 50, "04ec9d62c2641b9cc31ce83d99e901c20a6f6405211c00deaace139d0fec476d"),
            (2, 343, "00ceac15f1a63047805ab2cf0c01029f7f0585e4352f9a6f1d412010f78b39c5"),
            (3, 1277, "000c29f529995fe0d414f2eb5eee16094b85757ec12458c4f1ce0980357a8de3"),
        ];
        for (difficulty, nonce, hash) in cases {
            let block = mine(unsealed(), difficulty);
            assert_eq!(block.nonce(), nonce);
            assert_eq!(block.hash(), hash);
            assert_eq!(block.calculate_hash(), hash);
        }
    }

    #[test]
    fn zero_difficulty_keeps_starting_nonce() {
        let expected = unsealed().hash().to_string();
        let block = mine(unsealed(), 0);
        assert_eq!(block.nonce(), 0);
        assert_eq!(block.hash(), expected);
    }

    #[test]
    fn search_resumes_from_starting_nonce() {
        let mut start = unsealed();
        start.set_nonce(344);
        let block = mine(start, 2);
        assert!(block.nonce() >= 344);
        assert!(block.meets_difficulty(2));
    }

    #[test]
    fn cancellable_matches_plain_search() {
        let block = mine_cancellable(unsealed(), 2, &CancelToken::new()).unwrap();
        assert_eq!(block.nonce(), 343);
    }

    #[test]
    fn cancelled_token_stops_search() {
        let token = CancelToken::new();
        token.cancel();
        let err = mine_cancellable(unsealed(), 64, &token).unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled { attempts: 0 }));
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }
}
