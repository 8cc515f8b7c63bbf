use crate::{
    block::{Block, UnsealedBlock},
    constants::CANCEL_CHECK_INTERVAL,
    error::LedgerError,
    pow::{self, leading_zero_nibbles, CancelToken},
    Hash,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

enum Search {
    Found(u64, Hash),
    Cancelled,
}

/// Searches nonces in parallel, from the block's current nonce upwards, until
/// a hash has at least `difficulty` leading zero digits.
///
/// Threads race, so the winning nonce meets the difficulty but is not
/// necessarily the smallest one that would.
///
/// Each worker polls `cancel` every `CANCEL_CHECK_INTERVAL` nonces and the
/// search stops with `Cancelled` once it is set. The reported attempt count
/// is rounded up to whole poll intervals.
pub fn mine_parallel(
    block: UnsealedBlock,
    difficulty: usize,
    cancel: &CancelToken,
) -> Result<Block, LedgerError> {
    let start = block.nonce();
    let preimage = block.preimage();
    let searched = AtomicU64::new(0);

    // Rayon splits the remaining nonce range across its pool.
    let outcome = (start..u64::MAX).into_par_iter().find_map_any(|nonce| {
        if (nonce - start) % CANCEL_CHECK_INTERVAL == 0 {
            searched.fetch_add(CANCEL_CHECK_INTERVAL, Ordering::Relaxed);
            if cancel.is_cancelled() {
                return Some(Search::Cancelled);
            }
        }
        let hash = preimage.digest(nonce);
        (leading_zero_nibbles(&hash) >= difficulty).then_some(Search::Found(nonce, hash))
    });

    match outcome {
        Some(Search::Found(nonce, hash)) => Ok(pow::found(block, nonce, nonce - start + 1, &hash)),
        Some(Search::Cancelled) => {
            let attempts = searched.load(Ordering::Relaxed);
            info!(index = block.index(), attempts, "parallel mining cancelled");
            Err(LedgerError::Cancelled { attempts })
        }
        None => Err(LedgerError::NonceSpaceExhausted),
    }
}

/// Runs the cancellable search on tokio's blocking pool so async callers
/// stay responsive while a block is mined.
pub async fn mine_in_background(
    block: UnsealedBlock,
    difficulty: usize,
    cancel: CancelToken,
) -> Result<Block, LedgerError> {
    tokio::task::spawn_blocking(move || pow::mine_cancellable(block, difficulty, &cancel)).await?
}
