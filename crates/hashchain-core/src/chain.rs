use crate::{
    block::{Block, UnsealedBlock},
    constants::{DEFAULT_DIFFICULTY, GENESIS_DATA, GENESIS_PREVIOUS_HASH, MAX_DIFFICULTY},
    error::{LedgerError, ValidationError},
    mine,
    pow::{self, CancelToken},
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Append-only sequence of mined blocks, starting from genesis.
///
/// Single writer: every append goes through `&mut self`, so two blocks can
/// never be built on the same tail.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ChainRecord")]
pub struct Chain {
    difficulty: usize,
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct ChainRecord {
    difficulty: usize,
    blocks: Vec<Block>,
}

impl TryFrom<ChainRecord> for Chain {
    type Error = LedgerError;

    fn try_from(record: ChainRecord) -> Result<Self, Self::Error> {
        Chain::from_parts(record.blocks, record.difficulty)
    }
}

impl Chain {
    /// A fresh chain at [`DEFAULT_DIFFICULTY`].
    pub fn new() -> Result<Self, LedgerError> {
        Self::with_difficulty(DEFAULT_DIFFICULTY)
    }

    pub fn with_difficulty(difficulty: usize) -> Result<Self, LedgerError> {
        check_difficulty(difficulty)?;
        let genesis = genesis_block(now_timestamp()?)?;
        debug!(hash = %genesis.hash(), difficulty, "created genesis block");
        Ok(Self {
            difficulty,
            blocks: vec![genesis],
        })
    }

    /// Rebuilds a chain from existing blocks, e.g. an exported one.
    ///
    /// Links and hashes are not checked here; run [`Chain::verify`].
    pub fn from_parts(blocks: Vec<Block>, difficulty: usize) -> Result<Self, LedgerError> {
        check_difficulty(difficulty)?;
        if blocks.is_empty() {
            return Err(LedgerError::EmptyChain);
        }
        Ok(Self { difficulty, blocks })
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    /// Never empty: every constructor starts from, or requires, a genesis block.
    pub fn last_block(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Seals `block` with this chain's difficulty.
    pub fn proof_of_work(&self, block: UnsealedBlock) -> Block {
        pow::mine(block, self.difficulty)
    }

    /// Mines `data` on top of the current tail and appends it.
    pub fn add_block<T: Serialize>(&mut self, data: T) -> Result<&Block, LedgerError> {
        let block = self.next_block(data)?;
        let sealed = self.proof_of_work(block);
        Ok(self.append(sealed))
    }

    /// [`Chain::add_block`] with the nonce search spread over rayon's pool.
    /// Gives up with `Cancelled` once `cancel` is set, leaving the chain untouched.
    pub fn add_block_parallel<T: Serialize>(
        &mut self,
        data: T,
        cancel: &CancelToken,
    ) -> Result<&Block, LedgerError> {
        let block = self.next_block(data)?;
        let sealed = mine::mine_parallel(block, self.difficulty, cancel)?;
        Ok(self.append(sealed))
    }

    /// [`Chain::add_block`] that gives up with `Cancelled` once `cancel` is set.
    /// A cancelled search leaves the chain untouched.
    pub fn add_block_cancellable<T: Serialize>(
        &mut self,
        data: T,
        cancel: &CancelToken,
    ) -> Result<&Block, LedgerError> {
        let block = self.next_block(data)?;
        let sealed = pow::mine_cancellable(block, self.difficulty, cancel)?;
        Ok(self.append(sealed))
    }

    pub async fn add_block_async<T: Serialize>(
        &mut self,
        data: T,
        cancel: CancelToken,
    ) -> Result<&Block, LedgerError> {
        let block = self.next_block(data)?;
        let sealed = mine::mine_in_background(block, self.difficulty, cancel).await?;
        Ok(self.append(sealed))
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Walks adjacent pairs from position 1, stopping at the first block whose
    /// stored hash differs from its recomputed hash or whose `previous_hash`
    /// differs from its predecessor's hash.
    ///
    /// Genesis is trusted as stored, and difficulty is not re-checked; see
    /// [`Chain::verify_work`] for that.
    pub fn verify(&self) -> Result<(), ValidationError> {
        let result = self.check_links();
        if let Err(err) = &result {
            warn!(%err, "chain verification failed");
        }
        result
    }

    fn check_links(&self) -> Result<(), ValidationError> {
        for (offset, pair) in self.blocks.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let index = offset + 1;

            let computed = current.calculate_hash();
            if current.hash() != computed {
                return Err(ValidationError::HashMismatch {
                    index,
                    stored: current.hash().to_string(),
                    computed,
                });
            }

            if current.previous_hash() != previous.hash() {
                return Err(ValidationError::BrokenLink {
                    index,
                    previous_hash: current.previous_hash().to_string(),
                    expected: previous.hash().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks that every block after genesis meets the chain's difficulty.
    /// Independent of [`Chain::verify`].
    pub fn verify_work(&self) -> Result<(), ValidationError> {
        for (index, block) in self.blocks.iter().enumerate().skip(1) {
            if !block.meets_difficulty(self.difficulty) {
                let err = ValidationError::InsufficientWork {
                    index,
                    hash: block.hash().to_string(),
                    difficulty: self.difficulty,
                };
                warn!(%err, "proof-of-work audit failed");
                return Err(err);
            }
        }
        Ok(())
    }

    fn next_block<T: Serialize>(&self, data: T) -> Result<UnsealedBlock, LedgerError> {
        let last = self.last_block();
        UnsealedBlock::new(last.index() + 1, now_timestamp()?, data, last.hash())
    }

    fn append(&mut self, block: Block) -> &Block {
        info!(index = block.index(), hash = %block.hash(), "appended block");
        self.blocks.push(block);
        self.last_block()
    }
}

/// The unmined first block: fixed payload, previous hash `"0"`, nonce 0.
pub fn genesis_block(timestamp: f64) -> Result<Block, LedgerError> {
    Ok(UnsealedBlock::new(0, timestamp, GENESIS_DATA, GENESIS_PREVIOUS_HASH)?.seal())
}

/// Seconds since the unix epoch, with sub-second precision.
pub fn now_timestamp() -> Result<f64, LedgerError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64())
}

fn check_difficulty(difficulty: usize) -> Result<(), LedgerError> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::InvalidDifficulty {
            difficulty,
            max: MAX_DIFFICULTY,
        });
    }
    Ok(())
}
