use crate::{
    canonical::{self, Preimage},
    error::LedgerError,
    pow,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A block whose nonce is still being searched.
///
/// Everything except the nonce is fixed at construction, and `hash` always
/// reflects the current nonce. Sealing consumes it and yields a [`Block`].
#[derive(Clone, Debug)]
pub struct UnsealedBlock {
    index: u64,
    timestamp: f64,
    data: Value,
    previous_hash: String,
    nonce: u64,
    hash: String,
    preimage: Preimage,
}

impl UnsealedBlock {
    pub fn new<T: Serialize>(
        index: u64,
        timestamp: f64,
        data: T,
        previous_hash: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        Self::with_nonce(index, timestamp, data, previous_hash, 0)
    }

    /// Fails with `Serialization` if the payload has no JSON form (e.g. a map
    /// with non-string keys, or a NaN or infinite float anywhere inside it)
    /// and `NonFiniteTimestamp` for a NaN or infinite timestamp.
    pub fn with_nonce<T: Serialize>(
        index: u64,
        timestamp: f64,
        data: T,
        previous_hash: impl Into<String>,
        nonce: u64,
    ) -> Result<Self, LedgerError> {
        canonical::ensure_finite(&data)?;
        let data = serde_json::to_value(data)?;
        let previous_hash = previous_hash.into();
        let preimage = Preimage::new(index, timestamp, &data, &previous_hash)?;
        let hash = preimage.hash_hex(nonce);
        Ok(Self {
            index,
            timestamp,
            data,
            previous_hash,
            nonce,
            hash,
            preimage,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Hash of the current fields. Pure; does not touch the stored `hash`.
    pub fn calculate_hash(&self) -> String {
        self.preimage.hash_hex(self.nonce)
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = self.calculate_hash();
    }

    pub(crate) fn preimage(&self) -> &Preimage {
        &self.preimage
    }

    /// Seals the block as-is, without any proof-of-work. Genesis is built this way.
    pub fn seal(self) -> Block {
        let hash = self.hash.clone();
        let nonce = self.nonce;
        self.seal_with(nonce, hash)
    }

    /// `hash` must be the digest of the preimage at `nonce`.
    pub(crate) fn seal_with(self, nonce: u64, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            data: self.data,
            previous_hash: self.previous_hash,
            nonce,
            hash,
        }
    }
}

/// A sealed block. Read-only once produced by mining or sealing.
///
/// Deserialization keeps the stored `hash` verbatim rather than recomputing
/// it, so an edited block is caught by `Chain::verify`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    timestamp: f64,
    data: Value,
    previous_hash: String,
    nonce: u64,
    hash: String,
}

impl Block {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Re-derives the hash from the stored fields.
    pub fn calculate_hash(&self) -> String {
        Preimage::render(self.index, self.timestamp, &self.data, &self.previous_hash)
            .hash_hex(self.nonce)
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        pow::meets_difficulty(&self.hash, difficulty)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block(index={}, hash={}..., prev={}...)",
            self.index,
            abbreviate(&self.hash),
            abbreviate(&self.previous_hash)
        )
    }
}

fn abbreviate(hash: &str) -> String {
    hash.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn transfer() -> Value {
        json!({"from": "alice", "to": "bob", "amount": 10})
    }

    #[test]
    fn hash_computed_at_construction() {
        let block = UnsealedBlock::new(1, 1_700_000_000.5, transfer(), "0".repeat(64)).unwrap();
        assert_eq!(block.nonce(), 0);
        assert_eq!(
            block.hash(),
            "bebb52e08bfb2b02009918bb77be9ef95b121ed6d117a018fbcbc8123a79e9e9"
        );
        assert_eq!(block.hash().len(), 64);
    }

    #[test]
    fn calculate_hash_is_idempotent() {
        let block = UnsealedBlock::new(4, 1_650_000_000.25, transfer(), "abc").unwrap();
        let first = block.calculate_hash();
        for _ in 0..5 {
            assert_eq!(block.calculate_hash(), first);
        }
        assert_eq!(block.hash(), first);
    }

    #[test]
    fn set_nonce_recomputes_hash() {
        let mut block = UnsealedBlock::new(1, 1_700_000_000.5, transfer(), "0".repeat(64)).unwrap();
        let before = block.hash().to_string();
        block.set_nonce(1);
        assert_ne!(block.hash(), before);
        assert_eq!(block.hash(), block.calculate_hash());
        block.set_nonce(0);
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn with_nonce_matches_set_nonce() {
        let mut a = UnsealedBlock::new(2, 10.0, "x", "p").unwrap();
        a.set_nonce(77);
        let b = UnsealedBlock::with_nonce(2, 10.0, "x", "p", 77).unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn sealed_hash_matches_unsealed() {
        let unsealed = UnsealedBlock::with_nonce(3, 99.5, json!([1, 2, 3]), "prev", 12).unwrap();
        let expected = unsealed.hash().to_string();
        let block = unsealed.seal();
        assert_eq!(block.hash(), expected);
        assert_eq!(block.calculate_hash(), expected);
        assert_eq!(block.nonce(), 12);
        assert_eq!(block.data(), &json!([1, 2, 3]));
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let base = UnsealedBlock::new(1, 5.0, "d", "p").unwrap();
        let variants = [
            UnsealedBlock::new(2, 5.0, "d", "p").unwrap(),
            UnsealedBlock::new(1, 5.5, "d", "p").unwrap(),
            UnsealedBlock::new(1, 5.0, "e", "p").unwrap(),
            UnsealedBlock::new(1, 5.0, "d", "q").unwrap(),
            UnsealedBlock::with_nonce(1, 5.0, "d", "p", 1).unwrap(),
        ];
        for v in variants {
            assert_ne!(v.hash(), base.hash());
        }
    }

    #[test]
    fn unserializable_payload_is_rejected() {
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = UnsealedBlock::new(1, 1.0, &bad, "0").unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }

    #[derive(Serialize)]
    struct Reading {
        sensor: &'static str,
        value: f64,
    }

    #[test]
    fn non_finite_payload_floats_are_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let cases = [
                UnsealedBlock::new(1, 1.0, bad, "0"),
                UnsealedBlock::new(1, 1.0, Reading { sensor: "t1", value: bad }, "0"),
                UnsealedBlock::new(1, 1.0, vec![1.0, bad], "0"),
                UnsealedBlock::new(1, 1.0, Some(bad as f32), "0"),
            ];
            for result in cases {
                let err = result.unwrap_err();
                assert!(matches!(err, LedgerError::Serialization(_)), "{err}");
            }
        }
    }

    #[test]
    fn non_finite_float_does_not_hash_as_null() {
        let null = UnsealedBlock::new(1, 1.0, json!({"value": null}), "0").unwrap();
        let mut nan = HashMap::new();
        nan.insert("value", f64::NAN);
        assert!(UnsealedBlock::new(1, 1.0, &nan, "0").is_err());
        assert_eq!(null.data(), &json!({"value": null}));
    }

    #[test]
    fn finite_payload_floats_are_accepted() {
        let reading = Reading {
            sensor: "t1",
            value: -0.5,
        };
        let block = UnsealedBlock::new(1, 1.0, reading, "0").unwrap();
        assert_eq!(block.data(), &json!({"sensor": "t1", "value": -0.5}));
        assert!(UnsealedBlock::new(1, 1.0, vec![f64::MAX, f64::MIN_POSITIVE], "0").is_ok());
    }

    #[test]
    fn display_abbreviates_hashes() {
        let block = UnsealedBlock::new(0, 1_600_000_000.0, "Genesis Block", "0")
            .unwrap()
            .seal();
        assert_eq!(
            block.to_string(),
            "Block(index=0, hash=3181e00a36..., prev=0...)"
        );
    }

    #[test]
    fn serde_keeps_stored_hash() {
        let block = UnsealedBlock::new(1, 2.0, json!({"k": "v"}), "p").unwrap().seal();
        let mut value = serde_json::to_value(&block).unwrap();
        value["hash"] = json!("not-a-real-hash");
        let edited: Block = serde_json::from_value(value).unwrap();
        assert_eq!(edited.hash(), "not-a-real-hash");
        assert_eq!(edited.calculate_hash(), block.hash());
    }
}
