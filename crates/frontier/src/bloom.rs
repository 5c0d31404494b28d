use md5::Md5;
use sha2::{Digest, Sha256};

use crate::store::{CoordinationStore, StoreError};

/// Sizing parameters for the shared Bloom filter.
#[derive(Clone, Copy, Debug)]
pub struct BloomConfig {
    pub expected_items: u64,
    pub false_positive_rate: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_items: 10_000_000,
            false_positive_rate: 0.01,
        }
    }
}

impl BloomConfig {
    /// Optimal bit-array size: m = ⌈−n·ln(p) / (ln 2)²⌉.
    pub fn optimal_bits(&self) -> u64 {
        let n = self.expected_items as f64;
        let ln2 = std::f64::consts::LN_2;
        (-n * self.false_positive_rate.ln() / (ln2 * ln2)).ceil() as u64
    }

    /// Optimal hash-function count: k = max(1, round((m/n)·ln 2)).
    pub fn optimal_hashes(&self) -> u32 {
        let m = self.optimal_bits() as f64;
        let n = self.expected_items as f64;
        let k = (m / n) * std::f64::consts::LN_2;
        (k.round() as u32).max(1)
    }
}

/// Bloom filter over a bit array in the coordination store.
///
/// Double hashing derives the k probe positions from one SHA-256 and one MD5
/// digest, so every add/contains costs exactly k bit operations, batched
/// into a single pipeline.
pub struct BloomFilter {
    key: String,
    bits: u64,
    hashes: u32,
    expected_items: u64,
}

impl BloomFilter {
    pub fn new(key_prefix: &str, config: BloomConfig) -> Self {
        let bits = config.optimal_bits();
        let hashes = config.optimal_hashes();

        tracing::info!(
            bits = bits,
            hashes = hashes,
            expected_items = config.expected_items,
            fp_rate = config.false_positive_rate,
            "Bloom filter initialized"
        );

        Self {
            key: format!("{}:filter", key_prefix),
            bits,
            hashes,
            expected_items: config.expected_items,
        }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    /// Probe positions via double hashing: h_i = (h1 + i·h2) mod m.
    fn positions(&self, item: &str) -> Vec<u64> {
        let sha = Sha256::digest(item.as_bytes());
        let md5 = Md5::digest(item.as_bytes());

        // Low 128 bits of each digest are plenty for position derivation.
        let h1 = u128::from_be_bytes(sha[..16].try_into().expect("digest is 32 bytes"));
        let h2 = u128::from_be_bytes(md5[..].try_into().expect("digest is 16 bytes"));

        let m = self.bits as u128;
        (0..self.hashes as u128)
            .map(|i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as u64)
            .collect()
    }

    /// Set the k bits for `item`. Returns true iff every bit was already
    /// set, i.e. the item was probably present.
    ///
    /// GETBITs and SETBITs run in one pipeline so no concurrent reader can
    /// observe a half-applied add.
    pub async fn insert(&self, store: &CoordinationStore, item: &str) -> Result<bool, StoreError> {
        let positions = self.positions(item);

        let mut pipe = redis::pipe();
        for pos in &positions {
            pipe.cmd("GETBIT").arg(&self.key).arg(*pos);
        }
        for pos in &positions {
            pipe.cmd("SETBIT").arg(&self.key).arg(*pos).arg(1);
        }

        let replies: Vec<i64> = store.query_pipeline(&pipe).await?;
        let was_present = replies[..positions.len()].iter().all(|bit| *bit == 1);
        Ok(was_present)
    }

    /// True iff all k bits for `item` are set.
    pub async fn contains(&self, store: &CoordinationStore, item: &str) -> Result<bool, StoreError> {
        let positions = self.positions(item);

        let mut pipe = redis::pipe();
        for pos in &positions {
            pipe.cmd("GETBIT").arg(&self.key).arg(*pos);
        }

        let replies: Vec<i64> = store.query_pipeline(&pipe).await?;
        Ok(replies.iter().all(|bit| *bit == 1))
    }

    /// Estimate the number of distinct items from the popcount:
    /// n̂ = −(m/k)·ln(1 − X/m). Saturates at `expected_items`.
    pub async fn approximate_count(&self, store: &CoordinationStore) -> Result<u64, StoreError> {
        let set_bits: u64 = store.query(redis::cmd("BITCOUNT").arg(&self.key)).await?;

        if set_bits == 0 {
            return Ok(0);
        }

        let ratio = set_bits as f64 / self.bits as f64;
        if ratio >= 1.0 {
            return Ok(self.expected_items);
        }

        let estimate = -(self.bits as f64 / self.hashes as f64) * (1.0 - ratio).ln();
        Ok(estimate as u64)
    }

    /// Destructive reset: deletes the bit array.
    pub async fn reset(&self, store: &CoordinationStore) -> Result<(), StoreError> {
        let _: i64 = store.query(redis::cmd("DEL").arg(&self.key)).await?;
        tracing::info!(key = %self.key, "Bloom filter reset");
        Ok(())
    }
}
