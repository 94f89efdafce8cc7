//! A SHA-256 reference engine.
//!
//! Label `i` is the first 16 bytes of
//! `SHA-256(commitment || scrypt_n (LE) || i (LE))`; the full 32-byte digest
//! is the proof-of-work candidate compared against the difficulty. It is
//! deterministic and fast, which makes it suitable for tests, benchmarks
//! and exercising the dispatch pipeline end to end.

use super::{ComputeEngine, EngineFactory, EngineParams, ProviderInfo};
use bytes::{BufMut, BytesMut};
use labelgrid_core::{
    Error, Result,
    difficulty::Difficulty,
    types::{BITS_PER_LABEL, Commitment, ComputeResult, WorkRange},
};
use sha2::{Digest, Sha256};

const LABEL_BYTES: usize = (BITS_PER_LABEL / 8) as usize;

/// Creates [`HashEngine`]s on a fixed number of CPU providers.
#[derive(Clone, Debug)]
pub struct HashEngineFactory {
    providers: u32,
}

impl HashEngineFactory {
    pub const fn new(providers: u32) -> Self {
        Self { providers }
    }
}

impl Default for HashEngineFactory {
    fn default() -> Self {
        Self::new(1)
    }
}

impl EngineFactory for HashEngineFactory {
    type Engine = HashEngine;

    fn providers(&self) -> Vec<ProviderInfo> {
        (0..self.providers)
            .map(|id| ProviderInfo {
                id,
                name: format!("sha256-cpu-{id}"),
            })
            .collect()
    }

    fn init(&self, params: &EngineParams) -> Result<HashEngine> {
        if params.provider_id >= self.providers {
            return Err(Error::Engine {
                reason: format!(
                    "unknown compute provider {}; {} available",
                    params.provider_id, self.providers
                ),
            });
        }
        if params.scrypt_n == 0 {
            return Err(Error::Engine {
                reason: "scrypt_n must be greater than 0".to_string(),
            });
        }
        Ok(HashEngine {
            commitment: params.commitment,
            difficulty: params.difficulty,
            scrypt_n: params.scrypt_n,
        })
    }
}

#[derive(Clone, Debug)]
pub struct HashEngine {
    commitment: Commitment,
    difficulty: Difficulty,
    scrypt_n: u32,
}

impl HashEngine {
    fn digest(&self, index: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.commitment.as_bytes());
        hasher.update(self.scrypt_n.to_le_bytes());
        hasher.update(index.to_le_bytes());
        hasher.finalize().into()
    }
}

impl ComputeEngine for HashEngine {
    fn compute(&mut self, range: WorkRange) -> Result<ComputeResult> {
        let mut output = BytesMut::with_capacity(range.output_len()?);
        let mut solution = None;
        for index in range.start..range.end {
            let digest = self.digest(index);
            output.put_slice(&digest[..LABEL_BYTES]);
            if solution.is_none() && self.difficulty.is_satisfied_by(&digest) {
                solution = Some(index);
            }
        }
        Ok(ComputeResult {
            output: output.freeze(),
            solution,
        })
    }
}
