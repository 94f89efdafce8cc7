//! The compute engine contract.
//!
//! A worker does not derive labels itself. It hands each work range to a
//! [`ComputeEngine`], initialised once per connection by an
//! [`EngineFactory`] with the commitment and difficulty received during the
//! handshake. The engine returns the packed labels for the range and, when
//! one exists, the lowest index in the range whose value satisfies the
//! difficulty.
//!
//! [`hash::HashEngineFactory`] is a reference CPU implementation.

pub mod hash;

use core::fmt;
use labelgrid_core::{
    Error, Result,
    difficulty::{Difficulty, pow_difficulty},
    types::{Commitment, ComputeResult, SCRYPT_N, WorkRange},
};
use std::time::Instant;

/// Everything an engine needs to compute labels for one commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineParams {
    pub provider_id: u32,
    pub commitment: Commitment,
    pub difficulty: Difficulty,
    pub scrypt_n: u32,
}

impl EngineParams {
    /// Parameters for a dataset of `num_labels` labels.
    pub fn for_dataset(provider_id: u32, commitment: Commitment, num_labels: u64) -> Result<Self> {
        Ok(Self {
            provider_id,
            commitment,
            difficulty: pow_difficulty(num_labels)?,
            scrypt_n: SCRYPT_N,
        })
    }
}

/// A compute device an engine can run on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: u32,
    pub name: String,
}

impl fmt::Display for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.name)
    }
}

/// Computes labels for work ranges.
///
/// `compute` is synchronous and may take seconds; callers run it on a
/// blocking thread.
pub trait ComputeEngine: Send + 'static {
    fn compute(&mut self, range: WorkRange) -> Result<ComputeResult>;
}

/// Creates engines bound to a commitment.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: ComputeEngine;

    /// Compute devices this factory can initialise engines on.
    fn providers(&self) -> Vec<ProviderInfo>;

    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the provider is unknown or the
    /// parameters are unusable.
    fn init(&self, params: &EngineParams) -> Result<Self::Engine>;
}

/// Checks that `index` is a solution for `params` by recomputing it.
pub fn verify_solution<F: EngineFactory>(
    factory: &F,
    params: &EngineParams,
    index: u64,
) -> Result<()> {
    let end = index.checked_add(1).ok_or_else(|| Error::Engine {
        reason: format!("index {index} is out of range"),
    })?;
    let mut engine = factory.init(params)?;
    let result = engine.compute(WorkRange::new(index, end)?)?;
    if result.solution == Some(index) {
        Ok(())
    } else {
        Err(Error::Engine {
            reason: format!(
                "index {index} does not satisfy the difficulty for {}",
                params.commitment
            ),
        })
    }
}

/// Computes `num_labels` labels on one provider and returns the rate in
/// labels per second.
pub fn bench_provider<F: EngineFactory>(
    factory: &F,
    provider_id: u32,
    num_labels: u64,
) -> Result<f64> {
    let params = EngineParams::for_dataset(provider_id, Commitment::default(), 1 << 32)?;
    let mut engine = factory.init(&params)?;
    let start = Instant::now();
    engine.compute(WorkRange::new(0, num_labels)?)?;
    Ok(num_labels as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON))
}
