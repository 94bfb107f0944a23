//! Sequence pooling strategies for SWEM pipelines.
//!
//! A [`PoolingLayer`] reduces per-token states `(batch, seq, hidden)` to one
//! vector per sequence `(batch, hidden)`. An optional `(batch, seq)` mask with
//! 1 for real tokens and 0 for padding excludes positions from the reduction.
//! A sequence with every position masked pools to zero.
//! Reductions run in the reduction dtype of the input's precision policy and
//! the result is cast back to the input dtype.

pub mod config;
pub mod hierarchical;
pub mod max;
pub mod mean;

use candle_core::{bail, Result, Tensor};
use layers::{checks, PrecisionPolicy};

pub use config::PoolingConfig;
pub use hierarchical::HierarchicalPooling;
pub use max::MaxPooling;
pub use mean::MeanPooling;

/// Offset that pushes masked positions out of max reductions.
pub(crate) const MASK_FILL: f64 = 1e9;

/// Sequence aggregation capability shared by every pooling strategy.
pub trait PoolingLayer: Send + Sync + std::fmt::Debug {
    /// The configuration this layer was built from.
    fn config(&self) -> PoolingConfig;

    /// Pools `(batch, seq, hidden)` into `(batch, hidden)`.
    fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor>;
}

/// Builds the strategy registered for `config`.
pub fn build(config: &PoolingConfig) -> Result<Box<dyn PoolingLayer>> {
    tracing::debug!(kind = config.kind(), "building pooling layer");
    Ok(match config {
        PoolingConfig::Max => Box::new(MaxPooling),
        PoolingConfig::Mean => Box::new(MeanPooling),
        PoolingConfig::Hierarchical { window_size } => {
            Box::new(HierarchicalPooling::new(*window_size)?)
        }
    })
}

/// Validated pooling input promoted to the reduction dtype.
pub(crate) struct PoolingInput {
    pub hidden: Tensor,
    /// `(batch, seq, 1)` keep weights, all ones when no mask was supplied.
    pub keep: Tensor,
    pub policy: PrecisionPolicy,
}

impl PoolingInput {
    pub fn new(name: &str, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Self> {
        checks::expect_rank(name, hidden, 3)?;
        let (batch, seq, hidden_dim) = hidden.dims3()?;
        checks::expect_batch_seq_hidden(name, hidden, hidden_dim)?;

        let policy = PrecisionPolicy::from_parameter_dtype(hidden.dtype());
        let compute = policy.cast_for_reduction(hidden)?;
        let keep = match mask {
            Some(mask) => {
                if mask.dims() != [batch, seq] {
                    bail!(
                        "{}: mask expected shape [{}, {}], got {:?}",
                        name,
                        batch,
                        seq,
                        mask.dims()
                    );
                }
                mask.to_dtype(compute.dtype())?.unsqueeze(2)?
            }
            None => Tensor::ones((batch, seq, 1), compute.dtype(), hidden.device())?,
        };
        Ok(Self {
            hidden: compute,
            keep,
            policy,
        })
    }

    /// Zeroes rows with no unmasked token and casts back to the input dtype.
    pub fn finish(&self, pooled: &Tensor) -> Result<Tensor> {
        let has_tokens = self.keep.sum(1)?.clamp(0f64, 1f64)?;
        self.policy
            .cast_to_storage(&pooled.broadcast_mul(&has_tokens)?)
    }
}
