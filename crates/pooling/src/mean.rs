//! Mean pooling over the sequence axis.

use candle_core::{Result, Tensor};

use crate::{PoolingConfig, PoolingInput, PoolingLayer};

/// Averages all unmasked tokens. A fully masked sequence pools to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanPooling;

impl PoolingLayer for MeanPooling {
    fn config(&self) -> PoolingConfig {
        PoolingConfig::Mean
    }

    fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let input = PoolingInput::new("mean_pooling.input", hidden, mask)?;
        let summed = input.hidden.broadcast_mul(&input.keep)?.sum(1)?;
        let counts = input.keep.sum(1)?.maximum(1e-9f64)?;
        input.finish(&summed.broadcast_div(&counts)?)
    }
}
