//! Max pooling over the sequence axis.

use candle_core::{Result, Tensor};

use crate::{PoolingConfig, PoolingInput, PoolingLayer, MASK_FILL};

/// Takes the element-wise maximum over all unmasked tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxPooling;

impl PoolingLayer for MaxPooling {
    fn config(&self) -> PoolingConfig {
        PoolingConfig::Max
    }

    fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let input = PoolingInput::new("max_pooling.input", hidden, mask)?;
        let penalty = input.keep.affine(MASK_FILL, -MASK_FILL)?;
        let pooled = input.hidden.broadcast_add(&penalty)?.max(1)?;
        input.finish(&pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn sequence() -> Result<Tensor> {
        Tensor::from_slice(&[1f32, -1., 3., 0., 2., 5., 6., -4.], (1, 4, 2), &Device::Cpu)
    }

    #[test]
    fn takes_per_feature_maximum() -> Result<()> {
        let pooled = MaxPooling.forward(&sequence()?, None)?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![6.0, 5.0]]);
        Ok(())
    }

    #[test]
    fn masked_tokens_are_ignored() -> Result<()> {
        let mask = Tensor::from_slice(&[1u8, 1, 1, 0], (1, 4), &Device::Cpu)?;
        let pooled = MaxPooling.forward(&sequence()?, Some(&mask))?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![3.0, 5.0]]);
        Ok(())
    }

    #[test]
    fn fully_masked_sequence_pools_to_zero() -> Result<()> {
        let device = Device::Cpu;
        let hidden = Tensor::from_slice(&[1f32, -1., 3., 0., 2., 5., 6., -4.], (2, 2, 2), &device)?;
        let mask = Tensor::from_slice(&[0u8, 0, 1, 0], (2, 2), &device)?;
        let pooled = MaxPooling.forward(&hidden, Some(&mask))?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![0.0, 0.0], vec![2.0, 5.0]]);
        Ok(())
    }

    #[test]
    fn keeps_input_dtype() -> Result<()> {
        let hidden = sequence()?.to_dtype(DType::F16)?;
        let pooled = MaxPooling.forward(&hidden, None)?;
        assert_eq!(pooled.dtype(), DType::F16);
        assert_eq!(pooled.dims(), &[1, 2]);
        Ok(())
    }
}
