//! Hierarchical pooling: local averages over sliding windows, then a max over
//! the windows. Windows advance one token at a time. Sequences shorter than
//! the window are averaged as a single window.

use candle_core::{bail, Result, Tensor};

use crate::{PoolingConfig, PoolingInput, PoolingLayer, MASK_FILL};

#[derive(Debug, Clone, Copy)]
pub struct HierarchicalPooling {
    window_size: usize,
}

impl HierarchicalPooling {
    pub fn new(window_size: usize) -> Result<Self> {
        if window_size == 0 {
            bail!("hierarchical pooling requires window_size > 0");
        }
        Ok(Self { window_size })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl PoolingLayer for HierarchicalPooling {
    fn config(&self) -> PoolingConfig {
        PoolingConfig::Hierarchical {
            window_size: self.window_size,
        }
    }

    fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let input = PoolingInput::new("hierarchical_pooling.input", hidden, mask)?;
        let seq = input.hidden.dim(1)?;
        let window = self.window_size.min(seq);
        let weighted = input.hidden.broadcast_mul(&input.keep)?;

        let mut windows = Vec::with_capacity(seq - window + 1);
        for start in 0..=seq - window {
            let summed = weighted.narrow(1, start, window)?.sum(1)?;
            let counts = input.keep.narrow(1, start, window)?.sum(1)?;
            // Windows holding only padding must never win the max.
            let penalty = counts.clamp(0f64, 1f64)?.affine(MASK_FILL, -MASK_FILL)?;
            let mean = summed.broadcast_div(&counts.maximum(1e-9f64)?)?;
            windows.push(mean.broadcast_add(&penalty)?);
        }
        let pooled = Tensor::stack(&windows, 1)?.max(1)?;
        input.finish(&pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn column(values: &[f32]) -> Result<Tensor> {
        Tensor::from_slice(values, (1, values.len(), 1), &Device::Cpu)
    }

    #[test]
    fn max_of_window_means() -> Result<()> {
        let pooling = HierarchicalPooling::new(2)?;
        let pooled = pooling.forward(&column(&[1., 3., 2., 6.])?, None)?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![4.0]]);
        Ok(())
    }

    #[test]
    fn short_sequences_fall_back_to_mean() -> Result<()> {
        let pooling = HierarchicalPooling::new(5)?;
        let pooled = pooling.forward(&column(&[1., 3., 2.])?, None)?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![2.0]]);
        Ok(())
    }

    #[test]
    fn padding_only_windows_are_skipped() -> Result<()> {
        let pooling = HierarchicalPooling::new(2)?;
        let hidden = column(&[-4., -2., 9., 9.])?;
        let mask = Tensor::from_slice(&[1f32, 1., 0., 0.], (1, 4), &Device::Cpu)?;
        let pooled = pooling.forward(&hidden, Some(&mask))?;
        // Windows: mean(-4, -2) = -3, mean(-2) = -2, padding only.
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![-2.0]]);
        Ok(())
    }

    #[test]
    fn fully_masked_sequence_pools_to_zero() -> Result<()> {
        let pooling = HierarchicalPooling::new(2)?;
        let mask = Tensor::zeros((1, 3), candle_core::DType::U8, &Device::Cpu)?;
        let pooled = pooling.forward(&column(&[7., 8., 9.])?, Some(&mask))?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![0.0]]);
        Ok(())
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(HierarchicalPooling::new(0).is_err());
    }
}
