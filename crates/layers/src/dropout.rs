//! Seeded inverted dropout and the Bernoulli mask generator it shares with
//! word-drop embeddings.
//!
//! Masks are drawn from a per-layer [`Lcg64`] so two pipelines assembled with
//! the same seed drop the same units. Dropout only fires while the layer is in
//! training mode; evaluation returns the input untouched.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Simple 64-bit linear congruential generator for deterministic masks.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        // Knuth's MMIX constants.
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform sample in `[0, 1)` with 53 bits of resolution.
    pub fn next_f64(&mut self) -> f64 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        (self.next_u64() >> 11) as f64 * SCALE
    }
}

/// Samples a `{0, 1}` f32 mask of `shape` where each entry is kept with `keep_prob`.
pub fn keep_mask(rng: &Mutex<Lcg64>, shape: &[usize], keep_prob: f64, device: &Device) -> Result<Tensor> {
    let total: usize = shape.iter().product();
    let mut rng = rng
        .lock()
        .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
    let data: Vec<f32> = (0..total)
        .map(|_| if rng.next_f64() < keep_prob { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_vec(data, shape.to_vec(), device)
}

/// Inverted dropout: kept units are scaled by `1 / (1 - p)` while training.
pub struct Dropout {
    probability: f64,
    rng: Mutex<Lcg64>,
    training: AtomicBool,
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability)
            .field("training", &self.is_training())
            .finish()
    }
}

impl Dropout {
    /// Creates a dropout layer in training mode.
    pub fn new(probability: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {probability}"
            )));
        }
        Ok(Self {
            probability,
            rng: Mutex::new(Lcg64::new(seed)),
            training: AtomicBool::new(true),
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Enables or disables dropout.
    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// Applies dropout to `input` of any shape.
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if !self.is_training() || self.probability == 0.0 {
            return Ok(input.clone());
        }
        let keep_prob = 1.0 - self.probability;
        let mask = keep_mask(&self.rng, input.dims(), keep_prob, input.device())?
            .affine(1.0 / keep_prob, 0.0)?;
        let compute = policy.cast_for_matmul(input)?;
        let mask = if compute.dtype() == DType::F32 {
            mask
        } else {
            mask.to_dtype(compute.dtype())?
        };
        policy.cast_to_storage(&compute.mul(&mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropout_preserves_expectation() -> Result<()> {
        let dropout = Dropout::new(0.25, 123)?;
        let input = Tensor::ones((4, 8, 16), DType::F32, &Device::Cpu)?;
        let dropped = dropout.forward(&input, &PrecisionPolicy::default())?;

        let values = dropped.flatten_all()?.to_vec1::<f32>()?;
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert!((mean - 1.0).abs() < 0.1);
        assert!(values.iter().any(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn dropout_disabled_in_inference() -> Result<()> {
        let dropout = Dropout::new(0.5, 0)?;
        dropout.set_training(false);
        let input = Tensor::randn(0f32, 1.0, (2, 4), &Device::Cpu)?;
        let out = dropout.forward(&input, &PrecisionPolicy::default())?;
        assert_eq!(out.to_vec2::<f32>()?, input.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn same_seed_draws_same_mask() -> Result<()> {
        let device = Device::Cpu;
        let left = keep_mask(&Mutex::new(Lcg64::new(7)), &[3, 5], 0.5, &device)?;
        let right = keep_mask(&Mutex::new(Lcg64::new(7)), &[3, 5], 0.5, &device)?;
        assert_eq!(left.to_vec2::<f32>()?, right.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn probabilities_just_below_one_keep_a_positive_rate() -> Result<()> {
        let probability = 0.99999999;
        assert_eq!(probability as f32, 1.0);
        let dropout = Dropout::new(probability, 3)?;
        assert_eq!(dropout.probability(), probability);
        let input = Tensor::ones((2, 3), DType::F32, &Device::Cpu)?;
        let out = dropout.forward(&input, &PrecisionPolicy::default())?;
        let values = out.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn rejects_probability_of_one() {
        assert!(Dropout::new(1.0, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
    }
}
