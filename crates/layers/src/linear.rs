//! Affine projection layer.
//!
//! `Linear` accepts either per-token hidden states shaped
//! `(batch, seq, in_dim)` or pooled vectors shaped `(rows, in_dim)` and keeps
//! the leading axes untouched. Weights and activations are promoted to
//! [`PrecisionPolicy::compute`] for the matmul and the result is cast back to
//! the storage dtype.

use candle_core::{DType, Device, Error, Result, Tensor, Var};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration of a dense projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Outgoing feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is added after the matmul.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a biased projection.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Number of learnable scalars held by a layer with this configuration.
    pub fn parameter_count(&self) -> usize {
        let bias = if self.bias { self.output_dim } else { 0 };
        self.input_dim * self.output_dim + bias
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation with the given leaky slope.
    KaimingUniform { negative_slope: f64 },
}

impl LinearInit {
    /// Kaiming uniform with slope `sqrt(5)`, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    pub fn fan_in_uniform() -> Self {
        LinearInit::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }

    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3f64.sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight)
        } else {
            weight.to_dtype(dtype)
        }
    }
}

impl Default for LinearInit {
    fn default() -> Self {
        Self::fan_in_uniform()
    }
}

/// Dense affine projection `y = x W^T + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Var,
    bias: Option<Var>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                config.input_dim, config.output_dim
            )));
        }
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight: Var::from_tensor(&weight)?,
            bias: bias.map(|b| Var::from_tensor(&b)).transpose()?,
        })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Returns the static configuration.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Returns a clone of the bias tensor if present.
    pub fn bias(&self) -> Option<Tensor> {
        self.bias.as_ref().map(|bias| bias.as_tensor().clone())
    }

    /// Trainable parameters keyed under `scope`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = vec![(format!("{scope}.weight"), self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push((format!("{scope}.bias"), bias.clone()));
        }
        params
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in(
            "linear.weight",
            weight,
            &[DType::F16, DType::BF16, DType::F32, DType::F64],
        )
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in(
                    "linear.bias",
                    tensor,
                    &[DType::F16, DType::BF16, DType::F32, DType::F64],
                )
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [_, _, hidden_dim] | [_, hidden_dim] if *hidden_dim == self.config.input_dim => Ok(()),
            [_, _, hidden_dim] | [_, hidden_dim] => Err(Error::Msg(format!(
                "linear.input: expected last dim {} but received {}",
                self.config.input_dim, hidden_dim
            ))),
            dims => Err(Error::Msg(format!(
                "linear.input: expected [B, T, H_in] or [R, H_in], got {dims:?}"
            ))),
        }
    }

    /// Applies the projection, promoting to the compute dtype for the matmul.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(self.weight.as_tensor())?.t()?;

        let mut output = match *input.dims() {
            [batch, seq, _] => input
                .reshape((batch * seq, self.config.input_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            _ => input.matmul(&weight_t)?,
        };

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(bias.as_tensor())?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn weight_stats(tensor: &Tensor) -> Result<(f64, f64)> {
        let values = tensor
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let n = values.len() as f64;
        let mean = values.iter().copied().map(f64::from).sum::<f64>() / n;
        let var = values
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>()
            / n;
        Ok((mean, var.sqrt()))
    }

    #[test]
    fn forward_matches_manual_affine_map() -> Result<()> {
        let device = Device::Cpu;
        let weight = Tensor::from_slice(&[1f32, 2., 3., 4., 5., 6.], (3, 2), &device)?;
        let bias = Tensor::from_slice(&[0.5f32, -0.5, 1.0], 3, &device)?;
        let linear = Linear::new(LinearConfig::new(2, 3), weight, Some(bias))?;
        let input = Tensor::from_slice(&[1f32, 1., 0., 2.], (2, 2), &device)?;

        let output = linear.forward(&input, &PrecisionPolicy::default())?;

        assert_eq!(
            output.to_vec2::<f32>()?,
            vec![vec![3.5, 6.5, 12.0], vec![4.5, 7.5, 13.0]]
        );
        Ok(())
    }

    #[test]
    fn per_token_inputs_keep_leading_axes() -> Result<()> {
        let device = Device::Cpu;
        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::with_init(
                LinearConfig::new(4, 7),
                &LinearInit::XavierUniform,
                &device,
                dtype,
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 4), &device)?.to_dtype(dtype)?;
            let output = linear.forward(&input, &PrecisionPolicy::from_parameter_dtype(dtype))?;
            assert_eq!(output.dims(), &[2, 5, 7]);
            assert_eq!(output.dtype(), dtype);
        }
        Ok(())
    }

    #[test]
    fn rejects_mismatched_feature_width() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(4, 2),
            &LinearInit::default(),
            &device,
            DType::F32,
        )?;
        let input = Tensor::zeros((3, 5), DType::F32, &device)?;
        let err = linear
            .forward(&input, &PrecisionPolicy::default())
            .unwrap_err();
        assert!(err.to_string().contains("expected last dim 4"));
        Ok(())
    }

    #[test]
    fn fan_in_uniform_respects_bound() -> Result<()> {
        let linear = Linear::with_init(
            LinearConfig::new(64, 32),
            &LinearInit::fan_in_uniform(),
            &Device::Cpu,
            DType::F32,
        )?;
        let bound = 1.0 / 64f32.sqrt() + 1e-6;
        let values = linear.weight().flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.abs() <= bound));
        assert_eq!(linear.config().parameter_count(), 64 * 32 + 32);
        Ok(())
    }

    #[test]
    fn glorot_normal_stats_are_reasonable() -> Result<()> {
        let linear = Linear::with_init(
            LinearConfig::new(128, 64),
            &LinearInit::XavierNormal,
            &Device::Cpu,
            DType::F32,
        )?;
        let (mean, std) = weight_stats(&linear.weight())?;
        let expected = (2.0f64 / (128.0 + 64.0)).sqrt();
        assert!(mean.abs() < 5e-3);
        assert!((std - expected).abs() < expected * 0.25);
        Ok(())
    }

    #[test]
    fn named_parameters_cover_weight_and_bias() -> Result<()> {
        let linear = Linear::with_init(
            LinearConfig::new(3, 2),
            &LinearInit::default(),
            &Device::Cpu,
            DType::F32,
        )?;
        let names: Vec<String> = linear
            .named_parameters("post.0")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["post.0.weight", "post.0.bias"]);
        Ok(())
    }
}
