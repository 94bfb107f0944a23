//! Plain token embedding table.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var, D};
use layers::{checks, PrecisionPolicy};

use crate::{EmbeddingConfig, EmbeddingLayer};

/// Learnable lookup table sampled from `N(0, 1)`.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: EmbeddingConfig,
    weight: Var,
    policy: PrecisionPolicy,
}

impl TokenEmbedding {
    /// Builds the table described by `config` on `device`.
    ///
    /// The padding row, if any, starts at zero.
    pub fn new(config: EmbeddingConfig, device: &Device, dtype: DType) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.embedding_dim == 0 {
            bail!("token embedding requires embedding_dim > 0");
        }
        if let Some(padding) = config.padding_index {
            if padding >= config.vocab_size {
                bail!(
                    "padding index {} outside vocabulary of size {}",
                    padding,
                    config.vocab_size
                );
            }
        }

        let shape = (config.vocab_size, config.embedding_dim);
        let mut initial = Tensor::randn(0f32, 1f32, shape, device)?;
        if let Some(padding) = config.padding_index {
            let keep: Vec<f32> = (0..config.vocab_size)
                .map(|row| if row == padding { 0.0 } else { 1.0 })
                .collect();
            let keep = Tensor::from_vec(keep, (config.vocab_size, 1), device)?;
            initial = initial.broadcast_mul(&keep)?;
        }
        let initial = if dtype == DType::F32 {
            initial
        } else {
            initial.to_dtype(dtype)?
        };

        Ok(Self {
            config,
            weight: Var::from_tensor(&initial)?,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    pub(crate) fn set_config(&mut self, config: EmbeddingConfig) {
        self.config = config;
    }

    /// Looks up `(batch, seq)` integer ids and returns `(batch, seq, dim)`.
    pub fn lookup(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = match token_ids.dims() {
            [batch, seq] if *batch > 0 && *seq > 0 => (*batch, *seq),
            [_, _] => bail!("token_ids must have non-zero batch and seq dimensions"),
            dims => bail!("token_ids must be shaped [batch, seq], got {:?}", dims),
        };
        checks::expect_integer("token_ids", token_ids)?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.as_tensor().index_select(&flat, 0)?;
        let gathered = match self.config.max_norm {
            Some(max_norm) => self.renorm(&gathered, max_norm)?,
            None => gathered,
        };
        gathered.reshape((batch, seq, self.config.embedding_dim))
    }

    /// Rescales rows whose `norm_type`-norm exceeds `max_norm` down to it.
    fn renorm(&self, rows: &Tensor, max_norm: f64) -> Result<Tensor> {
        let p = self.config.norm_type;
        let compute = self.policy.cast_for_reduction(rows)?;
        let norms = compute
            .abs()?
            .powf(p)?
            .sum_keepdim(D::Minus1)?
            .powf(1.0 / p)?;
        let scale = norms
            .affine(1.0, 1e-7)?
            .recip()?
            .affine(max_norm, 0.0)?
            .clamp(0f64, 1f64)?;
        self.policy.cast_to_storage(&compute.broadcast_mul(&scale)?)
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let vocab = self.config.vocab_size as i64;
        let min = flat_ids.min(0)?.to_scalar::<i64>()?;
        if min < 0 {
            return Err(Error::Msg(format!("encountered negative token id {min}")));
        }
        let max = flat_ids.max(0)?.to_scalar::<i64>()?;
        if max >= vocab {
            return Err(Error::Msg(format!(
                "token id {max} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}

impl EmbeddingLayer for TokenEmbedding {
    fn config(&self) -> EmbeddingConfig {
        self.config.clone()
    }

    fn embedding_dim(&self) -> usize {
        self.config.embedding_dim
    }

    fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.lookup(token_ids)
    }

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.weight"), self.weight.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(data: &[i64], shape: (usize, usize)) -> Result<Tensor> {
        Tensor::from_slice(data, shape, &Device::Cpu)
    }

    #[test]
    fn padding_row_starts_at_zero() -> Result<()> {
        let config = EmbeddingConfig::plain(6, 3).with_padding_index(2);
        let embedding = TokenEmbedding::new(config, &Device::Cpu, DType::F32)?;
        let rows = embedding.weight().to_vec2::<f32>()?;
        assert!(rows[2].iter().all(|v| *v == 0.0));
        assert!(rows[0].iter().any(|v| *v != 0.0));
        Ok(())
    }

    #[test]
    fn max_norm_bounds_looked_up_rows() -> Result<()> {
        let config = EmbeddingConfig::plain(16, 8).with_max_norm(0.5, 2.0);
        let embedding = TokenEmbedding::new(config, &Device::Cpu, DType::F32)?;
        let output = embedding.lookup(&ids(&[0, 3, 7, 15], (2, 2))?)?;

        let norms = output.sqr()?.sum(D::Minus1)?.sqrt()?.flatten_all()?;
        for norm in norms.to_vec1::<f32>()? {
            assert!(norm <= 0.5 + 1e-4, "norm {norm} above max_norm");
        }
        Ok(())
    }

    #[test]
    fn rejects_negative_ids_and_float_inputs() -> Result<()> {
        let embedding = TokenEmbedding::new(EmbeddingConfig::plain(4, 2), &Device::Cpu, DType::F32)?;
        let err = embedding.lookup(&ids(&[0, -1], (1, 2))?).unwrap_err();
        assert!(err.to_string().contains("negative token id -1"));

        let floats = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        assert!(embedding.lookup(&floats).is_err());
        Ok(())
    }

    #[test]
    fn reports_largest_out_of_range_id() -> Result<()> {
        let embedding = TokenEmbedding::new(EmbeddingConfig::plain(4, 2), &Device::Cpu, DType::F32)?;
        let err = embedding.lookup(&ids(&[3, 9, 5], (1, 3))?).unwrap_err();
        assert!(err.to_string().contains("token id 9 exceeds vocab size 4"));
        assert_eq!(embedding.lookup(&ids(&[3, 0], (1, 2))?)?.dims(), &[1, 2, 2]);
        Ok(())
    }

    #[test]
    fn padding_index_must_fit_vocabulary() {
        let config = EmbeddingConfig::plain(4, 2).with_padding_index(4);
        assert!(TokenEmbedding::new(config, &Device::Cpu, DType::F32).is_err());
    }
}
