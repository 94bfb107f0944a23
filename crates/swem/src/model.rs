use std::fmt;

use candle_core::{Tensor, Var};
use embedding::EmbeddingLayer;
use layers::{LayerSummary, PrecisionPolicy, Transform};
use pooling::PoolingLayer;
use serde_json::Value;

use crate::{assembler::Assembler, config::SwemConfig, error::Result};

/// Simple Word Embedding Model: embed, optionally transform each token,
/// pool over the sequence, optionally transform the pooled vector.
pub struct Swem {
    embedding: Box<dyn EmbeddingLayer>,
    pre_pooling: Transform,
    pooling: Box<dyn PoolingLayer>,
    post_pooling: Transform,
    /// Declared widths, consulted only for stages that were elided to identity.
    declared_pre_pooling_dims: Option<Vec<usize>>,
    declared_post_pooling_dims: Option<Vec<usize>>,
    dropout_rate: f64,
    policy: PrecisionPolicy,
}

impl fmt::Debug for Swem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swem")
            .field("embedding", &self.embedding)
            .field("pre_pooling", &self.pre_pooling.summary())
            .field("pooling", &self.pooling)
            .field("post_pooling", &self.post_pooling.summary())
            .field("output_dim", &self.output_dim())
            .finish()
    }
}

impl Swem {
    pub(crate) fn from_components(
        embedding: Box<dyn EmbeddingLayer>,
        pre_pooling: Transform,
        pooling: Box<dyn PoolingLayer>,
        post_pooling: Transform,
        declared: &SwemConfig,
        policy: PrecisionPolicy,
    ) -> Self {
        Self {
            embedding,
            pre_pooling,
            pooling,
            post_pooling,
            declared_pre_pooling_dims: declared.pre_pooling_dims().map(<[usize]>::to_vec),
            declared_post_pooling_dims: declared.post_pooling_dims().map(<[usize]>::to_vec),
            dropout_rate: declared.dropout_rate(),
            policy,
        }
    }

    /// Assembles `config` on the CPU in `f32` with seed 0.
    pub fn from_config(config: &SwemConfig) -> Result<Self> {
        Assembler::default().assemble(config)
    }

    /// Normalises and assembles an untyped mapping with the default assembler.
    pub fn from_mapping(raw: &Value) -> Result<Self> {
        Assembler::default().assemble_mapping(raw)
    }

    /// Reconstructs the configuration from the live components.
    ///
    /// Embedding and pooling parameters come from the components themselves
    /// and stack widths from the built projections. A stage that was elided
    /// reports the widths it was declared with, so an empty list and an absent
    /// one stay distinct.
    pub fn config(&self) -> SwemConfig {
        SwemConfig::from_parts(
            self.embedding.config(),
            self.pooling.config(),
            reflect_dims(&self.pre_pooling, &self.declared_pre_pooling_dims),
            reflect_dims(&self.post_pooling, &self.declared_post_pooling_dims),
            self.dropout_rate,
        )
    }

    /// Encodes `(batch, seq)` token ids into `(batch, output_dim)`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.encode(token_ids, None)
    }

    /// As [`Swem::forward`], with a `(batch, seq)` mask of 1 for real tokens
    /// and 0 for padding.
    pub fn forward_masked(&self, token_ids: &Tensor, mask: &Tensor) -> Result<Tensor> {
        self.encode(token_ids, Some(mask))
    }

    fn encode(&self, token_ids: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let embedded = self.embedding.forward(token_ids)?;
        let tokens = self.pre_pooling.forward(&embedded, &self.policy)?;
        let pooled = self.pooling.forward(&tokens, mask)?;
        let encoded = self.post_pooling.forward(&pooled, &self.policy)?;
        tracing::trace!(
            input = ?token_ids.dims(),
            output = ?encoded.dims(),
            "swem forward"
        );
        Ok(encoded)
    }

    /// Switches word drop and every dropout layer between training and evaluation.
    pub fn set_training(&self, training: bool) {
        self.embedding.set_training(training);
        self.pre_pooling.set_training(training);
        self.post_pooling.set_training(training);
    }

    pub fn embedding(&self) -> &dyn EmbeddingLayer {
        self.embedding.as_ref()
    }

    pub fn pooling(&self) -> &dyn PoolingLayer {
        self.pooling.as_ref()
    }

    pub fn pre_pooling(&self) -> &Transform {
        &self.pre_pooling
    }

    pub fn post_pooling(&self) -> &Transform {
        &self.post_pooling
    }

    /// Width of the token vectors fed to the pooling layer.
    pub fn pooling_input_dim(&self) -> usize {
        self.pre_pooling.output_dim(self.embedding.embedding_dim())
    }

    pub fn output_dim(&self) -> usize {
        self.post_pooling.output_dim(self.pooling_input_dim())
    }

    pub fn parameter_count(&self) -> usize {
        let config = self.embedding.config();
        config.vocab_size * config.embedding_dim
            + self.pre_pooling.parameter_count()
            + self.post_pooling.parameter_count()
    }

    /// Every trainable parameter, scoped by stage.
    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.embedding.named_parameters("embedding");
        params.extend(self.pre_pooling.named_parameters("pre_pooling"));
        params.extend(self.post_pooling.named_parameters("post_pooling"));
        params
    }
}

fn reflect_dims(transform: &Transform, declared: &Option<Vec<usize>>) -> Option<Vec<usize>> {
    if transform.is_identity() {
        return declared.clone();
    }
    Some(
        transform
            .summary()
            .into_iter()
            .filter_map(|layer| match layer {
                LayerSummary::Affine { output_dim, .. } => Some(output_dim),
                _ => None,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use embedding::EmbeddingConfig;
    use pooling::PoolingConfig;

    fn ids(batch: usize, seq: usize) -> Tensor {
        let data: Vec<i64> = (0..batch * seq).map(|idx| (idx % 10) as i64).collect();
        Tensor::from_vec(data, (batch, seq), &Device::Cpu).unwrap()
    }

    #[test]
    fn reflected_dims_follow_the_built_projections() -> Result<()> {
        let config = SwemConfig::new(
            EmbeddingConfig::plain(10, 2),
            PoolingConfig::Mean,
            Some(vec![4, 3]),
            Some(vec![7]),
            0.0,
        )?;
        let swem = Swem::from_config(&config)?;
        assert!(matches!(swem.post_pooling(), Transform::Affine(_)));
        assert_eq!(swem.config().pre_pooling_dims(), Some(&[4, 3][..]));
        assert_eq!(swem.config().post_pooling_dims(), Some(&[7][..]));
        Ok(())
    }

    #[test]
    fn masked_forward_ignores_padding_positions() -> Result<()> {
        let config = SwemConfig::new(
            EmbeddingConfig::plain(10, 4),
            PoolingConfig::Max,
            None,
            None,
            0.0,
        )?;
        let swem = Swem::from_config(&config)?;
        let token_ids = ids(2, 3);
        let mask = Tensor::from_vec(vec![1f32, 1., 0., 1., 0., 0.], (2, 3), &Device::Cpu)?;

        let masked = swem.forward_masked(&token_ids, &mask)?;
        let first_two = swem.forward(&token_ids.narrow(1, 0, 2)?)?;
        assert_eq!(
            masked.get(0)?.to_vec1::<f32>()?,
            first_two.get(0)?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn parameters_are_scoped_by_stage() -> Result<()> {
        let config = SwemConfig::new(
            EmbeddingConfig::plain(10, 2),
            PoolingConfig::Max,
            Some(vec![3]),
            Some(vec![2]),
            0.1,
        )?;
        let swem = Swem::from_config(&config)?;
        let names: Vec<String> = swem
            .named_parameters()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names.first().map(String::as_str), Some("embedding.weight"));
        assert!(names.contains(&"pre_pooling.0.weight".to_string()));
        assert!(names.contains(&"post_pooling.bias".to_string()));
        assert_eq!(swem.parameter_count(), 10 * 2 + (2 * 3 + 3) + (3 * 2 + 2));
        Ok(())
    }
}
