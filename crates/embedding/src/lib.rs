//! Embedding strategies for SWEM pipelines.
//!
//! Every strategy implements [`EmbeddingLayer`]: it maps `(batch, seq)` token
//! ids to `(batch, seq, embedding_dim)` vectors and can report its own
//! [`EmbeddingConfig`] so a live pipeline can be reflected back into the
//! configuration it was built from. [`build`] is the registry that turns a
//! config into the matching strategy.

pub mod config;
pub mod token;
pub mod word_drop;

use candle_core::{bail, DType, Device, Result, Tensor, Var};

pub use config::{EmbeddingConfig, EmbeddingKind};
pub use token::TokenEmbedding;
pub use word_drop::WordDropEmbedding;

/// Token lookup capability shared by every embedding strategy.
pub trait EmbeddingLayer: Send + Sync + std::fmt::Debug {
    /// The configuration this layer was built from, reconstructed from its own state.
    fn config(&self) -> EmbeddingConfig;

    fn embedding_dim(&self) -> usize;

    /// Looks up `(batch, seq)` integer ids.
    fn forward(&self, token_ids: &Tensor) -> Result<Tensor>;

    /// Toggles training-only behaviour. No-op for deterministic strategies.
    fn set_training(&self, _training: bool) {}

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)>;
}

/// Builds the strategy registered for `config.kind`.
///
/// Callers that construct an [`EmbeddingConfig`] directly get the same
/// plain-table `drop_probability` refusal as validated pipeline configs.
pub fn build(
    config: &EmbeddingConfig,
    device: &Device,
    dtype: DType,
    seed: u64,
) -> Result<Box<dyn EmbeddingLayer>> {
    tracing::debug!(
        kind = %config.kind,
        vocab_size = config.vocab_size,
        embedding_dim = config.embedding_dim,
        "building embedding"
    );
    match config.kind {
        EmbeddingKind::Plain => {
            if config.drop_probability.is_some() {
                bail!("plain embedding does not take a drop_probability");
            }
            Ok(Box::new(TokenEmbedding::new(config.clone(), device, dtype)?))
        }
        EmbeddingKind::Regularized => Ok(Box::new(WordDropEmbedding::new(
            config.clone(),
            device,
            dtype,
            seed,
        )?)),
    }
}
