//! Reflectable configuration shared by every embedding strategy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which lookup strategy an [`EmbeddingConfig`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingKind {
    /// Learned lookup table.
    Plain,
    /// Lookup table whose tokens are dropped as a whole while training.
    Regularized,
}

impl EmbeddingKind {
    /// Tag strings accepted in raw mappings, canonical names first.
    pub const TAGS: &'static [(&'static str, EmbeddingKind)] = &[
        ("Plain", EmbeddingKind::Plain),
        ("Regularized", EmbeddingKind::Regularized),
        ("Embedding", EmbeddingKind::Plain),
        ("WordDropEmbedding", EmbeddingKind::Regularized),
    ];

    /// Resolves a tag string; `None` for tags with no registered strategy.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::TAGS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingKind::Plain => "Plain",
            EmbeddingKind::Regularized => "Regularized",
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_norm_type() -> f64 {
    2.0
}

/// Structural parameters of an embedding table.
///
/// `drop_probability` is only meaningful for [`EmbeddingKind::Regularized`];
/// plain tables reflect it as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub kind: EmbeddingKind,
    #[serde(alias = "num_embeddings")]
    pub vocab_size: usize,
    pub embedding_dim: usize,
    /// Row kept at zero and reserved for padding tokens.
    #[serde(default, alias = "padding_idx")]
    pub padding_index: Option<usize>,
    /// Looked-up vectors whose `norm_type`-norm exceeds this are rescaled to it.
    #[serde(default)]
    pub max_norm: Option<f64>,
    #[serde(default = "default_norm_type")]
    pub norm_type: f64,
    /// Gradient hint for the external optimiser; carried for reflection only.
    #[serde(default, alias = "scale_grad_by_freq")]
    pub scale_grad_by_frequency: bool,
    /// Gradient hint for the external optimiser; carried for reflection only.
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, alias = "p")]
    pub drop_probability: Option<f64>,
}

impl EmbeddingConfig {
    /// A plain table with default options.
    pub fn plain(vocab_size: usize, embedding_dim: usize) -> Self {
        Self {
            kind: EmbeddingKind::Plain,
            vocab_size,
            embedding_dim,
            padding_index: None,
            max_norm: None,
            norm_type: default_norm_type(),
            scale_grad_by_frequency: false,
            sparse: false,
            drop_probability: None,
        }
    }

    /// A word-drop table with default options.
    pub fn regularized(vocab_size: usize, embedding_dim: usize, drop_probability: f64) -> Self {
        Self {
            kind: EmbeddingKind::Regularized,
            drop_probability: Some(drop_probability),
            ..Self::plain(vocab_size, embedding_dim)
        }
    }

    pub fn with_padding_index(mut self, padding_index: usize) -> Self {
        self.padding_index = Some(padding_index);
        self
    }

    pub fn with_max_norm(mut self, max_norm: f64, norm_type: f64) -> Self {
        self.max_norm = Some(max_norm);
        self.norm_type = norm_type;
        self
    }
}
