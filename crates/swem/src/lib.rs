//! Config-driven Simple Word Embedding Model pipelines.
//!
//! A [`SwemConfig`] describes four stages: an embedding lookup, an optional
//! per-token feed-forward stack, a pooling reduction and an optional
//! feed-forward stack over the pooled vector. The [`Assembler`] builds the
//! live [`Swem`] from it and [`Swem::config`] reflects a live pipeline back
//! into the configuration it was built from.
//!
//! ```no_run
//! use serde_json::json;
//! use swem::{Swem, SwemConfig};
//!
//! # fn main() -> swem::Result<()> {
//! let config = SwemConfig::from_mapping(&json!({
//!     "embedding": { "kind": "Plain", "vocab_size": 10, "embedding_dim": 2 },
//!     "pooling": { "kind": "Max" },
//!     "pre_pooling_dims": [5, 5],
//!     "post_pooling_dims": [6, 6],
//!     "dropout_rate": 0.1
//! }))?;
//! let swem = Swem::from_config(&config)?;
//! assert_eq!(swem.output_dim(), 6);
//! assert_eq!(swem.config(), config);
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod config;
pub mod error;
pub mod model;

pub use assembler::Assembler;
pub use config::{SwemConfig, DEFAULT_DROPOUT_RATE};
pub use error::{Component, Result, SwemError};
pub use model::Swem;

pub use embedding::{EmbeddingConfig, EmbeddingKind};
pub use pooling::PoolingConfig;
