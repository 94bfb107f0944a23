//! Word-drop embedding: while training, every token position is replaced by a
//! zero vector with probability `drop_probability`. Evaluation is a plain
//! lookup.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use candle_core::{bail, DType, Device, Result, Tensor, Var};
use layers::{dropout::keep_mask, Lcg64};

use crate::{EmbeddingConfig, EmbeddingKind, EmbeddingLayer, TokenEmbedding};

pub struct WordDropEmbedding {
    table: TokenEmbedding,
    probability: f64,
    rng: Mutex<Lcg64>,
    training: AtomicBool,
}

impl fmt::Debug for WordDropEmbedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordDropEmbedding")
            .field("table", &self.table)
            .field("probability", &self.probability)
            .finish()
    }
}

impl WordDropEmbedding {
    pub fn new(config: EmbeddingConfig, device: &Device, dtype: DType, seed: u64) -> Result<Self> {
        let probability = match config.drop_probability {
            Some(p) if (0.0..1.0).contains(&p) => p,
            Some(p) => bail!("word drop probability must be in [0, 1), got {}", p),
            None => bail!("word drop embedding requires drop_probability"),
        };
        let mut table = TokenEmbedding::new(config.clone(), device, dtype)?;
        table.set_config(EmbeddingConfig {
            kind: EmbeddingKind::Regularized,
            ..config
        });
        Ok(Self {
            table,
            probability,
            rng: Mutex::new(Lcg64::new(seed)),
            training: AtomicBool::new(true),
        })
    }

    pub fn table(&self) -> &TokenEmbedding {
        &self.table
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }
}

impl EmbeddingLayer for WordDropEmbedding {
    fn config(&self) -> EmbeddingConfig {
        self.table.config()
    }

    fn embedding_dim(&self) -> usize {
        self.table.embedding_dim()
    }

    fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let embedded = self.table.lookup(token_ids)?;
        if !self.is_training() || self.probability == 0.0 {
            return Ok(embedded);
        }
        let (batch, seq, _) = embedded.dims3()?;
        let keep = keep_mask(&self.rng, &[batch, seq], 1.0 - self.probability, embedded.device())?
            .unsqueeze(2)?
            .to_dtype(embedded.dtype())?;
        embedded.broadcast_mul(&keep)
    }

    fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.table.named_parameters(scope)
    }
}
