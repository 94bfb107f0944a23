//! Turns a [`SwemConfig`] into a live [`Swem`].

use candle_core::{DType, Device};
use layers::{build_feed_forward, PrecisionPolicy, StackOptions};
use serde_json::Value;

use crate::{
    config::SwemConfig,
    error::{Result, SwemError},
    model::Swem,
};

/// Seed offsets keep the dropout streams of the three stochastic stages apart.
const PRE_POOLING_SEED_OFFSET: u64 = 0x100;
const POST_POOLING_SEED_OFFSET: u64 = 0x200;

/// Placement and randomness for assembled pipelines.
#[derive(Debug, Clone)]
pub struct Assembler {
    device: Device,
    dtype: DType,
    seed: u64,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(Device::Cpu, DType::F32)
    }
}

impl Assembler {
    pub fn new(device: Device, dtype: DType) -> Self {
        Self {
            device,
            dtype,
            seed: 0,
        }
    }

    /// Base seed for every dropout mask drawn by assembled pipelines.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Builds embedding, pre-pooling stack, pooling and post-pooling stack.
    ///
    /// The pre-pooling stack ends in a full block; the post-pooling stack ends
    /// in a bare projection so the encoder output is not clipped by an
    /// activation.
    pub fn assemble(&self, config: &SwemConfig) -> Result<Swem> {
        tracing::debug!(
            embedding = %config.embedding().kind,
            pooling = config.pooling().kind(),
            pre_pooling_dims = ?config.pre_pooling_dims(),
            post_pooling_dims = ?config.post_pooling_dims(),
            dropout_rate = config.dropout_rate(),
            "assembling swem"
        );

        let embedding = embedding::build(config.embedding(), &self.device, self.dtype, self.seed)
            .map_err(|err| component_error("embedding", err))?;
        let pooling =
            pooling::build(config.pooling()).map_err(|err| component_error("pooling", err))?;

        let pre_pooling = build_feed_forward(
            embedding.embedding_dim(),
            config.pre_pooling_dims(),
            config.dropout_rate(),
            false,
            &self.stack_options(PRE_POOLING_SEED_OFFSET),
        )?;
        let pooling_dim = pre_pooling.output_dim(embedding.embedding_dim());
        let post_pooling = build_feed_forward(
            pooling_dim,
            config.post_pooling_dims(),
            config.dropout_rate(),
            true,
            &self.stack_options(POST_POOLING_SEED_OFFSET),
        )?;

        let swem = Swem::from_components(
            embedding,
            pre_pooling,
            pooling,
            post_pooling,
            config,
            PrecisionPolicy::from_parameter_dtype(self.dtype),
        );
        tracing::debug!(
            output_dim = swem.output_dim(),
            parameters = swem.parameter_count(),
            "assembled swem"
        );
        Ok(swem)
    }

    /// Normalises `raw` and assembles it.
    ///
    /// Tags with no registered strategy fail with
    /// [`SwemError::UnsupportedVariant`] before anything is allocated.
    pub fn assemble_mapping(&self, raw: &Value) -> Result<Swem> {
        let config = SwemConfig::from_mapping(raw).inspect_err(|err| {
            if let SwemError::UnsupportedVariant { component, kind } = err {
                tracing::debug!(%component, %kind, "no strategy registered");
            }
        })?;
        self.assemble(&config)
    }

    fn stack_options(&self, offset: u64) -> StackOptions {
        StackOptions {
            device: self.device.clone(),
            dtype: self.dtype,
            seed: self.seed.wrapping_add(offset),
            ..StackOptions::default()
        }
    }
}

/// Registry refusals are reported against the component that raised them.
fn component_error(field: &str, err: candle_core::Error) -> SwemError {
    SwemError::config(field, "<config>", err.to_string())
}
