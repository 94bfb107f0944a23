//! Variable-depth feed-forward stacks built from a list of widths.
//!
//! [`build`] maps `(input_dim, dims, dropout_rate, final_bare)` to a
//! [`Transform`]:
//!
//! * no dims: [`Transform::Identity`], which returns its input unchanged;
//! * `final_bare` with a single dim: [`Transform::Affine`], one projection with
//!   no activation or dropout;
//! * otherwise a [`Transform::Stack`] with one `affine -> activation -> dropout`
//!   block per consecutive pair of `[input_dim, *dims]`. With `final_bare` the
//!   last block is replaced by a bare projection into the final width.
//!
//! Stacks work on per-token states `(batch, seq, hidden)` as well as pooled
//! vectors `(batch, hidden)`.

use std::fmt;

use candle_core::{DType, Device, Error, Result, Tensor, Var};

use crate::{
    activations::ActivationKind,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

/// Placement and initialisation knobs that are not part of a stack's shape.
#[derive(Debug, Clone)]
pub struct StackOptions {
    pub device: Device,
    pub dtype: DType,
    pub activation: ActivationKind,
    pub init: LinearInit,
    /// Base seed for dropout masks; block `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
            activation: ActivationKind::Relu,
            init: LinearInit::default(),
            seed: 0,
        }
    }
}

/// One entry of a flattened transform, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerSummary {
    Affine { input_dim: usize, output_dim: usize },
    Activation(ActivationKind),
    Dropout { probability: f64 },
}

impl fmt::Display for LayerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSummary::Affine {
                input_dim,
                output_dim,
            } => write!(f, "Linear({input_dim} -> {output_dim})"),
            LayerSummary::Activation(kind) => write!(f, "{kind}"),
            LayerSummary::Dropout { probability } => write!(f, "Dropout(p={probability})"),
        }
    }
}

/// `affine -> activation -> dropout`.
#[derive(Debug)]
pub struct FeedForwardBlock {
    linear: Linear,
    activation: ActivationKind,
    dropout: Dropout,
}

impl FeedForwardBlock {
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let projected = self.linear.forward(hidden, policy)?;
        let activated = self.activation.forward(&projected, policy)?;
        self.dropout.forward(&activated, policy)
    }
}

/// Sequence of blocks optionally followed by a bare projection.
#[derive(Debug)]
pub struct FeedForwardStack {
    blocks: Vec<FeedForwardBlock>,
    head: Option<Linear>,
}

impl FeedForwardStack {
    pub fn blocks(&self) -> &[FeedForwardBlock] {
        &self.blocks
    }

    /// The trailing bare projection, present when built with `final_bare`.
    pub fn head(&self) -> Option<&Linear> {
        self.head.as_ref()
    }

    fn linears(&self) -> impl Iterator<Item = &Linear> {
        self.blocks
            .iter()
            .map(|block| &block.linear)
            .chain(self.head.iter())
    }
}

/// A built pre- or post-pooling transform.
#[derive(Debug)]
pub enum Transform {
    Identity,
    Affine(Linear),
    Stack(FeedForwardStack),
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        matches!(self, Transform::Identity)
    }

    /// Width of the output given the width fed in.
    pub fn output_dim(&self, input_dim: usize) -> usize {
        match self {
            Transform::Identity => input_dim,
            Transform::Affine(linear) => linear.config().output_dim,
            Transform::Stack(stack) => stack
                .linears()
                .last()
                .map_or(input_dim, |linear| linear.config().output_dim),
        }
    }

    /// Flattened layer listing in evaluation order.
    pub fn summary(&self) -> Vec<LayerSummary> {
        let affine = |linear: &Linear| LayerSummary::Affine {
            input_dim: linear.config().input_dim,
            output_dim: linear.config().output_dim,
        };
        match self {
            Transform::Identity => Vec::new(),
            Transform::Affine(linear) => vec![affine(linear)],
            Transform::Stack(stack) => {
                let mut layers = Vec::with_capacity(stack.blocks.len() * 3 + 1);
                for block in &stack.blocks {
                    layers.push(affine(&block.linear));
                    layers.push(LayerSummary::Activation(block.activation));
                    layers.push(LayerSummary::Dropout {
                        probability: block.dropout.probability(),
                    });
                }
                layers.extend(stack.head.iter().map(affine));
                layers
            }
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Transform::Identity => 0,
            Transform::Affine(linear) => linear.config().parameter_count(),
            Transform::Stack(stack) => stack
                .linears()
                .map(|linear| linear.config().parameter_count())
                .sum(),
        }
    }

    /// Trainable parameters, numbered by position like a sequential container.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        match self {
            Transform::Identity => Vec::new(),
            Transform::Affine(linear) => linear.named_parameters(scope),
            Transform::Stack(stack) => stack
                .linears()
                .enumerate()
                .flat_map(|(idx, linear)| linear.named_parameters(&format!("{scope}.{idx}")))
                .collect(),
        }
    }

    /// Switches every dropout layer between training and evaluation.
    pub fn set_training(&self, training: bool) {
        if let Transform::Stack(stack) = self {
            for block in &stack.blocks {
                block.dropout.set_training(training);
            }
        }
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        match self {
            Transform::Identity => Ok(hidden.clone()),
            Transform::Affine(linear) => linear.forward(hidden, policy),
            Transform::Stack(stack) => {
                let mut hidden = hidden.clone();
                for block in &stack.blocks {
                    hidden = block.forward(&hidden, policy)?;
                }
                match &stack.head {
                    Some(head) => head.forward(&hidden, policy),
                    None => Ok(hidden),
                }
            }
        }
    }
}

/// Builds the transform described by `dims` on top of `input_dim` features.
pub fn build(
    input_dim: usize,
    dims: Option<&[usize]>,
    dropout_rate: f64,
    final_bare: bool,
    options: &StackOptions,
) -> Result<Transform> {
    let dims = match dims {
        Some(dims) if !dims.is_empty() => dims,
        _ => return Ok(Transform::Identity),
    };
    if let Some(pos) = dims.iter().position(|dim| *dim == 0) {
        return Err(Error::Msg(format!(
            "feed-forward width at position {pos} must be positive"
        )));
    }

    let projection = |dim_in: usize, dim_out: usize| {
        Linear::with_init(
            LinearConfig::new(dim_in, dim_out),
            &options.init,
            &options.device,
            options.dtype,
        )
    };

    if final_bare && dims.len() == 1 {
        return Ok(Transform::Affine(projection(input_dim, dims[0])?));
    }

    let widths: Vec<usize> = std::iter::once(input_dim).chain(dims.iter().copied()).collect();
    let block_count = if final_bare { dims.len() - 1 } else { dims.len() };

    let mut blocks = Vec::with_capacity(block_count);
    for (idx, pair) in widths.windows(2).take(block_count).enumerate() {
        blocks.push(FeedForwardBlock {
            linear: projection(pair[0], pair[1])?,
            activation: options.activation,
            dropout: Dropout::new(dropout_rate, options.seed.wrapping_add(idx as u64))?,
        });
    }

    let head = if final_bare {
        let last = widths.len() - 1;
        Some(projection(widths[last - 1], widths[last])?)
    } else {
        None
    };

    tracing::trace!(input_dim, ?dims, final_bare, blocks = blocks.len(), "built feed-forward stack");
    Ok(Transform::Stack(FeedForwardStack { blocks, head }))
}
