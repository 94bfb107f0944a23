//! Element-wise non-linearities used between affine maps.
//!
//! Activations keep the input layout and evaluate in the compute dtype of the
//! supplied [`PrecisionPolicy`] before casting back to storage.

use std::fmt;

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Identifies which non-linearity a feed-forward block applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationKind {
    /// Pass-through, useful when wiring purely linear stacks.
    Identity,
    /// `max(0, x)`.
    #[default]
    Relu,
    /// Erf-based GELU `0.5 * x * (1 + erf(x / sqrt(2)))`.
    Gelu,
    /// `x * sigmoid(x)`.
    Silu,
}

impl ActivationKind {
    /// Applies the activation to `input` using the precision rules in `policy`.
    pub fn forward(self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let compute = policy.cast_for_matmul(input)?;
        let output = match self {
            ActivationKind::Identity => return Ok(input.clone()),
            ActivationKind::Relu => compute.relu()?,
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::Silu => compute.silu()?,
        };
        policy.cast_to_storage(&output)
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationKind::Identity => "identity",
            ActivationKind::Relu => "relu",
            ActivationKind::Gelu => "gelu",
            ActivationKind::Silu => "silu",
        };
        f.write_str(name)
    }
}
