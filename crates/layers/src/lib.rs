//! Building blocks for SWEM pipelines.
//!
//! Affine projections, activations, dropout and the feed-forward stack
//! builder used for the pre- and post-pooling transforms, all assembled from
//! Candle primitives.

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod feed_forward;
pub mod linear;

pub use activations::ActivationKind;
pub use dropout::{Dropout, Lcg64};
pub use dtypes::PrecisionPolicy;
pub use feed_forward::{build as build_feed_forward, LayerSummary, StackOptions, Transform};
pub use linear::{Linear, LinearConfig, LinearInit};
