//! Reflectable pooling configuration.

use serde::{Deserialize, Serialize};

/// Pooling strategy and its parameters, tagged by `kind` when serialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PoolingConfig {
    /// Element-wise max over the sequence.
    Max,
    /// Element-wise mean over the sequence.
    Mean,
    /// Mean over every window of `window_size` consecutive tokens, then max over windows.
    Hierarchical { window_size: usize },
}

impl PoolingConfig {
    /// Tag strings accepted in raw mappings mapped to the canonical tag.
    pub const TAGS: &'static [(&'static str, &'static str)] = &[
        ("Max", "Max"),
        ("Mean", "Mean"),
        ("Hierarchical", "Hierarchical"),
        ("MaxPooling", "Max"),
        ("MeanPooling", "Mean"),
        ("AvgPooling", "Mean"),
        ("HierarchicalPooling", "Hierarchical"),
    ];

    /// Canonical tag for `tag`, or `None` when no strategy is registered under it.
    pub fn canonical_tag(tag: &str) -> Option<&'static str> {
        Self::TAGS
            .iter()
            .find(|(alias, _)| *alias == tag)
            .map(|(_, canonical)| *canonical)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PoolingConfig::Max => "Max",
            PoolingConfig::Mean => "Mean",
            PoolingConfig::Hierarchical { .. } => "Hierarchical",
        }
    }
}
