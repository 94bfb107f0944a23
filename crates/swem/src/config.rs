//! Validated, immutable description of a SWEM pipeline.
//!
//! A [`SwemConfig`] is built either from typed parts with [`SwemConfig::new`]
//! or from an untyped mapping with [`SwemConfig::from_mapping`]. Both routes
//! end in the same validation, so a value of this type is always structurally
//! sound; the fields are private to keep it that way.

use std::{fs, path::Path};

use embedding::{EmbeddingConfig, EmbeddingKind};
use pooling::PoolingConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Component, Result, SwemError};

/// Dropout rate used when a mapping does not specify one.
pub const DEFAULT_DROPOUT_RATE: f64 = 0.2;

/// Keys that may carry the variant tag of an embedding or pooling mapping.
const TAG_KEYS: [&str; 3] = ["kind", "class", "type"];

const TOP_LEVEL_KEYS: [&str; 6] = [
    "embedding",
    "pooling",
    "pre_pooling_dims",
    "post_pooling_dims",
    "dropout_rate",
    "dropout",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct SwemConfig {
    embedding: EmbeddingConfig,
    pooling: PoolingConfig,
    pre_pooling_dims: Option<Vec<usize>>,
    post_pooling_dims: Option<Vec<usize>>,
    dropout_rate: f64,
}

impl SwemConfig {
    /// Validates typed parts into a config.
    pub fn new(
        embedding: EmbeddingConfig,
        pooling: PoolingConfig,
        pre_pooling_dims: Option<Vec<usize>>,
        post_pooling_dims: Option<Vec<usize>>,
        dropout_rate: f64,
    ) -> Result<Self> {
        let config = Self::from_parts(
            embedding,
            pooling,
            pre_pooling_dims,
            post_pooling_dims,
            dropout_rate,
        );
        config.validate()?;
        Ok(config)
    }

    /// Assembles parts that are already known to be valid.
    pub(crate) fn from_parts(
        embedding: EmbeddingConfig,
        pooling: PoolingConfig,
        pre_pooling_dims: Option<Vec<usize>>,
        post_pooling_dims: Option<Vec<usize>>,
        dropout_rate: f64,
    ) -> Self {
        Self {
            embedding,
            pooling,
            pre_pooling_dims,
            post_pooling_dims,
            dropout_rate,
        }
    }

    /// Normalises an untyped mapping.
    ///
    /// The `embedding` and `pooling` entries are dispatched on their tag
    /// (`kind`, `class` or `type`). An unregistered tag fails with
    /// [`SwemError::UnsupportedVariant`]; every other problem fails with
    /// [`SwemError::Config`] naming the field.
    pub fn from_mapping(raw: &Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| SwemError::config("<root>", raw, "expected a mapping"))?;
        if let Some(key) = object
            .keys()
            .find(|key| !TOP_LEVEL_KEYS.contains(&key.as_str()))
        {
            return Err(SwemError::config(key.as_str(), &object[key], "unknown field"));
        }

        let embedding = normalize_embedding(required(object, "embedding")?)?;
        let pooling = normalize_pooling(required(object, "pooling")?)?;
        let pre_pooling_dims = parse_dims("pre_pooling_dims", object.get("pre_pooling_dims"))?;
        let post_pooling_dims = parse_dims("post_pooling_dims", object.get("post_pooling_dims"))?;
        let dropout_rate = parse_dropout(object)?;

        Self::new(
            embedding,
            pooling,
            pre_pooling_dims,
            post_pooling_dims,
            dropout_rate,
        )
    }

    /// Loads a `.json` or `.toml` file (extension-less paths are read as TOML).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let raw: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => {
                serde_json::to_value(toml::from_str::<toml::Value>(&contents)?)?
            }
            Some(other) => {
                return Err(SwemError::config(
                    "path",
                    path.display(),
                    format!("unsupported configuration extension '{other}'"),
                ));
            }
        };
        Self::from_mapping(&raw)
    }

    /// Canonical mapping: canonical tags under `kind`, canonical key names.
    pub fn to_mapping(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn embedding(&self) -> &EmbeddingConfig {
        &self.embedding
    }

    pub fn pooling(&self) -> &PoolingConfig {
        &self.pooling
    }

    pub fn pre_pooling_dims(&self) -> Option<&[usize]> {
        self.pre_pooling_dims.as_deref()
    }

    pub fn post_pooling_dims(&self) -> Option<&[usize]> {
        self.post_pooling_dims.as_deref()
    }

    pub fn dropout_rate(&self) -> f64 {
        self.dropout_rate
    }

    /// Width of the vectors handed to the pooling layer.
    pub fn pooling_input_dim(&self) -> usize {
        last_dim(self.pre_pooling_dims()).unwrap_or(self.embedding.embedding_dim)
    }

    /// Width of the encoded output: last post-pooling dim, else last
    /// pre-pooling dim, else the embedding width.
    pub fn output_dim(&self) -> usize {
        last_dim(self.post_pooling_dims()).unwrap_or_else(|| self.pooling_input_dim())
    }

    fn validate(&self) -> Result<()> {
        validate_dims("pre_pooling_dims", self.pre_pooling_dims())?;
        validate_dims("post_pooling_dims", self.post_pooling_dims())?;
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(SwemError::config(
                "dropout_rate",
                self.dropout_rate,
                "must be at least 0 and strictly less than 1",
            ));
        }
        validate_embedding(&self.embedding)?;
        if let PoolingConfig::Hierarchical { window_size: 0 } = self.pooling {
            return Err(SwemError::config(
                "pooling.window_size",
                0,
                "window must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl TryFrom<Value> for SwemConfig {
    type Error = SwemError;

    fn try_from(raw: Value) -> Result<Self> {
        Self::from_mapping(&raw)
    }
}

fn last_dim(dims: Option<&[usize]>) -> Option<usize> {
    dims.and_then(|dims| dims.last().copied())
}

fn required<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Value> {
    object
        .get(field)
        .ok_or_else(|| SwemError::config(field, "<missing>", "required field"))
}

fn validate_dims(field: &str, dims: Option<&[usize]>) -> Result<()> {
    for (idx, dim) in dims.unwrap_or_default().iter().enumerate() {
        if *dim == 0 {
            return Err(SwemError::config(
                format!("{field}[{idx}]"),
                dim,
                "dimension must be greater than 0",
            ));
        }
    }
    Ok(())
}

fn validate_embedding(embedding: &EmbeddingConfig) -> Result<()> {
    if embedding.vocab_size == 0 {
        return Err(SwemError::config(
            "embedding.vocab_size",
            0,
            "must be greater than 0",
        ));
    }
    if embedding.embedding_dim == 0 {
        return Err(SwemError::config(
            "embedding.embedding_dim",
            0,
            "must be greater than 0",
        ));
    }
    if let Some(padding) = embedding.padding_index {
        if padding >= embedding.vocab_size {
            return Err(SwemError::config(
                "embedding.padding_index",
                padding,
                format!("must be below vocab_size {}", embedding.vocab_size),
            ));
        }
    }
    if let Some(max_norm) = embedding.max_norm {
        if !(max_norm.is_finite() && max_norm > 0.0) {
            return Err(SwemError::config(
                "embedding.max_norm",
                max_norm,
                "must be a positive number",
            ));
        }
    }
    if !(embedding.norm_type.is_finite() && embedding.norm_type > 0.0) {
        return Err(SwemError::config(
            "embedding.norm_type",
            embedding.norm_type,
            "must be a positive number",
        ));
    }
    match (embedding.kind, embedding.drop_probability) {
        (EmbeddingKind::Plain, None) => Ok(()),
        (EmbeddingKind::Plain, Some(p)) => Err(SwemError::config(
            "embedding.drop_probability",
            p,
            "only Regularized embeddings take a drop probability",
        )),
        (EmbeddingKind::Regularized, Some(p)) if (0.0..1.0).contains(&p) => Ok(()),
        (EmbeddingKind::Regularized, Some(p)) => Err(SwemError::config(
            "embedding.drop_probability",
            p,
            "must be at least 0 and strictly less than 1",
        )),
        (EmbeddingKind::Regularized, None) => Err(SwemError::config(
            "embedding.drop_probability",
            "<missing>",
            "required for Regularized embeddings",
        )),
    }
}

/// Removes the tag entry from `map` and returns the tag string.
fn take_tag(component: Component, map: &mut Map<String, Value>) -> Result<String> {
    let mut found: Option<(&str, Value)> = None;
    for key in TAG_KEYS {
        if let Some(value) = map.remove(key) {
            if let Some((first, _)) = &found {
                return Err(SwemError::config(
                    format!("{component}.{key}"),
                    value,
                    format!("tag already given under `{first}`"),
                ));
            }
            found = Some((key, value));
        }
    }
    match found {
        Some((_, Value::String(tag))) => Ok(tag),
        Some((key, other)) => Err(SwemError::config(
            format!("{component}.{key}"),
            other,
            "tag must be a string",
        )),
        None => Err(SwemError::config(
            format!("{component}.kind"),
            "<missing>",
            "required variant tag",
        )),
    }
}

fn sub_mapping(component: Component, raw: &Value) -> Result<Map<String, Value>> {
    raw.as_object()
        .cloned()
        .ok_or_else(|| SwemError::config(component.to_string(), raw, "expected a mapping"))
}

fn normalize_embedding(raw: &Value) -> Result<EmbeddingConfig> {
    let component = Component::Embedding;
    let mut map = sub_mapping(component, raw)?;
    let tag = take_tag(component, &mut map)?;
    let kind = EmbeddingKind::from_tag(&tag).ok_or(SwemError::UnsupportedVariant {
        component,
        kind: tag,
    })?;
    map.insert("kind".into(), Value::from(kind.as_str()));
    serde_json::from_value(Value::Object(map))
        .map_err(|err| SwemError::config("embedding", raw, err.to_string()))
}

fn normalize_pooling(raw: &Value) -> Result<PoolingConfig> {
    let component = Component::Pooling;
    let mut map = sub_mapping(component, raw)?;
    let tag = take_tag(component, &mut map)?;
    let canonical = PoolingConfig::canonical_tag(&tag).ok_or(SwemError::UnsupportedVariant {
        component,
        kind: tag,
    })?;
    let parameters: &[&str] = match canonical {
        "Hierarchical" => &["window_size"],
        _ => &[],
    };
    if let Some(key) = map.keys().find(|key| !parameters.contains(&key.as_str())) {
        return Err(SwemError::config(
            format!("pooling.{key}"),
            &map[key],
            format!("unknown field for {canonical} pooling"),
        ));
    }
    map.insert("kind".into(), Value::from(canonical));
    serde_json::from_value(Value::Object(map))
        .map_err(|err| SwemError::config("pooling", raw, err.to_string()))
}

fn parse_dims(field: &str, raw: Option<&Value>) -> Result<Option<Vec<usize>>> {
    let items = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(SwemError::config(field, other, "expected a list of dimensions"));
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| match item.as_i64() {
            Some(dim) if dim >= 0 => Ok(dim as usize),
            Some(dim) => Err(SwemError::config(
                format!("{field}[{idx}]"),
                dim,
                "dimension must be greater than 0",
            )),
            None => Err(SwemError::config(
                format!("{field}[{idx}]"),
                item,
                "expected an integer",
            )),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn parse_dropout(object: &Map<String, Value>) -> Result<f64> {
    let (field, raw) = match (object.get("dropout_rate"), object.get("dropout")) {
        (Some(_), Some(alias)) => {
            return Err(SwemError::config(
                "dropout",
                alias,
                "dropout rate already given under `dropout_rate`",
            ));
        }
        (Some(value), None) => ("dropout_rate", value),
        (None, Some(value)) => ("dropout", value),
        (None, None) => return Ok(DEFAULT_DROPOUT_RATE),
    };
    raw.as_f64()
        .ok_or_else(|| SwemError::config(field, raw, "expected a number"))
}
