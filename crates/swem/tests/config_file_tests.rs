use std::fs;

use anyhow::Result;
use swem::{EmbeddingConfig, PoolingConfig, Swem, SwemConfig, SwemError};
use tempfile::tempdir;

const TOML_CONFIG: &str = r#"
pre_pooling_dims = [5, 5]
post_pooling_dims = [6, 6]
dropout_rate = 0.1

[embedding]
kind = "Plain"
vocab_size = 10
embedding_dim = 2

[pooling]
kind = "Max"
"#;

#[test]
fn loads_toml_files() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("swem.toml");
    fs::write(&path, TOML_CONFIG)?;

    let config = SwemConfig::from_path(&path)?;
    assert_eq!(config.embedding(), &EmbeddingConfig::plain(10, 2));
    assert_eq!(config.pooling(), &PoolingConfig::Max);
    assert_eq!(config.output_dim(), 6);
    assert_eq!(Swem::from_config(&config)?.config(), config);
    Ok(())
}

#[test]
fn loads_json_files_with_aliases() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("swem.json");
    fs::write(
        &path,
        r#"{
            "embedding": { "type": "Embedding", "num_embeddings": 30, "embedding_dim": 8, "p": null },
            "pooling": { "type": "HierarchicalPooling", "window_size": 4 },
            "post_pooling_dims": [2]
        }"#,
    )?;

    let config = SwemConfig::from_path(&path)?;
    assert_eq!(config.pooling(), &PoolingConfig::Hierarchical { window_size: 4 });
    assert_eq!(config.output_dim(), 2);
    Ok(())
}

#[test]
fn canonical_mapping_written_as_json_reloads_equal() -> Result<()> {
    let config = SwemConfig::new(
        EmbeddingConfig::regularized(16, 4, 0.1).with_max_norm(3.0, 2.0),
        PoolingConfig::Mean,
        Some(vec![8]),
        None,
        0.25,
    )?;
    let dir = tempdir()?;
    let path = dir.path().join("canonical.json");
    fs::write(&path, serde_json::to_string_pretty(&config.to_mapping()?)?)?;

    assert_eq!(SwemConfig::from_path(&path)?, config);
    Ok(())
}

#[test]
fn file_errors_are_typed() -> Result<()> {
    let dir = tempdir()?;

    let missing = SwemConfig::from_path(dir.path().join("absent.toml"));
    assert!(matches!(missing, Err(SwemError::Io(_))));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json")?;
    assert!(matches!(SwemConfig::from_path(&broken), Err(SwemError::Json(_))));

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "embedding = [")?;
    assert!(matches!(SwemConfig::from_path(&broken), Err(SwemError::Toml(_))));

    let yaml = dir.path().join("swem.yaml");
    fs::write(&yaml, "pooling: Max")?;
    let err = SwemConfig::from_path(&yaml).unwrap_err();
    assert_eq!(err.field(), Some("path"));
    Ok(())
}
