pub mod chroma;
pub mod flat;

pub use chroma::ChromaStore;
pub use flat::FlatIndexStore;

use crate::error::StoreError;
use crate::traits::VectorStore;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Flat {
        dimension: usize,
        directory: Option<PathBuf>,
    },
    Chroma {
        endpoint: String,
        dimension: Option<usize>,
    },
}

pub async fn open_store(
    config: &StoreConfig,
    collection: &str,
) -> Result<Box<dyn VectorStore>, StoreError> {
    match config {
        StoreConfig::Flat {
            dimension,
            directory: Some(directory),
        } => Ok(Box::new(
            FlatIndexStore::open(&directory.join(collection), *dimension).await?,
        )),
        StoreConfig::Flat {
            dimension,
            directory: None,
        } => Ok(Box::new(FlatIndexStore::new(*dimension))),
        StoreConfig::Chroma {
            endpoint,
            dimension,
        } => Ok(Box::new(ChromaStore::new(endpoint, collection, *dimension)?)),
    }
}

pub async fn list_collections(config: &StoreConfig) -> Result<Vec<String>, StoreError> {
    match config {
        StoreConfig::Flat {
            directory: Some(directory),
            ..
        } => {
            if !directory.exists() {
                return Ok(Vec::new());
            }
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(directory).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
            }
            names.sort_unstable();
            Ok(names)
        }
        StoreConfig::Flat { directory: None, .. } => Ok(Vec::new()),
        StoreConfig::Chroma { endpoint, .. } => {
            ChromaStore::new(endpoint, "", None)?
                .list_collections()
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn flat_collections_live_in_subdirectories() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = StoreConfig::Flat {
            dimension: 2,
            directory: Some(dir.path().to_path_buf()),
        };

        for name in ["pump_manual", "audit_2023"] {
            let store = open_store(&config, name).await?;
            let mut metadata = crate::models::Metadata::new();
            metadata.insert("pdf_name".to_string(), json!(name));
            store.add(&[1.0, 0.0], metadata).await?;
            store.persist().await?;
        }

        assert_eq!(
            list_collections(&config).await?,
            vec!["audit_2023".to_string(), "pump_manual".to_string()]
        );

        let reopened = open_store(&config, "pump_manual").await?;
        let hits = reopened.query(&[1.0, 0.0], 1).await?;
        assert_eq!(hits[0]["pdf_name"], json!("pump_manual"));
        Ok(())
    }

    #[tokio::test]
    async fn in_memory_store_reports_its_dimension() -> Result<(), StoreError> {
        let config = StoreConfig::Flat {
            dimension: 16,
            directory: None,
        };
        let store = open_store(&config, "scratch").await?;
        assert_eq!(store.dimension(), Some(16));
        assert!(list_collections(&config).await?.is_empty());
        Ok(())
    }
}
