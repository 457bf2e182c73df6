use crate::error::StoreError;
use crate::models::Metadata;
use crate::traits::VectorStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

const SNAPSHOT_FILE: &str = "flat_index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<Metadata>,
}

/// Exact nearest-neighbour search by brute force over squared Euclidean
/// distance. `vectors[i]` and `metadata[i]` always describe the same entry.
pub struct FlatIndexStore {
    dimension: usize,
    directory: Option<PathBuf>,
    index: RwLock<FlatIndex>,
}

impl FlatIndexStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            directory: None,
            index: RwLock::new(FlatIndex {
                dimension,
                ..FlatIndex::default()
            }),
        }
    }

    pub async fn open(directory: &Path, dimension: usize) -> Result<Self, StoreError> {
        let mut store = if snapshot_path(directory).exists() {
            Self::load(directory).await?
        } else {
            Self::new(dimension)
        };

        if store.dimension != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: store.dimension,
                actual: dimension,
            });
        }

        store.directory = Some(directory.to_path_buf());
        Ok(store)
    }

    pub async fn load(directory: &Path) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(snapshot_path(directory)).await?;
        let index: FlatIndex = serde_json::from_slice(&bytes)?;

        if index.vectors.len() != index.metadata.len() {
            return Err(StoreError::BackendResponse {
                backend: "flat".to_string(),
                details: format!(
                    "snapshot has {} vectors but {} metadata records",
                    index.vectors.len(),
                    index.metadata.len()
                ),
            });
        }
        if let Some(bad) = index.vectors.iter().find(|v| v.len() != index.dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: index.dimension,
                actual: bad.len(),
            });
        }

        Ok(Self {
            dimension: index.dimension,
            directory: None,
            index: RwLock::new(index),
        })
    }

    pub async fn save(&self, directory: &Path) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(directory).await?;
        let bytes = {
            let index = self.index.read().await;
            serde_json::to_vec(&*index)?
        };
        tokio::fs::write(snapshot_path(directory), bytes).await?;
        debug!(directory = %directory.display(), "flat index saved");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.vectors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

fn snapshot_path(directory: &Path) -> PathBuf {
    directory.join(SNAPSHOT_FILE)
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[async_trait]
impl VectorStore for FlatIndexStore {
    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn add_many(&self, entries: &[(Vec<f32>, Metadata)]) -> Result<(), StoreError> {
        for (embedding, _) in entries {
            self.check_dimension(embedding)?;
        }

        let mut index = self.index.write().await;
        for (embedding, metadata) in entries {
            index.vectors.push(embedding.clone());
            index.metadata.push(metadata.clone());
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Metadata>, StoreError> {
        self.check_dimension(embedding)?;

        let index = self.index.read().await;
        let mut ranked: Vec<(f32, usize)> = index
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (squared_distance(embedding, vector), position))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(_, position)| index.metadata[position].clone())
            .collect())
    }

    async fn persist(&self) -> Result<(), StoreError> {
        match &self.directory {
            Some(directory) => self.save(directory).await,
            None => Ok(()),
        }
    }
}
