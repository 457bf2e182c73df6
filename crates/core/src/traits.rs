use crate::error::StoreError;
use crate::models::Metadata;
use async_trait::async_trait;

/// Nearest-neighbour index over `(embedding, metadata)` pairs. Backends answer
/// with metadata only, nearest first.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dimension(&self) -> Option<usize>;

    /// Adds every entry or none of them.
    async fn add_many(&self, entries: &[(Vec<f32>, Metadata)]) -> Result<(), StoreError>;

    async fn add(&self, embedding: &[f32], metadata: Metadata) -> Result<(), StoreError> {
        self.add_many(&[(embedding.to_vec(), metadata)]).await
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Metadata>, StoreError>;

    async fn persist(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
