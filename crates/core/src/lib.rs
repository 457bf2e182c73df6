pub mod chat;
pub mod chunker;
pub mod chunking;
pub mod classifier;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod ingestor;
pub mod layout;
pub mod metadata;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod orientation;
pub mod stores;
mod subprocess;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{ask, Answerer, ChatReply, ChatSession, ChatTurn, GeminiAnswerer, Reference, Role};
pub use chunker::ChunkCreator;
pub use chunking::{chunk_text, normalize_text, ChunkingConfig};
pub use classifier::PageClassifier;
pub use document::{ContentView, EmbeddedImage, LopdfDocument, PdfDocument};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{AnswerError, IngestError, StoreError};
pub use ingest::{
    discover_pdf_files, ingest_path_best_effort, IngestedPdf, IngestionReport, SkippedPdf,
};
pub use ingestor::PageIngestor;
pub use layout::LayoutParser;
pub use metadata::{MetadataEngine, MetadataRecord};
pub use models::{
    BoundingBox, Chunk, DocumentFingerprint, Element, ElementKind, ExtractedImage, IssueStage,
    Metadata, Page, PageIssue, PageKind, PipelineOptions,
};
pub use ocr::{HttpOcrEngine, OcrEndpointConfig, OcrEngine, TesseractCli};
pub use orchestrator::{chunk_records, DocumentRun, Pipeline, PipelineStage};
pub use orientation::OrientationCorrector;
pub use stores::{list_collections, open_store, ChromaStore, FlatIndexStore, StoreConfig};
pub use traits::VectorStore;
