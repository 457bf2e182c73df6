use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document {document}: {details}")]
    MalformedDocument { document: String, details: String },

    #[error("page {page} is out of range for {document} ({page_count} pages)")]
    PageOutOfRange {
        document: String,
        page: u32,
        page_count: u32,
    },

    #[error("pdf error in {document} page {page}: {details}")]
    Pdf {
        document: String,
        page: u32,
        details: String,
    },

    #[error("rasterization of {document} page {page} failed: {details}")]
    Rasterize {
        document: String,
        page: u32,
        details: String,
    },

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("required resource unavailable: {0}")]
    MissingResource(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("pipeline cannot move from {from} to {to}")]
    StageOrder { from: String, to: String },

    #[error("processing of {document} cancelled during {stage}")]
    Cancelled { document: String, stage: String },

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retrieval failed: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
