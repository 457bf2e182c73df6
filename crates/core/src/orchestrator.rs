use crate::chunker::ChunkCreator;
use crate::chunking::ChunkingConfig;
use crate::document::PdfDocument;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::ingestor::PageIngestor;
use crate::layout::LayoutParser;
use crate::metadata::MetadataEngine;
use crate::models::{
    Chunk, Element, ElementKind, ExtractedImage, IssueStage, Metadata, Page, PageIssue, PageKind, PipelineOptions,
};
use crate::ocr::OcrEngine;
use crate::traits::VectorStore;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    NotIngested,
    Classified,
    TextExtracted,
    LayoutParsed,
    Chunked,
    Embedded,
    Stored,
}

impl PipelineStage {
    pub fn next(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::NotIngested => Some(PipelineStage::Classified),
            PipelineStage::Classified => Some(PipelineStage::TextExtracted),
            PipelineStage::TextExtracted => Some(PipelineStage::LayoutParsed),
            PipelineStage::LayoutParsed => Some(PipelineStage::Chunked),
            PipelineStage::Chunked => Some(PipelineStage::Embedded),
            PipelineStage::Embedded => Some(PipelineStage::Stored),
            PipelineStage::Stored => None,
        }
    }

    pub fn advance(&mut self, to: PipelineStage) -> Result<(), IngestError> {
        if self.next() != Some(to) {
            return Err(IngestError::StageOrder {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        *self = to;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::NotIngested => "not_ingested",
            PipelineStage::Classified => "classified",
            PipelineStage::TextExtracted => "text_extracted",
            PipelineStage::LayoutParsed => "layout_parsed",
            PipelineStage::Chunked => "chunked",
            PipelineStage::Embedded => "embedded",
            PipelineStage::Stored => "stored",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct DocumentRun {
    pub document_id: String,
    pub stage: PipelineStage,
    pub kinds: Vec<PageKind>,
    pub pages: Vec<Page>,
    pub elements: Vec<Vec<Element>>,
    pub chunks: ChunkCreator,
    pub metadata: MetadataEngine,
    pub embeddings: Vec<Vec<f32>>,
}

impl DocumentRun {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            stage: PipelineStage::NotIngested,
            kinds: Vec::new(),
            pages: Vec::new(),
            elements: Vec::new(),
            chunks: ChunkCreator::new(),
            metadata: MetadataEngine::new(),
            embeddings: Vec::new(),
        }
    }

    pub fn degraded_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|page| page.is_degraded())
    }

    pub fn export(&self, output_dir: &Path) -> Result<PathBuf, IngestError> {
        let directory = output_dir.join(&self.document_id);
        fs::create_dir_all(&directory)?;

        fs::write(
            directory.join("pages.json"),
            serde_json::to_vec_pretty(&self.pages)?,
        )?;
        self.metadata.to_json(&directory.join("metadata.json"))?;
        self.chunks.to_json(&directory.join("unichunks.json"))?;

        info!(document = %self.document_id, directory = %directory.display(), "run exported");
        Ok(directory)
    }

    /// Adds the embedded chunks to `store` one page per batch, so a page is
    /// either fully stored or absent. Returns the number of entries written.
    pub async fn store(&mut self, store: &dyn VectorStore) -> Result<usize, IngestError> {
        if self.stage != PipelineStage::Embedded {
            return Err(IngestError::StageOrder {
                from: self.stage.to_string(),
                to: PipelineStage::Stored.to_string(),
            });
        }

        let chunks = self.chunks.get_chunks();
        let records = chunk_records(&self.document_id, &self.pages, chunks);
        let mut batches: Vec<(u32, Vec<(Vec<f32>, Metadata)>)> = Vec::new();
        for ((chunk, metadata), embedding) in chunks.iter().zip(records).zip(&self.embeddings) {
            let entry = (embedding.clone(), metadata);
            match batches.last_mut() {
                Some((page_no, batch)) if *page_no == chunk.page_no => batch.push(entry),
                _ => batches.push((chunk.page_no, vec![entry])),
            }
        }

        let mut written = 0;
        for (page_no, batch) in &batches {
            store.add_many(batch).await?;
            written += batch.len();
            debug!(document = %self.document_id, page = page_no, entries = batch.len(), "page stored");
        }
        store.persist().await?;

        self.stage.advance(PipelineStage::Stored)?;
        info!(document = %self.document_id, entries = written, "chunks stored");
        Ok(written)
    }
}

/// Vector-store metadata for each chunk, in chunk order. `chunk_idx` counts
/// chunks within their page.
pub fn chunk_records(document_id: &str, pages: &[Page], chunks: &[Chunk]) -> Vec<Metadata> {
    let mut records = Vec::with_capacity(chunks.len());
    let mut current_page = None;
    let mut chunk_idx = 0u32;

    for chunk in chunks {
        if current_page != Some(chunk.page_no) {
            current_page = Some(chunk.page_no);
            chunk_idx = 0;
        }

        let images = pages
            .iter()
            .find(|page| page.page_no == chunk.page_no)
            .map(|page| {
                page.images
                    .iter()
                    .map(|image| image.image_path.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();

        let record = json!({
            "chunk_id": chunk.id,
            "pdf_name": document_id,
            "page_no": chunk.page_no,
            "chunk_idx": chunk_idx,
            "type": chunk.chunk_type,
            "source": chunk.source.as_str(),
            "images": images,
            "content": chunk.content,
        });
        if let Value::Object(map) = record {
            records.push(map);
        }
        chunk_idx += 1;
    }

    records
}

pub struct Pipeline<'a> {
    ocr: &'a dyn OcrEngine,
    embedder: &'a dyn Embedder,
    options: PipelineOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(ocr: &'a dyn OcrEngine, embedder: &'a dyn Embedder, options: PipelineOptions) -> Self {
        Self {
            ocr,
            embedder,
            options,
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn process(&self, document: &dyn PdfDocument) -> Result<DocumentRun, IngestError> {
        let chunking = ChunkingConfig::from(&self.options);
        chunking.validate()?;

        let mut run = DocumentRun::new(document.document_id());
        self.classify(document, &mut run)?;
        self.extract_text(document, &mut run)?;
        self.parse_layout(document, &mut run)?;
        self.chunk(&mut run, chunking)?;
        self.embed(&mut run)?;
        Ok(run)
    }

    fn check_cancelled(&self, run: &DocumentRun, stage: PipelineStage) -> Result<(), IngestError> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            warn!(document = %run.document_id, %stage, "run cancelled");
            return Err(IngestError::Cancelled {
                document: run.document_id.clone(),
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    fn classify(&self, document: &dyn PdfDocument, run: &mut DocumentRun) -> Result<(), IngestError> {
        let ingestor = PageIngestor::new(self.ocr, &self.options);
        for page_no in 1..=document.page_count() {
            self.check_cancelled(run, PipelineStage::Classified)?;
            run.kinds.push(ingestor.classifier().classify(document, page_no));
        }

        let scanned = run.kinds.iter().filter(|kind| **kind == PageKind::Scanned).count();
        if scanned > 0 {
            ingestor.ensure_scan_resources(document)?;
        }

        run.stage.advance(PipelineStage::Classified)?;
        info!(
            document = %run.document_id,
            pages = run.kinds.len(),
            scanned,
            "pages classified"
        );
        Ok(())
    }

    fn extract_text(
        &self,
        document: &dyn PdfDocument,
        run: &mut DocumentRun,
    ) -> Result<(), IngestError> {
        let ingestor = PageIngestor::new(self.ocr, &self.options);
        for (page_no, kind) in (1..).zip(run.kinds.clone()) {
            self.check_cancelled(run, PipelineStage::TextExtracted)?;
            run.pages.push(ingestor.ingest_classified(document, page_no, kind));
        }

        run.stage.advance(PipelineStage::TextExtracted)?;
        info!(
            document = %run.document_id,
            degraded = run.degraded_pages().count(),
            "text extracted"
        );
        Ok(())
    }

    fn parse_layout(
        &self,
        document: &dyn PdfDocument,
        run: &mut DocumentRun,
    ) -> Result<(), IngestError> {
        let parser = LayoutParser::from(&self.options);

        for index in 0..run.pages.len() {
            self.check_cancelled(run, PipelineStage::LayoutParsed)?;

            let page = &run.pages[index];
            let elements = match parser.parse(document, page) {
                Ok(elements) => elements,
                Err(error) => {
                    warn!(
                        document = %run.document_id,
                        page = page.page_no,
                        %error,
                        "layout parsing failed"
                    );
                    let issue = PageIssue {
                        stage: IssueStage::Layout,
                        details: error.to_string(),
                    };
                    run.pages[index].issues.push(issue);
                    Vec::new()
                }
            };

            let page = &run.pages[index];
            let mut staged = MetadataEngine::new();
            for element in &elements {
                let mut extra = element_extra(element);
                if let Element::Image { name, .. } = element {
                    if let (Some(image), Some(extra)) = (page.image_named(name), extra.as_mut()) {
                        add_image_file(extra, image);
                    }
                }
                staged.add_element(page.page_no, element.kind(), element.bbox(), page.kind, extra);
            }
            let drawn: Vec<&str> = elements.iter().filter_map(Element::image_name).collect();
            for image in page.images.iter().filter(|image| !drawn.contains(&image.name.as_str())) {
                let mut extra = Metadata::new();
                extra.insert("name".to_string(), json!(image.name));
                add_image_file(&mut extra, image);
                staged.add_element(page.page_no, ElementKind::Image, image.bbox, page.kind, Some(extra));
            }

            debug!(document = %run.document_id, page = page.page_no, elements = elements.len(), "page parsed");
            run.metadata.append(staged);
            run.elements.push(elements);
        }

        run.stage.advance(PipelineStage::LayoutParsed)
    }

    fn chunk(&self, run: &mut DocumentRun, chunking: ChunkingConfig) -> Result<(), IngestError> {
        for index in 0..run.pages.len() {
            self.check_cancelled(run, PipelineStage::Chunked)?;

            let page = &run.pages[index];
            let elements = &run.elements[index];
            let context: Vec<Element> = elements
                .iter()
                .filter(|element| matches!(element.kind(), ElementKind::Image | ElementKind::Block))
                .cloned()
                .collect();

            let mut staged = ChunkCreator::new();
            for window in chunking.split(&page.raw_text) {
                staged.create_chunk(window, "text", context.clone(), page.page_no, page.kind);
            }
            for table in elements.iter().filter(|e| e.kind() == ElementKind::Table) {
                if let Some(content) = table.table_text() {
                    staged.create_chunk(content, "table", vec![table.clone()], page.page_no, page.kind);
                }
            }

            run.chunks.append(staged);
        }

        run.stage.advance(PipelineStage::Chunked)?;
        info!(document = %run.document_id, chunks = run.chunks.len(), "chunks created");
        Ok(())
    }

    fn embed(&self, run: &mut DocumentRun) -> Result<(), IngestError> {
        self.check_cancelled(run, PipelineStage::Embedded)?;

        let contents: Vec<&str> = run
            .chunks
            .get_chunks()
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect();
        run.embeddings = self.embedder.embed_all(&contents);

        run.stage.advance(PipelineStage::Embedded)
    }
}

fn add_image_file(extra: &mut Metadata, image: &ExtractedImage) {
    extra.insert("image_path".to_string(), json!(image.image_path));
    extra.insert("index".to_string(), json!(image.index));
}

fn element_extra(element: &Element) -> Option<Metadata> {
    let mut extra = Metadata::new();
    match element {
        Element::Text { text, .. } => {
            extra.insert("text".to_string(), json!(text));
        }
        Element::Table { rows, .. } => {
            extra.insert("rows".to_string(), json!(rows));
        }
        Element::Image { name, .. } => {
            extra.insert("name".to_string(), json!(name));
        }
        Element::Block { .. } => return None,
    }
    Some(extra)
}
