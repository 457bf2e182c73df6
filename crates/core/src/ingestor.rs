use crate::chunking::normalize_text;
use crate::classifier::PageClassifier;
use crate::document::{EmbeddedImage, PdfDocument};
use crate::error::IngestError;
use crate::models::{ExtractedImage, IssueStage, Page, PageIssue, PageKind, PipelineOptions};
use crate::ocr::OcrEngine;
use crate::orientation::OrientationCorrector;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct PageIngestor<'a> {
    ocr: &'a dyn OcrEngine,
    classifier: PageClassifier,
    raster_dpi: u32,
    image_dir: Option<PathBuf>,
}

impl<'a> PageIngestor<'a> {
    pub fn new(ocr: &'a dyn OcrEngine, options: &PipelineOptions) -> Self {
        Self {
            ocr,
            classifier: PageClassifier::new(options.scan_text_threshold),
            raster_dpi: options.raster_dpi,
            image_dir: options.image_dir.clone(),
        }
    }

    pub fn classifier(&self) -> &PageClassifier {
        &self.classifier
    }

    pub fn ingest(&self, document: &dyn PdfDocument) -> Result<Vec<Page>, IngestError> {
        let kinds: Vec<PageKind> = (1..=document.page_count())
            .map(|page_no| self.classifier.classify(document, page_no))
            .collect();

        if kinds.contains(&PageKind::Scanned) {
            self.ensure_scan_resources(document)?;
        }

        Ok(kinds
            .into_iter()
            .zip(1..)
            .map(|(kind, page_no)| self.ingest_classified(document, page_no, kind))
            .collect())
    }

    pub fn ensure_scan_resources(&self, document: &dyn PdfDocument) -> Result<(), IngestError> {
        document.ensure_rasterizer()?;
        self.ocr.ensure_available()
    }

    pub fn ingest_page(&self, document: &dyn PdfDocument, page_no: u32) -> Page {
        let kind = self.classifier.classify(document, page_no);
        self.ingest_classified(document, page_no, kind)
    }

    /// Never fails: problems are recorded as page issues and the page keeps
    /// whatever text could be recovered, possibly none.
    pub fn ingest_classified(
        &self,
        document: &dyn PdfDocument,
        page_no: u32,
        kind: PageKind,
    ) -> Page {
        let mut issues = Vec::new();

        let (raw_text, image, images) = match kind {
            PageKind::Digital => {
                let text = self.digital_text(document, page_no, &mut issues);
                let images = self.extract_images(document, page_no, &mut issues);
                (text, None, images)
            }
            PageKind::Scanned => {
                let (text, image) = self.scanned_text(document, page_no, &mut issues);
                (text, image, Vec::new())
            }
        };

        for issue in &issues {
            warn!(
                document = document.document_id(),
                page = page_no,
                stage = ?issue.stage,
                details = %issue.details,
                "page degraded"
            );
        }

        Page {
            page_no,
            kind,
            raw_text,
            image,
            images,
            issues,
        }
    }

    fn digital_text(
        &self,
        document: &dyn PdfDocument,
        page_no: u32,
        issues: &mut Vec<PageIssue>,
    ) -> String {
        match document.page_text(page_no) {
            Ok(text) => normalize_text(&text),
            Err(error) => {
                issues.push(PageIssue {
                    stage: IssueStage::TextLayer,
                    details: error.to_string(),
                });
                String::new()
            }
        }
    }

    fn scanned_text(
        &self,
        document: &dyn PdfDocument,
        page_no: u32,
        issues: &mut Vec<PageIssue>,
    ) -> (String, Option<DynamicImage>) {
        let image = match document.rasterize(page_no, self.raster_dpi) {
            Ok(image) => image,
            Err(error) => {
                issues.push(PageIssue {
                    stage: IssueStage::Rasterize,
                    details: error.to_string(),
                });
                return (String::new(), None);
            }
        };

        let image = OrientationCorrector::new(self.ocr).correct(image);
        let text = match self.ocr.recognize(&image) {
            Ok(text) => normalize_text(&text),
            Err(error) => {
                issues.push(PageIssue {
                    stage: IssueStage::Ocr,
                    details: error.to_string(),
                });
                String::new()
            }
        };

        debug!(
            document = document.document_id(),
            page = page_no,
            chars = text.len(),
            "scanned page recognized"
        );
        (text, Some(image))
    }

    fn extract_images(
        &self,
        document: &dyn PdfDocument,
        page_no: u32,
        issues: &mut Vec<PageIssue>,
    ) -> Vec<ExtractedImage> {
        let Some(image_dir) = &self.image_dir else {
            return Vec::new();
        };

        let result = document.page_images(page_no).and_then(|embedded| {
            persist_images(image_dir, document.document_id(), page_no, &embedded)
        });

        match result {
            Ok(images) => images,
            Err(error) => {
                issues.push(PageIssue {
                    stage: IssueStage::Images,
                    details: error.to_string(),
                });
                Vec::new()
            }
        }
    }
}

pub fn image_file_name(document_id: &str, page_no: u32, index: u32, extension: &str) -> String {
    format!("{document_id}_page{page_no}_img{index}.{extension}")
}

pub fn persist_images(
    dir: &Path,
    document_id: &str,
    page_no: u32,
    embedded: &[EmbeddedImage],
) -> Result<Vec<ExtractedImage>, IngestError> {
    if embedded.is_empty() {
        return Ok(Vec::new());
    }

    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(embedded.len());

    for (index, image) in (1u32..).zip(embedded) {
        let path = dir.join(image_file_name(document_id, page_no, index, image.extension));
        fs::write(&path, &image.bytes)?;
        written.push(ExtractedImage {
            index,
            name: image.name.clone(),
            image_path: path.to_string_lossy().to_string(),
            bbox: image.bbox,
            width: image.width,
            height: image.height,
        });
    }

    Ok(written)
}
