pub mod digital;
pub mod scanned;

use crate::document::PdfDocument;
use crate::error::IngestError;
use crate::models::{Element, Page, PageKind, PipelineOptions};
use image::DynamicImage;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct LayoutParser {
    pub binarize_threshold: u8,
    pub min_block_area: u32,
}

impl Default for LayoutParser {
    fn default() -> Self {
        Self::from(&PipelineOptions::default())
    }
}

impl From<&PipelineOptions> for LayoutParser {
    fn from(options: &PipelineOptions) -> Self {
        Self {
            binarize_threshold: options.binarize_threshold,
            min_block_area: options.min_block_area,
        }
    }
}

impl LayoutParser {
    pub fn parse_digital(
        &self,
        document: &dyn PdfDocument,
        page_no: u32,
    ) -> Result<Vec<Element>, IngestError> {
        let view = document.content_view(page_no)?;
        let elements = digital::parse_content(&view);
        debug!(
            document = document.document_id(),
            page = page_no,
            elements = elements.len(),
            "digital layout parsed"
        );
        Ok(elements)
    }

    pub fn parse_scanned(&self, image: &DynamicImage) -> Vec<Element> {
        scanned::detect_blocks(image, self.binarize_threshold, self.min_block_area)
    }

    pub fn parse(
        &self,
        document: &dyn PdfDocument,
        page: &Page,
    ) -> Result<Vec<Element>, IngestError> {
        match page.kind {
            PageKind::Digital => self.parse_digital(document, page.page_no),
            PageKind::Scanned => Ok(page
                .image
                .as_ref()
                .map(|image| self.parse_scanned(image))
                .unwrap_or_default()),
        }
    }
}
