use crate::document::PdfDocument;
use crate::models::PageKind;
use tracing::{debug, warn};

/// Pages with fewer stripped characters than this are treated as scanned.
pub const SCANNED_TEXT_THRESHOLD: usize = 20;

/// Decides whether a page carries a usable text layer.
///
/// A digital page whose only text is a short caption (fewer characters than
/// the threshold) is reported as scanned; that false positive is part of the
/// threshold contract.
#[derive(Debug, Clone, Copy)]
pub struct PageClassifier {
    pub threshold: usize,
}

impl Default for PageClassifier {
    fn default() -> Self {
        Self {
            threshold: SCANNED_TEXT_THRESHOLD,
        }
    }
}

impl PageClassifier {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn classify_text(&self, text: &str) -> PageKind {
        if text.trim().chars().count() < self.threshold {
            PageKind::Scanned
        } else {
            PageKind::Digital
        }
    }

    pub fn classify(&self, document: &dyn PdfDocument, page_no: u32) -> PageKind {
        let text = match document.page_text(page_no) {
            Ok(text) => text,
            Err(error) => {
                warn!(
                    document = document.document_id(),
                    page = page_no,
                    %error,
                    "text layer unreadable, treating page as scanned"
                );
                String::new()
            }
        };

        let kind = self.classify_text(&text);
        debug!(document = document.document_id(), page = page_no, kind = %kind, "page classified");
        kind
    }
}
