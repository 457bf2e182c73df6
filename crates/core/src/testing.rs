//! Fakes for the external collaborators, shared by unit tests.

use crate::document::{ContentView, EmbeddedImage, PdfDocument};
use crate::error::IngestError;
use crate::ocr::OcrEngine;
use image::{DynamicImage, Rgb, RgbImage};
use std::cell::Cell;

#[derive(Clone, Default)]
pub struct FakePage {
    pub text: String,
    pub raster: Option<DynamicImage>,
    pub images: Vec<EmbeddedImage>,
    pub view: ContentView,
}

impl FakePage {
    pub fn digital(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn scanned(raster: DynamicImage) -> Self {
        Self {
            raster: Some(raster),
            ..Self::default()
        }
    }
}

pub struct FakeDocument {
    pub id: String,
    pub pages: Vec<FakePage>,
}

impl FakeDocument {
    pub fn new(id: &str, pages: Vec<FakePage>) -> Self {
        Self {
            id: id.to_string(),
            pages,
        }
    }

    fn page(&self, page_no: u32) -> Result<&FakePage, IngestError> {
        page_no
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .ok_or_else(|| IngestError::PageOutOfRange {
                document: self.id.clone(),
                page: page_no,
                page_count: self.page_count(),
            })
    }
}

impl PdfDocument for FakeDocument {
    fn document_id(&self) -> &str {
        &self.id
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page_no: u32) -> Result<String, IngestError> {
        Ok(self.page(page_no)?.text.clone())
    }

    fn page_images(&self, page_no: u32) -> Result<Vec<EmbeddedImage>, IngestError> {
        Ok(self.page(page_no)?.images.clone())
    }

    fn rasterize(&self, page_no: u32, _dpi: u32) -> Result<DynamicImage, IngestError> {
        self.page(page_no)?
            .raster
            .clone()
            .ok_or_else(|| IngestError::Rasterize {
                document: self.id.clone(),
                page: page_no,
                details: "no raster available".to_string(),
            })
    }

    fn content_view(&self, page_no: u32) -> Result<ContentView, IngestError> {
        Ok(self.page(page_no)?.view.clone())
    }
}

pub struct FakeOcr {
    pub available: bool,
    pub rotation: Option<u32>,
    pub text: Option<String>,
    pub recognize_calls: Cell<usize>,
}

impl FakeOcr {
    pub fn reading(text: &str) -> Self {
        Self {
            available: true,
            rotation: Some(0),
            text: Some(text.to_string()),
            recognize_calls: Cell::new(0),
        }
    }
}

impl OcrEngine for FakeOcr {
    fn ensure_available(&self) -> Result<(), IngestError> {
        if self.available {
            Ok(())
        } else {
            Err(IngestError::MissingResource("fake OCR disabled".to_string()))
        }
    }

    fn detect_rotation(&self, _image: &DynamicImage) -> Result<u32, IngestError> {
        self.rotation
            .ok_or_else(|| IngestError::OcrFailed("orientation detector crashed".to_string()))
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<String, IngestError> {
        self.recognize_calls.set(self.recognize_calls.get() + 1);
        self.text
            .clone()
            .ok_or_else(|| IngestError::OcrFailed("recognition failed".to_string()))
    }
}

pub fn scanned_raster() -> DynamicImage {
    let mut page = RgbImage::from_pixel(120, 90, Rgb([245, 245, 245]));
    for x in 10..60 {
        for y in 10..50 {
            page.put_pixel(x, y, Rgb([15, 15, 15]));
        }
    }
    DynamicImage::ImageRgb8(page)
}

pub fn table_view() -> ContentView {
    use lopdf::content::Operation;
    use lopdf::Object;

    let op = |operator: &str, operands: Vec<Object>| Operation::new(operator, operands);
    let text = Object::string_literal;

    ContentView {
        media_box: [0.0, 0.0, 612.0, 792.0],
        operations: vec![
            op("BT", vec![]),
            op("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
            op("Td", vec![Object::Integer(50), Object::Integer(720)]),
            op("Tj", vec![text("Intro paragraph")]),
            op("Td", vec![Object::Integer(0), Object::Integer(-20)]),
            op("Tj", vec![text("Part")]),
            op("Td", vec![Object::Integer(150), Object::Integer(0)]),
            op("Tj", vec![text("Max psi")]),
            op("Td", vec![Object::Integer(-150), Object::Integer(-14)]),
            op("Tj", vec![text("Pump")]),
            op("Td", vec![Object::Integer(150), Object::Integer(0)]),
            op("Tj", vec![text("40")]),
            op("ET", vec![]),
        ],
        image_names: Default::default(),
    }
}
