use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Digital,
    Scanned,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Digital => "digital",
            PageKind::Scanned => "scanned",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page-relative rectangle `(x0, y0, x1, y1)` with a top-left origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(value: [f32; 4]) -> Self {
        BoundingBox::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.x0, value.y0, value.x1, value.y1]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Table,
    Image,
    Block,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::Table => "table",
            ElementKind::Image => "image",
            ElementKind::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Text {
        bbox: Option<BoundingBox>,
        text: String,
    },
    Table {
        bbox: Option<BoundingBox>,
        rows: Vec<Vec<String>>,
    },
    Image {
        bbox: Option<BoundingBox>,
        name: String,
    },
    Block {
        bbox: Option<BoundingBox>,
    },
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Text { .. } => ElementKind::Text,
            Element::Table { .. } => ElementKind::Table,
            Element::Image { .. } => ElementKind::Image,
            Element::Block { .. } => ElementKind::Block,
        }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            Element::Text { bbox, .. }
            | Element::Table { bbox, .. }
            | Element::Image { bbox, .. }
            | Element::Block { bbox } => *bbox,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Element::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn image_name(&self) -> Option<&str> {
        match self {
            Element::Image { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn table_text(&self) -> Option<String> {
        match self {
            Element::Table { rows, .. } => Some(
                rows.iter()
                    .map(|row| row.join("\t"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedImage {
    pub index: u32,
    pub name: String,
    pub image_path: String,
    pub bbox: Option<BoundingBox>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueStage {
    TextLayer,
    Rasterize,
    Orientation,
    Ocr,
    Images,
    Layout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageIssue {
    pub stage: IssueStage,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub page_no: u32,
    pub kind: PageKind,
    #[serde(rename = "text")]
    pub raw_text: String,
    #[serde(skip)]
    pub image: Option<DynamicImage>,
    pub images: Vec<ExtractedImage>,
    pub issues: Vec<PageIssue>,
}

impl Page {
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn image_named(&self, name: &str) -> Option<&ExtractedImage> {
        self.images.iter().find(|image| image.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub elements: Vec<Element>,
    pub page_no: u32,
    pub source: PageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub document_title: String,
    pub source_path: String,
    pub checksum: String,
    pub page_count: u32,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub scan_text_threshold: usize,
    pub raster_dpi: u32,
    pub binarize_threshold: u8,
    pub min_block_area: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub image_dir: Option<PathBuf>,
    pub external_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            scan_text_threshold: 20,
            raster_dpi: 300,
            binarize_threshold: 180,
            min_block_area: 1_000,
            chunk_size: 1_000,
            chunk_overlap: 100,
            image_dir: None,
            external_timeout: None,
        }
    }
}
