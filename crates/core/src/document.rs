use crate::error::IngestError;
use crate::layout::digital::image_placements;
use crate::models::{BoundingBox, DocumentFingerprint};
use crate::subprocess::output_within;
use chrono::Utc;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

const FALLBACK_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

#[derive(Debug, Clone, Default)]
pub struct ContentView {
    pub media_box: [f32; 4],
    pub operations: Vec<Operation>,
    pub image_names: HashSet<String>,
}

impl ContentView {
    pub fn height(&self) -> f32 {
        (self.media_box[3] - self.media_box[1]).abs()
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub name: String,
    pub extension: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bbox: Option<BoundingBox>,
}

/// What the pipeline needs from a loaded PDF. Pages are 1-indexed.
pub trait PdfDocument {
    fn document_id(&self) -> &str;

    fn page_count(&self) -> u32;

    fn page_text(&self, page_no: u32) -> Result<String, IngestError>;

    fn page_images(&self, page_no: u32) -> Result<Vec<EmbeddedImage>, IngestError>;

    fn rasterize(&self, page_no: u32, dpi: u32) -> Result<DynamicImage, IngestError>;

    fn content_view(&self, page_no: u32) -> Result<ContentView, IngestError>;

    fn ensure_rasterizer(&self) -> Result<(), IngestError> {
        Ok(())
    }
}

pub fn sanitize_document_id(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut id = replaced
        .trim_matches(|c| matches!(c, '_' | '-' | '.'))
        .to_string();
    if id.len() < 3 {
        id = format!("{id}_db").chars().take(3).collect();
        while id.len() < 3 {
            id.push('_');
        }
    }
    id.truncate(512);
    id
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct LopdfDocument {
    document: Document,
    document_id: String,
    path: PathBuf,
    pages: BTreeMap<u32, ObjectId>,
    fingerprint: DocumentFingerprint,
    pdftoppm: String,
    timeout: Option<Duration>,
}

impl LopdfDocument {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("path has no file name: {}", path.display()))
            })?;
        let document_id = sanitize_document_id(stem);

        let bytes = std::fs::read(path)?;
        let document =
            Document::load_mem(&bytes).map_err(|error| IngestError::MalformedDocument {
                document: document_id.clone(),
                details: error.to_string(),
            })?;

        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(IngestError::MalformedDocument {
                document: document_id,
                details: "document has no pages".to_string(),
            });
        }

        let fingerprint = DocumentFingerprint {
            document_id: document_id.clone(),
            document_title: path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(stem)
                .to_string(),
            source_path: path.to_string_lossy().to_string(),
            checksum: digest_bytes(&bytes),
            page_count: pages.len() as u32,
            ingested_at: Utc::now(),
        };

        debug!(document = %document_id, pages = pages.len(), "pdf loaded");

        Ok(Self {
            document,
            document_id,
            path: path.to_path_buf(),
            pages,
            fingerprint,
            pdftoppm: "pdftoppm".to_string(),
            timeout: None,
        })
    }

    pub fn with_pdftoppm(mut self, binary: impl Into<String>) -> Self {
        self.pdftoppm = binary.into();
        self
    }

    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    pub fn fingerprint(&self) -> &DocumentFingerprint {
        &self.fingerprint
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn page_id(&self, page_no: u32) -> Result<ObjectId, IngestError> {
        self.pages
            .get(&page_no)
            .copied()
            .ok_or_else(|| IngestError::PageOutOfRange {
                document: self.document_id.clone(),
                page: page_no,
                page_count: self.page_count(),
            })
    }

    fn pdf_error(&self, page_no: u32, error: impl ToString) -> IngestError {
        IngestError::Pdf {
            document: self.document_id.clone(),
            page: page_no,
            details: error.to_string(),
        }
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> Option<&'a Object> {
        match object {
            Object::Reference(id) => self.document.get_object(*id).ok(),
            other => Some(other),
        }
    }

    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = Some(page_id);
        let mut visited = HashSet::new();

        while let Some(id) = current {
            if !visited.insert(id) {
                break;
            }
            let dict = match self.document.get_object(id).ok()? {
                Object::Dictionary(dict) => dict,
                _ => return None,
            };
            if let Ok(value) = dict.get(key) {
                return self.resolve(value);
            }
            current = match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => Some(*parent),
                _ => None,
            };
        }

        None
    }

    fn media_box(&self, page_id: ObjectId) -> [f32; 4] {
        let values = match self.inherited(page_id, b"MediaBox") {
            Some(Object::Array(values)) => values,
            _ => return FALLBACK_MEDIA_BOX,
        };
        let numbers: Vec<f32> = values
            .iter()
            .filter_map(|value| self.resolve(value).and_then(number))
            .collect();
        match numbers.as_slice() {
            [x0, y0, x1, y1] => [*x0, *y0, *x1, *y1],
            _ => FALLBACK_MEDIA_BOX,
        }
    }

    fn xobjects(&self, page_id: ObjectId) -> Option<&Dictionary> {
        let resources = match self.inherited(page_id, b"Resources")? {
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        match self.resolve(resources.get(b"XObject").ok()?)? {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    fn image_streams(&self, page_id: ObjectId) -> Vec<(String, &lopdf::Stream)> {
        let Some(xobjects) = self.xobjects(page_id) else {
            return Vec::new();
        };

        xobjects
            .iter()
            .filter_map(|(name, value)| match self.resolve(value)? {
                Object::Stream(stream) if is_image_stream(&stream.dict) => {
                    Some((String::from_utf8_lossy(name).to_string(), stream))
                }
                _ => None,
            })
            .collect()
    }

    fn encode_image(&self, stream: &lopdf::Stream) -> Option<(&'static str, Vec<u8>, u32, u32)> {
        let width = dict_u32(&stream.dict, b"Width")?;
        let height = dict_u32(&stream.dict, b"Height")?;
        let filters = stream_filters(&stream.dict);

        if filters.iter().any(|filter| filter == "DCTDecode") {
            return Some(("jpg", stream.content.clone(), width, height));
        }
        if filters.iter().any(|filter| filter == "JPXDecode") {
            return Some(("jp2", stream.content.clone(), width, height));
        }

        let bits = dict_u32(&stream.dict, b"BitsPerComponent").unwrap_or(8);
        let color_space = match stream.dict.get(b"ColorSpace") {
            Ok(Object::Name(name)) => String::from_utf8_lossy(name).to_string(),
            _ => return None,
        };
        if bits != 8 {
            return None;
        }

        let raw = if filters.is_empty() {
            stream.content.clone()
        } else {
            stream.decompressed_content().ok()?
        };

        let image = match color_space.as_str() {
            "DeviceRGB" => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, raw)?),
            "DeviceGray" => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, raw)?),
            _ => return None,
        };

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .ok()?;
        Some(("png", png, width, height))
    }
}

impl PdfDocument for LopdfDocument {
    fn ensure_rasterizer(&self) -> Result<(), IngestError> {
        output_within(Command::new(&self.pdftoppm).arg("-v"), self.timeout)
            .map(|_| ())
            .map_err(|_| {
                IngestError::MissingResource(format!(
                    "{} not found; install poppler-utils to rasterize scanned pages",
                    self.pdftoppm
                ))
            })
    }

    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page_no: u32) -> Result<String, IngestError> {
        self.page_id(page_no)?;
        self.document
            .extract_text(&[page_no])
            .map_err(|error| self.pdf_error(page_no, error))
    }

    fn page_images(&self, page_no: u32) -> Result<Vec<EmbeddedImage>, IngestError> {
        let page_id = self.page_id(page_no)?;
        let placements = match self.content_view(page_no) {
            Ok(view) => image_placements(&view),
            Err(_) => Default::default(),
        };

        let mut images = Vec::new();
        for (name, stream) in self.image_streams(page_id) {
            match self.encode_image(stream) {
                Some((extension, bytes, width, height)) => images.push(EmbeddedImage {
                    bbox: placements.get(&name).copied(),
                    name,
                    extension,
                    bytes,
                    width,
                    height,
                }),
                None => debug!(
                    document = %self.document_id,
                    page = page_no,
                    image = %name,
                    "skipping image with unsupported encoding"
                ),
            }
        }

        Ok(images)
    }

    fn rasterize(&self, page_no: u32, dpi: u32) -> Result<DynamicImage, IngestError> {
        self.page_id(page_no)?;
        let rasterize_error = |details: String| IngestError::Rasterize {
            document: self.document_id.clone(),
            page: page_no,
            details,
        };

        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("page");
        let page = page_no.to_string();
        let mut command = Command::new(&self.pdftoppm);
        command
            .args(["-r", &dpi.to_string(), "-f", &page, "-l", &page, "-png", "-singlefile"])
            .arg(&self.path)
            .arg(&prefix);
        let output = output_within(&mut command, self.timeout)
            .map_err(|error| rasterize_error(format!("{}: {error}", self.pdftoppm)))?;

        if !output.status.success() {
            return Err(rasterize_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        image::open(prefix.with_extension("png"))
            .map_err(|error| rasterize_error(error.to_string()))
    }

    fn content_view(&self, page_no: u32) -> Result<ContentView, IngestError> {
        let page_id = self.page_id(page_no)?;
        let bytes = self
            .document
            .get_page_content(page_id)
            .map_err(|error| self.pdf_error(page_no, error))?;
        let content = Content::decode(&bytes).map_err(|error| self.pdf_error(page_no, error))?;

        Ok(ContentView {
            media_box: self.media_box(page_id),
            operations: content.operations,
            image_names: self
                .image_streams(page_id)
                .into_iter()
                .map(|(name, _)| name)
                .collect(),
        })
    }
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key) {
        Ok(Object::Integer(value)) => u32::try_from(*value).ok(),
        _ => None,
    }
}

fn is_image_stream(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name.as_slice() == b"Image")
}

fn stream_filters(dict: &Dictionary) -> Vec<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).to_string()],
        Ok(Object::Array(values)) => values
            .iter()
            .filter_map(|value| match value {
                Object::Name(name) => Some(String::from_utf8_lossy(name).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
