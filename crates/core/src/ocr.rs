use crate::error::IngestError;
use crate::subprocess::output_within;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

pub trait OcrEngine {
    fn ensure_available(&self) -> Result<(), IngestError>;

    fn detect_rotation(&self, image: &DynamicImage) -> Result<u32, IngestError>;

    fn recognize(&self, image: &DynamicImage) -> Result<String, IngestError>;
}

#[derive(Debug, Clone)]
pub struct TesseractCli {
    pub binary: String,
    pub language: String,
    pub timeout: Option<Duration>,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
            timeout: None,
        }
    }
}

impl TesseractCli {
    fn run(&self, image: &DynamicImage, extra_args: &[&str]) -> Result<String, IngestError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("page.png");
        image.save_with_format(&input, ImageFormat::Png)?;

        let mut command = Command::new(&self.binary);
        command.arg(path_arg(&input)?).arg("stdout").args(extra_args);
        let output = output_within(&mut command, self.timeout)
            .map_err(|error| IngestError::OcrFailed(format!("{}: {error}", self.binary)))?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl OcrEngine for TesseractCli {
    fn ensure_available(&self) -> Result<(), IngestError> {
        output_within(Command::new(&self.binary).arg("--version"), self.timeout)
            .map(|_| ())
            .map_err(|_| {
                IngestError::MissingResource(format!(
                    "{} not found; install tesseract-ocr to process scanned pages",
                    self.binary
                ))
            })
    }

    fn detect_rotation(&self, image: &DynamicImage) -> Result<u32, IngestError> {
        let osd = self.run(image, &["--psm", "0"])?;
        parse_osd_rotation(&osd)
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, IngestError> {
        let text = self.run(image, &["-l", &self.language])?;
        debug!(chars = text.len(), "tesseract recognized text");
        Ok(text)
    }
}

pub fn parse_osd_rotation(osd: &str) -> Result<u32, IngestError> {
    let pattern = Regex::new(r"(?m)^\s*Rotate:\s*(\d+)\s*$")?;
    let captured = pattern
        .captures(osd)
        .and_then(|capture| capture.get(1))
        .ok_or_else(|| IngestError::OcrFailed("OSD output has no Rotate line".to_string()))?;

    captured
        .as_str()
        .parse::<u32>()
        .map(|degrees| degrees % 360)
        .map_err(|error| IngestError::OcrFailed(format!("invalid OSD rotation: {error}")))
}

fn path_arg(path: &Path) -> Result<&str, IngestError> {
    path.to_str().ok_or_else(|| {
        IngestError::InvalidArgument(format!("non utf-8 path: {}", path.display()))
    })
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = non_blank(std::env::var("LLM_OCR_ENDPOINT").ok())?;
        let api_key = non_blank(std::env::var("LLM_OCR_API_KEY").ok());
        Some(Self { endpoint, api_key })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    image_base64: String,
    mime_type: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    pages: Option<Vec<LlmOcrPage>>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Posts page images to a multimodal OCR service.
pub struct HttpOcrEngine {
    config: Option<OcrEndpointConfig>,
    client: Client,
}

impl HttpOcrEngine {
    pub fn new(config: Option<OcrEndpointConfig>) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Result<Self, IngestError> {
        self.client = Client::builder().timeout(limit).build()?;
        Ok(self)
    }

    fn config(&self) -> Result<&OcrEndpointConfig, IngestError> {
        self.config.as_ref().ok_or_else(|| {
            IngestError::MissingResource("LLM_OCR_ENDPOINT is not configured".to_string())
        })
    }
}

impl OcrEngine for HttpOcrEngine {
    fn ensure_available(&self) -> Result<(), IngestError> {
        self.config().map(|_| ())
    }

    fn detect_rotation(&self, _image: &DynamicImage) -> Result<u32, IngestError> {
        Err(IngestError::OcrFailed(
            "remote OCR endpoint does not report orientation".to_string(),
        ))
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, IngestError> {
        let cfg = self.config()?;

        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        let payload = LlmOcrRequest {
            image_base64: STANDARD.encode(png),
            mime_type: "image/png",
        };

        let mut request = self
            .client
            .post(&cfg.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &cfg.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                cfg.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        response_text(&payload)
    }
}

fn response_text(payload: &LlmOcrResponse) -> Result<String, IngestError> {
    if let Some(text) = payload.text.as_deref().filter(|text| !text.trim().is_empty()) {
        return Ok(text.to_string());
    }

    let joined = payload
        .pages
        .iter()
        .flatten()
        .filter_map(|page| page.text.as_deref())
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if joined.is_empty() {
        return Err(IngestError::OcrFailed(
            "OCR response has no readable text".to_string(),
        ));
    }

    Ok(joined)
}
