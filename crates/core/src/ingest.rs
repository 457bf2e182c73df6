use crate::document::LopdfDocument;
use crate::error::IngestError;
use crate::models::DocumentFingerprint;
use crate::orchestrator::{DocumentRun, Pipeline};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestedPdf {
    pub fingerprint: DocumentFingerprint,
    pub run: DocumentRun,
}

pub struct IngestionReport {
    pub documents: Vec<IngestedPdf>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub fn ingest_path_best_effort(
    path: &Path,
    pipeline: &Pipeline<'_>,
) -> Result<IngestionReport, IngestError> {
    let files = discover_pdf_files(path);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            path.display()
        )));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for file in files {
        let result = LopdfDocument::open(&file).and_then(|document| {
            let document = document.with_timeout(pipeline.options().external_timeout);
            let run = pipeline.process(&document)?;
            Ok(IngestedPdf {
                fingerprint: document.fingerprint().clone(),
                run,
            })
        });

        match result {
            Ok(ingested) => {
                info!(
                    document = %ingested.fingerprint.document_id,
                    checksum = %ingested.fingerprint.checksum,
                    chunks = ingested.run.chunks.len(),
                    "pdf ingested"
                );
                documents.push(ingested);
            }
            Err(error) => {
                warn!(path = %file.display(), %error, "pdf skipped");
                skipped_files.push(SkippedPdf {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(IngestionReport {
        documents,
        skipped_files,
    })
}
