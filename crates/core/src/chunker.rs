use crate::error::IngestError;
use crate::models::{Chunk, Element, PageKind};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ChunkCreator {
    chunks: Vec<Chunk>,
}

impl ChunkCreator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_chunk(
        &mut self,
        content: impl Into<String>,
        chunk_type: impl Into<String>,
        elements: Vec<Element>,
        page_no: u32,
        source: PageKind,
    ) -> &Chunk {
        let index = self.chunks.len();
        self.chunks.push(Chunk {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            chunk_type: chunk_type.into(),
            elements,
            page_no,
            source,
        });
        &self.chunks[index]
    }

    pub fn get_chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn append(&mut self, staged: ChunkCreator) {
        self.chunks.extend(staged.chunks);
    }

    pub fn to_json(&self, path: &Path) -> Result<(), IngestError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.chunks)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn chunks_keep_creation_order_and_unique_ids() {
        let mut creator = ChunkCreator::new();
        for page_no in 1..=4 {
            creator.create_chunk(
                format!("page {page_no}"),
                "text",
                Vec::new(),
                page_no,
                PageKind::Digital,
            );
        }

        let pages: Vec<u32> = creator.get_chunks().iter().map(|c| c.page_no).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);

        let ids: HashSet<&str> = creator.get_chunks().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn fields_are_stored_verbatim() {
        let mut creator = ChunkCreator::new();
        let element = Element::Text {
            bbox: None,
            text: "Torque".to_string(),
        };
        let chunk = creator
            .create_chunk("  Torque spec \n", "table", vec![element.clone()], 7, PageKind::Scanned)
            .clone();

        assert_eq!(chunk.content, "  Torque spec \n");
        assert_eq!(chunk.chunk_type, "table");
        assert_eq!(chunk.elements, vec![element]);
        assert_eq!(chunk.source, PageKind::Scanned);
    }

    #[test]
    fn append_moves_staged_chunks_to_the_end() {
        let mut committed = ChunkCreator::new();
        committed.create_chunk("first", "text", Vec::new(), 1, PageKind::Digital);
        let mut staged = ChunkCreator::new();
        staged.create_chunk("second", "text", Vec::new(), 2, PageKind::Digital);

        committed.append(staged);

        let contents: Vec<&str> = committed
            .get_chunks()
            .iter()
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn export_writes_chunk_records() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("unichunks.json");
        let mut creator = ChunkCreator::new();
        creator.create_chunk("Pump", "text", Vec::new(), 3, PageKind::Digital);

        creator.to_json(&path)?;

        let exported: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        let record = &exported[0];
        assert_eq!(record["content"], "Pump");
        assert_eq!(record["type"], "text");
        assert_eq!(record["page_no"], 3);
        assert_eq!(record["source"], "digital");
        assert!(record["id"].is_string());
        assert!(record["elements"].as_array().is_some_and(|e| e.is_empty()));
        Ok(())
    }
}
