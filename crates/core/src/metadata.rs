use crate::error::IngestError;
use crate::models::{BoundingBox, ElementKind, Metadata, PageKind};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub page_no: u32,
    pub element_type: ElementKind,
    pub bbox: Option<BoundingBox>,
    pub source: PageKind,
    pub extra: Metadata,
}

impl MetadataRecord {
    pub fn to_map(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("page_no".to_string(), Value::from(self.page_no));
        map.insert(
            "type".to_string(),
            Value::from(self.element_type.as_str()),
        );
        map.insert(
            "bbox".to_string(),
            self.bbox
                .map(|bbox| Value::from(Vec::from(<[f32; 4]>::from(bbox))))
                .unwrap_or(Value::Null),
        );
        map.insert("source".to_string(), Value::from(self.source.as_str()));
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }
}

impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

#[derive(Debug, Default)]
pub struct MetadataEngine {
    records: Vec<MetadataRecord>,
}

impl MetadataEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(
        &mut self,
        page_no: u32,
        element_type: ElementKind,
        bbox: Option<BoundingBox>,
        source: PageKind,
        extra: Option<Metadata>,
    ) {
        self.records.push(MetadataRecord {
            page_no,
            element_type,
            bbox,
            source,
            extra: extra.unwrap_or_default(),
        });
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, staged: MetadataEngine) {
        self.records.extend(staged.records);
    }

    pub fn to_json(&self, path: &Path) -> Result<(), IngestError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.records)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_is_merged_shallowly() {
        let mut engine = MetadataEngine::new();
        let mut extra = Metadata::new();
        extra.insert("text".to_string(), json!("Relief valve"));
        extra.insert("source".to_string(), json!("ocr"));
        engine.add_element(
            2,
            ElementKind::Text,
            Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
            PageKind::Digital,
            Some(extra),
        );

        let map = engine.records()[0].to_map();
        assert_eq!(map["page_no"], json!(2));
        assert_eq!(map["type"], json!("text"));
        assert_eq!(map["bbox"], json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(map["text"], json!("Relief valve"));
        assert_eq!(map["source"], json!("ocr"));
    }

    #[test]
    fn duplicates_are_kept() {
        let mut engine = MetadataEngine::new();
        for _ in 0..2 {
            engine.add_element(1, ElementKind::Block, None, PageKind::Scanned, None);
        }
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.records()[0], engine.records()[1]);
    }

    #[test]
    fn export_preserves_insertion_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("metadata.json");
        let mut engine = MetadataEngine::new();
        engine.add_element(3, ElementKind::Image, None, PageKind::Digital, None);
        engine.add_element(1, ElementKind::Table, None, PageKind::Digital, None);
        engine.add_element(2, ElementKind::Block, None, PageKind::Scanned, None);

        engine.to_json(&path)?;

        let exported: Vec<Value> = serde_json::from_slice(&std::fs::read(&path)?)?;
        let pages: Vec<u64> = exported
            .iter()
            .filter_map(|record| record["page_no"].as_u64())
            .collect();
        assert_eq!(pages, vec![3, 1, 2]);
        assert_eq!(exported[2]["type"], json!("block"));
        assert!(exported[0]["bbox"].is_null());
        Ok(())
    }
}
