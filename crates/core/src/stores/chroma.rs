use crate::error::StoreError;
use crate::models::Metadata;
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "chroma";

pub struct ChromaStore {
    base: Url,
    collection: String,
    dimension: Option<usize>,
    client: Client,
    collection_id: OnceCell<String>,
}

impl ChromaStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        dimension: Option<usize>,
    ) -> Result<Self, StoreError> {
        let mut base = Url::parse(endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            collection: collection.into(),
            dimension,
            client: Client::new(),
            collection_id: OnceCell::new(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .get(self.base.join("api/v1/collections")?)
            .send()
            .await?;
        let parsed = expect_success(response).await?;

        Ok(parsed
            .as_array()
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|c| c.pointer("/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn query_text(&self, text: &str, top_k: usize) -> Result<Vec<Metadata>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.run_query(json!({
            "query_texts": [text],
            "n_results": top_k,
            "include": ["metadatas", "distances"],
        }))
        .await
    }

    async fn collection_id(&self) -> Result<&str, StoreError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(self.base.join("api/v1/collections")?)
                    .json(&json!({ "name": self.collection, "get_or_create": true }))
                    .send()
                    .await?;
                let parsed = expect_success(response).await?;

                parsed
                    .pointer("/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::BackendResponse {
                        backend: BACKEND.to_string(),
                        details: format!("collection {} has no id", self.collection),
                    })
            })
            .await?;
        Ok(id.as_str())
    }

    async fn collection_url(&self, operation: &str) -> Result<Url, StoreError> {
        let id = self.collection_id().await?;
        Ok(self
            .base
            .join(&format!("api/v1/collections/{id}/{operation}"))?)
    }

    async fn run_query(&self, body: Value) -> Result<Vec<Metadata>, StoreError> {
        let response = self
            .client
            .post(self.collection_url("query").await?)
            .json(&body)
            .send()
            .await?;
        let parsed = expect_success(response).await?;
        Ok(metadatas_from_query(&parsed))
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), StoreError> {
        match self.dimension {
            Some(expected) if expected != embedding.len() => Err(StoreError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            }),
            _ => Ok(()),
        }
    }
}

fn metadatas_from_query(response: &Value) -> Vec<Metadata> {
    response
        .pointer("/metadatas/0")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|metadata| match metadata {
                    Value::Object(map) => map.clone(),
                    _ => Metadata::new(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn add_body(entries: &[(Vec<f32>, Metadata)]) -> Value {
    let mut ids = Vec::with_capacity(entries.len());
    let mut embeddings = Vec::with_capacity(entries.len());
    let mut metadatas = Vec::with_capacity(entries.len());
    let mut documents = Vec::with_capacity(entries.len());

    for (embedding, metadata) in entries {
        ids.push(
            metadata
                .get("chunk_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        );
        embeddings.push(embedding);
        metadatas.push(flatten_metadata(metadata));
        documents.push(
            metadata
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
    }

    json!({
        "ids": ids,
        "embeddings": embeddings,
        "metadatas": metadatas,
        "documents": documents,
    })
}

/// Chroma only accepts scalar metadata values: nulls are dropped, arrays and
/// objects are stored as JSON text.
pub fn flatten_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter_map(|(key, value)| {
            let flat = match value {
                Value::Null => return None,
                Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
                scalar => scalar.clone(),
            };
            Some((key.clone(), flat))
        })
        .collect()
}

async fn expect_success(response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("{status}: {body}"),
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn add_many(&self, entries: &[(Vec<f32>, Metadata)]) -> Result<(), StoreError> {
        for (embedding, _) in entries {
            self.check_dimension(embedding)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.collection_url("add").await?)
            .json(&add_body(entries))
            .send()
            .await?;
        expect_success(response).await?;

        debug!(collection = %self.collection, entries = entries.len(), "entries added");
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Metadata>, StoreError> {
        self.check_dimension(embedding)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        self.run_query(json!({
            "query_embeddings": [embedding],
            "n_results": top_k,
            "include": ["metadatas", "distances"],
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Recorded = Arc<Mutex<Vec<(String, Value)>>>;

    fn entry(chunk_id: &str, content: &str, embedding: Vec<f32>) -> (Vec<f32>, Metadata) {
        let mut metadata = Metadata::new();
        metadata.insert("chunk_id".to_string(), json!(chunk_id));
        metadata.insert("page_no".to_string(), json!(2));
        metadata.insert("content".to_string(), json!(content));
        metadata.insert("bbox".to_string(), json!([0, 0, 10, 10]));
        (embedding, metadata)
    }

    fn canned_reply(path: &str) -> Value {
        if path == "/api/v1/collections" {
            json!({ "id": "c-1", "name": "manual" })
        } else if path.ends_with("/query") {
            json!({
                "ids": [["a", "b"]],
                "metadatas": [[{ "page_no": 2, "content": "pump" }, null]],
                "distances": [[0.1, 0.4]],
            })
        } else {
            json!(true)
        }
    }

    async fn answer_one(mut socket: TcpStream, recorded: Recorded) -> std::io::Result<()> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        let (head_end, length) = loop {
            let read = socket.read(&mut chunk).await?;
            if read == 0 {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buffer[..pos]).to_string();
                let length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break (pos + 4, length);
            }
        };
        while buffer.len() < head_end + length {
            let read = socket.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }

        let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
        let path = head
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        let body = serde_json::from_slice(&buffer[head_end..]).unwrap_or(Value::Null);
        let reply = canned_reply(&path).to_string();
        recorded.lock().unwrap().push((path, body));

        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
            reply.len()
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }

    async fn chroma_stub() -> std::io::Result<(String, Recorded)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = format!("http://{}", listener.local_addr()?);
        let recorded = Recorded::default();
        let log = recorded.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let _ = answer_one(socket, log.clone()).await;
            }
        });
        Ok((endpoint, recorded))
    }

    #[test]
    fn add_body_lines_up_parallel_arrays() {
        let entries = vec![
            entry("c-1", "Pump pressure 40 psi", vec![0.5, 0.5]),
            entry("c-2", "Filter interval", vec![1.0, 0.0]),
        ];

        let body = add_body(&entries);

        assert_eq!(body["ids"], json!(["c-1", "c-2"]));
        assert_eq!(body["embeddings"], json!([[0.5, 0.5], [1.0, 0.0]]));
        assert_eq!(body["documents"], json!(["Pump pressure 40 psi", "Filter interval"]));
        assert_eq!(body["metadatas"][1]["bbox"], json!("[0,0,10,10]"));
        assert_eq!(body["metadatas"][0]["page_no"], json!(2));
    }

    #[test]
    fn entries_without_chunk_id_get_fresh_ids() {
        let body = add_body(&[(vec![0.0], Metadata::new()), (vec![1.0], Metadata::new())]);
        let ids: Vec<&str> = body["ids"]
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(body["documents"], json!(["", ""]));
    }

    #[test]
    fn query_response_maps_to_metadata_only() {
        let hits = metadatas_from_query(&canned_reply("/api/v1/collections/c-1/query"));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["content"], json!("pump"));
        assert!(hits[1].is_empty());

        assert!(metadatas_from_query(&json!({ "metadatas": [] })).is_empty());
        assert!(metadatas_from_query(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn batch_add_is_one_request() -> Result<(), Box<dyn std::error::Error>> {
        let (endpoint, recorded) = chroma_stub().await?;
        let store = ChromaStore::new(&endpoint, "manual", Some(2))?;
        let entries = vec![
            entry("c-1", "Pump pressure 40 psi", vec![0.5, 0.5]),
            entry("c-2", "Filter interval", vec![1.0, 0.0]),
        ];

        store.add_many(&entries).await?;

        let requests = recorded.lock().unwrap().clone();
        let paths: Vec<&str> = requests.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(paths, vec!["/api/v1/collections", "/api/v1/collections/c-1/add"]);
        assert_eq!(requests[0].1, json!({ "name": "manual", "get_or_create": true }));
        assert_eq!(requests[1].1, add_body(&entries));
        Ok(())
    }

    #[tokio::test]
    async fn queries_send_vectors_or_text() -> Result<(), Box<dyn std::error::Error>> {
        let (endpoint, recorded) = chroma_stub().await?;
        let store = ChromaStore::new(&endpoint, "manual", Some(2))?;

        let by_vector = store.query(&[0.5, 0.5], 2).await?;
        let by_text = store.query_text("pump pressure", 2).await?;

        assert_eq!(by_vector, by_text);
        assert_eq!(by_vector[0]["page_no"], json!(2));

        let requests = recorded.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].1["query_embeddings"], json!([[0.5, 0.5]]));
        assert_eq!(requests[1].1["n_results"], json!(2));
        assert_eq!(requests[2].1["query_texts"], json!(["pump pressure"]));
        Ok(())
    }

    #[test]
    fn nested_values_are_flattened() {
        let mut metadata = Metadata::new();
        metadata.insert("page_no".to_string(), json!(4));
        metadata.insert("pdf_name".to_string(), json!("manual"));
        metadata.insert("bbox".to_string(), json!([1.0, 2.0]));
        metadata.insert("note".to_string(), Value::Null);

        let flat = flatten_metadata(&metadata);

        assert_eq!(flat["page_no"], json!(4));
        assert_eq!(flat["pdf_name"], json!("manual"));
        assert_eq!(flat["bbox"], json!("[1.0,2.0]"));
        assert!(!flat.contains_key("note"));
    }

    #[test]
    fn endpoint_gets_trailing_slash() -> Result<(), StoreError> {
        let store = ChromaStore::new("http://localhost:8000/chroma", "manual", Some(8))?;
        assert_eq!(
            store.base.join("api/v1/collections")?.as_str(),
            "http://localhost:8000/chroma/api/v1/collections"
        );
        assert!(ChromaStore::new("not a url", "manual", None).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_dimension_fails_before_any_request() -> Result<(), StoreError> {
        let store = ChromaStore::new("http://127.0.0.1:9", "manual", Some(4))?;
        let result = store.add(&[0.0; 3], Metadata::new()).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(store.query(&[0.0; 4], 0).await?.is_empty());
        Ok(())
    }
}
