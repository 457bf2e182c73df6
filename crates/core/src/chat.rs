use crate::embeddings::Embedder;
use crate::error::AnswerError;
use crate::models::Metadata;
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const HISTORY_WINDOW: usize = 5;
pub const NEIGHBOURS_PER_COLLECTION: usize = 3;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, prompt: &str, context: &[String]) -> Result<String, AnswerError>;
}

pub fn grounded_prompt(question: &str, context: &[String]) -> String {
    format!(
        "Context from PDFs:\n{}\n\nUser: {question}",
        context.join("\n")
    )
}

pub struct GeminiAnswerer {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl GeminiAnswerer {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AnswerError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AnswerError::MissingCredentials(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoint: GEMINI_ENDPOINT.to_string(),
            client: Client::new(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Answerer for GeminiAnswerer {
    async fn answer(&self, prompt: &str, context: &[String]) -> Result<String, AnswerError> {
        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint.trim_end_matches('/'),
                self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "text": grounded_prompt(prompt, context) }],
                }],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AnswerError::BackendResponse {
                backend: "gemini".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        gemini_text(&parsed).ok_or_else(|| AnswerError::BackendResponse {
            backend: "gemini".to_string(),
            details: "response carried no text".to_string(),
        })
    }
}

fn gemini_text(response: &Value) -> Option<String> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub pdf_name: String,
    pub page_no: Option<u64>,
    pub content: String,
}

impl Reference {
    fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            pdf_name: metadata
                .get("pdf_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            page_no: metadata.get("page_no").and_then(Value::as_u64),
            content: metadata
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatSession {
    pub history: Vec<ChatTurn>,
    pub last_references: Vec<Reference>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retrieval_prompt(&self) -> String {
        render_window(self.history.iter().collect())
    }

    fn retrieval_prompt_with(&self, pending: &ChatTurn) -> String {
        render_window(self.history.iter().chain([pending]).collect())
    }
}

fn render_window(turns: Vec<&ChatTurn>) -> String {
    let start = turns.len().saturating_sub(HISTORY_WINDOW);
    turns[start..]
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub answer: String,
    pub references: Vec<Reference>,
}

/// Retrieves context for `question` from every store and asks `answerer`.
/// The session only changes once an answer arrives, so a failed or dropped
/// call leaves it as it was.
pub async fn ask(
    session: &mut ChatSession,
    question: &str,
    stores: &[&dyn VectorStore],
    embedder: &dyn Embedder,
    answerer: &dyn Answerer,
) -> Result<ChatReply, AnswerError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AnswerError::EmptyQuestion);
    }

    let pending = ChatTurn {
        role: Role::User,
        content: question.to_string(),
    };
    let query = embedder.embed(&session.retrieval_prompt_with(&pending));

    let mut references = Vec::new();
    for store in stores {
        let hits = store.query(&query, NEIGHBOURS_PER_COLLECTION).await?;
        references.extend(hits.iter().map(Reference::from_metadata));
    }
    debug!(passages = references.len(), "context retrieved");

    let context: Vec<String> = references.iter().map(|r| r.content.clone()).collect();
    let answer = answerer.answer(question, &context).await?;
    info!(references = references.len(), "question answered");

    session.history.push(pending);
    session.history.push(ChatTurn {
        role: Role::Agent,
        content: answer.clone(),
    });
    session.last_references = references.clone();
    Ok(ChatReply { answer, references })
}
