//! Embedding and language model providers
//!
//! The pipeline talks to the model provider through two traits so tests can
//! substitute deterministic stubs. [`ModelClient`] is the HTTP implementation
//! for OpenAI-compatible endpoints and Ollama.

use crate::tools::ToolHandle;
use crate::{AgentError, Result};
use agentdesk_core::{ChatRole, ChatTurn};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Produces embedding vectors for text
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Service("No embedding returned".into()))
    }
}

/// Produces an answer from a prompt and retrieved context
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Everything the model sees for one answer
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Retrieved chunk texts, best first
    pub context: Vec<String>,
    pub history: Vec<ChatTurn>,
    pub query: String,
    pub tools: Vec<ToolHandle>,
}

impl GenerationRequest {
    /// System message: the agent's prompt plus the optional tool list
    pub fn system_message(&self) -> String {
        let mut message = self.system_prompt.trim().to_string();
        if !self.tools.is_empty() {
            if !message.is_empty() {
                message.push_str("\n\n");
            }
            message.push_str("Optional tools available to you:\n");
            for tool in &self.tools {
                message.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
        }
        message
    }

    /// The question with the retrieved context stuffed in front of it
    pub fn user_message(&self) -> String {
        format!(
            "Use the following pieces of context to answer the question at the end. \
             If you don't know the answer, just say that you don't know, \
             don't try to make up an answer.\n\n\
             {}\n\nQuestion: {}\nHelpful Answer:",
            self.context.join("\n\n"),
            self.query
        )
    }

    /// Full chat transcript to send: system, history, then the stuffed question
    pub fn messages(&self) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        let system = self.system_message();
        if !system.is_empty() {
            messages.push(WireMessage::new("system", system));
        }
        for turn in &self.history {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(WireMessage::new(role, turn.content.clone()));
        }
        messages.push(WireMessage::new("user", self.user_message()));
        messages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl std::str::FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(AgentError::Validation(format!("Unknown model provider: {}", other))),
        }
    }
}

/// HTTP client for the model provider
#[derive(Clone)]
pub struct ModelClient {
    client: Client,
    provider: ProviderKind,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embed_model: String,
    temperature: f32,
}

impl ModelClient {
    /// Create a client for an OpenAI-compatible endpoint
    pub fn openai(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            provider: ProviderKind::OpenAi,
            base_url: base_url.into(),
            api_key,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Create a client for a local Ollama server
    pub fn ollama(base_url: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Ollama,
            chat_model: "llama3.1:8b".to_string(),
            embed_model: "nomic-embed-text:latest".to_string(),
            ..Self::openai(base_url, None)
        }
    }

    /// Configure models
    pub fn with_models(
        mut self,
        chat_model: impl Into<String>,
        embed_model: impl Into<String>,
    ) -> Self {
        self.chat_model = chat_model.into();
        self.embed_model = embed_model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let request = self.client.post(url);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Health check
    pub async fn health(&self) -> Result<bool> {
        let path = match self.provider {
            ProviderKind::OpenAi => "/models",
            ProviderKind::Ollama => "/api/tags",
        };
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        Ok(response.status().is_success())
    }

    async fn openai_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = OpenAiEmbedRequest {
            model: &self.embed_model,
            input: texts,
        };

        let response: OpenAiEmbedResponse = self
            .post("/embeddings")
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    async fn ollama_embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbedRequest {
            model: &self.embed_model,
            prompt: text,
        };

        let response: OllamaEmbedResponse = self
            .post("/api/embeddings")
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.embedding)
    }
}

#[async_trait]
impl Embedder for ModelClient {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting embeddings for {} texts", texts.len());
        let embeddings = match self.provider {
            ProviderKind::OpenAi => self.openai_embed(texts).await?,
            ProviderKind::Ollama => {
                let mut results = Vec::with_capacity(texts.len());
                for text in texts {
                    results.push(self.ollama_embed(text).await?);
                }
                results
            }
        };

        if embeddings.len() != texts.len() {
            return Err(AgentError::Service(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                embeddings.len()
            )));
        }
        debug!("Received {} embeddings", embeddings.len());
        Ok(embeddings)
    }
}

#[async_trait]
impl LanguageModel for ModelClient {
    #[instrument(
        skip(self, request),
        fields(model = %self.chat_model, context = request.context.len())
    )]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let messages = request.messages();

        let content = match self.provider {
            ProviderKind::OpenAi => {
                let body = OpenAiChatRequest {
                    model: &self.chat_model,
                    temperature: self.temperature,
                    messages: &messages,
                };
                let response: OpenAiChatResponse = self
                    .post("/chat/completions")
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| AgentError::Service("Model returned no choices".into()))?
            }
            ProviderKind::Ollama => {
                let body = OllamaChatRequest {
                    model: &self.chat_model,
                    messages: &messages,
                    stream: false,
                    options: OllamaOptions {
                        temperature: self.temperature,
                    },
                };
                let response: OllamaChatResponse = self
                    .post("/api/chat")
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                response.message.content
            }
        };

        debug!("Model returned {} chars", content.len());
        Ok(content)
    }
}

// ==========================================
// REQUEST/RESPONSE TYPES
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl WireMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [WireMessage],
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    content: String,
}
