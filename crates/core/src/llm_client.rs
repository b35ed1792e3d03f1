use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Optional system message sent ahead of the prompt.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: 300,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A generic client for a chat-completion LLM.
///
/// Every component that needs model output goes through this trait, so the
/// vendor can be swapped (or mocked) without touching decision logic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Sends one prompt and returns the trimmed text of the first choice.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API (Groq, OpenAI, ...).
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "llama-3.1-8b-instant").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt)
                .build()?
                .into(),
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_completion_tokens(request.max_tokens)
            .build()?;

        let response: CreateChatCompletionResponse = self
            .client
            .chat()
            .create(chat_request)
            .await
            .context("Chat completion request failed")?;

        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_defaults() {
        let request = CompletionRequest::new("hello");
        assert_eq!(request.prompt, "hello");
        assert!(request.system.is_none());
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.max_tokens, 300);
    }

    #[test]
    fn test_completion_request_builders() {
        let request = CompletionRequest::new("p")
            .with_system("sys")
            .with_temperature(0.8)
            .with_max_tokens(150);
        assert_eq!(request.system.as_deref(), Some("sys"));
        assert_eq!(request.temperature, 0.8);
        assert_eq!(request.max_tokens, 150);
    }

    #[tokio::test]
    async fn test_mock_client_returns_canned_text() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| req.prompt.contains("ping"))
            .times(1)
            .returning(|_| Ok("pong".to_string()));

        let client: &dyn LLMClient = &mock;
        let reply = client.complete(CompletionRequest::new("ping")).await.unwrap();
        assert_eq!(reply, "pong");
    }
}
