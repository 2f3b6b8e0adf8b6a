use std::sync::Arc;

use async_openai::{
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

use common::{
    error::AppError,
    storage::types::chat_session::{ChatMessage, ChatRole},
    utils::config::{AppConfig, LlmProvider},
};

/// Characters of document text passed to the analysis prompt before
/// truncation.
const MAX_ANALYSIS_CHARS: usize = 32_000;
/// Characters of document context injected into a chat system message.
const MAX_CHAT_CONTEXT_CHARS: usize = 10_000;

/// The one capability interface every model integration satisfies. Callers
/// depend only on this trait; which provider answers is a configuration
/// concern resolved by [`adapter_from_config`].
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Single-turn completion with an explicit system instruction.
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
    ) -> Result<String, AppError>;

    /// Document-analysis mode: returns the model's raw JSON object. Callers
    /// normalize the slots, since models disagree about their shapes.
    async fn analyze_document(&self, document_text: &str, model: &str)
        -> Result<Value, AppError>;

    /// Multi-turn chat grounded in the full extracted document text.
    async fn chat(
        &self,
        history: &[ChatMessage],
        document_context: &str,
        model: &str,
    ) -> Result<String, AppError>;
}

/// Adapter for any OpenAI-wire-compatible endpoint. DeepSeek speaks the
/// same protocol, so provider selection is just a base URL.
pub struct OpenAiCompatAdapter {
    client: Client<async_openai::config::OpenAIConfig>,
}

impl OpenAiCompatAdapter {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        let client = Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(base_url),
        );
        Self { client }
    }

    async fn chat_completion(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        model: &str,
        json_output: bool,
    ) -> Result<String, AppError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model).messages(messages).temperature(0.1);
        if json_output {
            builder.response_format(ResponseFormat::JsonObject);
        }
        let request = builder.build().map_err(AppError::from_provider_call)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(AppError::from_provider_call)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatAdapter {
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
    ) -> Result<String, AppError> {
        let messages = vec![
            ChatCompletionRequestSystemMessage::from(system_prompt.to_string()).into(),
            ChatCompletionRequestUserMessage::from(user_prompt.to_string()).into(),
        ];
        self.chat_completion(messages, model, false).await
    }

    async fn analyze_document(
        &self,
        document_text: &str,
        model: &str,
    ) -> Result<Value, AppError> {
        let user_prompt =
            crate::analysis::analysis_user_prompt(document_text, MAX_ANALYSIS_CHARS);
        let messages = vec![
            ChatCompletionRequestSystemMessage::from(
                crate::analysis::ANALYSIS_SYSTEM_PROMPT.to_string(),
            )
            .into(),
            ChatCompletionRequestUserMessage::from(user_prompt).into(),
        ];

        let content = self.chat_completion(messages, model, true).await?;
        serde_json::from_str::<Value>(&content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse analysis response as JSON: {e}"))
        })
    }

    async fn chat(
        &self,
        history: &[ChatMessage],
        document_context: &str,
        model: &str,
    ) -> Result<String, AppError> {
        let system_prompt = chat_system_prompt(document_context);

        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessage::from(system_prompt).into()];
        for message in history {
            match message.role {
                ChatRole::User => messages.push(
                    ChatCompletionRequestUserMessage::from(message.content.clone()).into(),
                ),
                ChatRole::Assistant => messages.push(
                    async_openai::types::ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.clone())
                        .build()
                        .map_err(AppError::from_provider_call)?
                        .into(),
                ),
            }
        }

        self.chat_completion(messages, model, false).await
    }
}

/// System instruction for document chat: answers come from the supplied
/// text or not at all.
fn chat_system_prompt(document_context: &str) -> String {
    let truncated = truncate_chars(document_context, MAX_CHAT_CONTEXT_CHARS);
    format!(
        "You are a legal document assistant. Answer questions based on this document content:\n\n\
         {truncated}\n\n\
         Only respond with information clearly present in the document. \
         If the answer isn't in the document, say so clearly."
    )
}

/// Truncate at a char boundary; byte slicing would panic on multibyte text.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...[truncated]");
    truncated
}

/// Build the configured adapter. Keyed on provider; the model is chosen
/// per call so one adapter serves every model of that provider.
pub fn adapter_from_config(config: &AppConfig) -> Arc<dyn LlmAdapter> {
    let base_url = match config.llm_provider {
        LlmProvider::OpenAI => &config.openai_base_url,
        LlmProvider::DeepSeek => &config.deepseek_base_url,
    };
    Arc::new(OpenAiCompatAdapter::new(&config.openai_api_key, base_url))
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Canned adapter for tests: fixed responses, records the prompts it
    /// was called with.
    pub struct StaticLlmAdapter {
        pub text_response: String,
        pub analysis_response: Value,
        pub chat_response: String,
        pub seen_prompts: Mutex<Vec<String>>,
        pub fail_with: Option<fn() -> AppError>,
    }

    impl Default for StaticLlmAdapter {
        fn default() -> Self {
            Self {
                text_response: "The agreement terminates on January 1, 2030.".into(),
                analysis_response: serde_json::json!({
                    "summary": "A short agreement with a fixed termination date.",
                    "entities": ["January 1, 2030"],
                    "risks": ["No renewal clause"],
                    "recommendations": ["Review before expiry"]
                }),
                chat_response: "According to the document, it terminates on January 1, 2030."
                    .into(),
                seen_prompts: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }
    }

    impl StaticLlmAdapter {
        fn record(&self, prompt: &str) -> Result<(), AppError> {
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            if let Ok(mut seen) = self.seen_prompts.lock() {
                seen.push(prompt.to_string());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LlmAdapter for StaticLlmAdapter {
        async fn generate_text(
            &self,
            system_prompt: &str,
            user_prompt: &str,
            _model: &str,
        ) -> Result<String, AppError> {
            self.record(&format!("{system_prompt}\n{user_prompt}"))?;
            Ok(self.text_response.clone())
        }

        async fn analyze_document(
            &self,
            document_text: &str,
            _model: &str,
        ) -> Result<Value, AppError> {
            self.record(document_text)?;
            Ok(self.analysis_response.clone())
        }

        async fn chat(
            &self,
            history: &[ChatMessage],
            document_context: &str,
            _model: &str,
        ) -> Result<String, AppError> {
            let last = history.last().map(|m| m.content.as_str()).unwrap_or_default();
            self.record(&format!("{document_context}\n{last}"))?;
            Ok(self.chat_response.clone())
        }
    }
}
