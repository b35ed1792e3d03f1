use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    expression::ExpressionResult,
    extract::extract_structured,
    llm_client::{CompletionRequest, LLMClient},
    prompts::{PromptSet, render},
};

const DECISION_TEMPERATURE: f32 = 0.3;
const DECISION_MAX_TOKENS: u32 = 300;
const JOKE_TEMPERATURE: f32 = 0.8;
const JOKE_MAX_TOKENS: u32 = 150;
/// Threshold ceiling applied when the assistant is addressed by name.
const ADDRESSED_THRESHOLD: f32 = 0.5;
const MIN_TEXT_LEN: usize = 3;

const CONVERSATION_MODE_INSTRUCTION: &str = "\nCONVERSATION MODE ACTIVE: always respond with a joke or funny comment, whatever the content.\n";

/// The model's verdict on whether a transcript deserves a joke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JokeDecision {
    #[serde(default)]
    pub should_respond: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_joke_type")]
    pub joke_type: String,
}

fn default_joke_type() -> String {
    "general".to_string()
}

impl JokeDecision {
    /// The "do not respond" default used whenever the model cannot be consulted.
    pub fn declined(reasoning: impl Into<String>) -> Self {
        Self {
            should_respond: false,
            confidence: 0.0,
            reasoning: reasoning.into(),
            joke_type: "none".to_string(),
        }
    }
}

/// Expression details attached to a joke that used visual context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JokeExpression {
    pub expression: String,
    pub expression_confidence: f32,
    pub expression_context: Option<String>,
}

/// A generated joke together with the decision that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JokeData {
    pub original_text: String,
    pub joke_response: String,
    pub joke_type: String,
    pub confidence: f32,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<JokeExpression>,
}

/// Response Decision and Response Generation over a shared LLM client.
pub struct JokeResponder {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<PromptSet>,
    threshold: f32,
    max_response_length: usize,
}

/// True when the text names the assistant.
pub fn addresses_assistant(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("polly") || lower.contains("paulie")
}

/// Removes quote characters and truncates to `max_len` chars with "...".
pub fn clean_joke(raw: &str, max_len: usize) -> String {
    let stripped: String = raw.trim().chars().filter(|c| *c != '"' && *c != '\'').collect();
    if stripped.chars().count() > max_len {
        let truncated: String = stripped.chars().take(max_len).collect();
        format!("{truncated}...")
    } else {
        stripped
    }
}

impl JokeResponder {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        prompts: Arc<PromptSet>,
        threshold: f32,
        max_response_length: usize,
    ) -> Self {
        Self {
            llm,
            prompts,
            threshold,
            max_response_length,
        }
    }

    /// The cutoff for this transcript; lowered when the assistant is addressed.
    pub fn effective_threshold(&self, text: &str, decision: &JokeDecision) -> f32 {
        if addresses_assistant(text) || decision.joke_type == "polly_response" {
            self.threshold.min(ADDRESSED_THRESHOLD)
        } else {
            self.threshold
        }
    }

    /// Asks the model whether `text` merits a joke.
    ///
    /// Never fails: transport and parse errors yield [`JokeDecision::declined`].
    pub async fn should_respond_with_joke(&self, text: &str, conversation_mode: bool) -> JokeDecision {
        let instruction = if conversation_mode {
            CONVERSATION_MODE_INSTRUCTION
        } else {
            ""
        };
        let prompt = render(
            &self.prompts.should_respond,
            &[("conversation_mode_instruction", instruction), ("text", text)],
        );
        let request = CompletionRequest::new(prompt)
            .with_temperature(DECISION_TEMPERATURE)
            .with_max_tokens(DECISION_MAX_TOKENS);

        let reply = match self.llm.complete(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Joke decision request failed");
                return JokeDecision::declined(format!("Error occurred: {e}"));
            }
        };

        match extract_structured::<JokeDecision>(&reply) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, reply = %reply, "Failed to parse joke decision");
                JokeDecision::declined("Failed to parse AI response")
            }
        }
    }

    /// Asks the model for the joke itself. Returns `None` on any failure or an
    /// empty reply.
    pub async fn generate_joke_response(
        &self,
        text: &str,
        joke_type: &str,
        expression_context: Option<&str>,
    ) -> Option<String> {
        let context_info = expression_context
            .map(|ctx| format!("\nVisual context: {ctx}"))
            .unwrap_or_default();
        let (visual_relevance, expression_guideline) = if expression_context.is_some() {
            (
                " and visual context",
                "\n- Reference their facial expression naturally",
            )
        } else {
            ("", "")
        };
        let persona = if joke_type == "polly_response" || addresses_assistant(text) {
            self.prompts.polly_persona.as_str()
        } else {
            ""
        };
        let max_length = self.max_response_length.to_string();

        let prompt = render(
            &self.prompts.generate_joke,
            &[
                ("context_info", context_info.as_str()),
                ("visual_relevance", visual_relevance),
                ("max_length", max_length.as_str()),
                ("joke_type", joke_type),
                ("expression_guideline", expression_guideline),
                ("persona", persona),
                ("text", text),
            ],
        );
        let request = CompletionRequest::new(prompt)
            .with_temperature(JOKE_TEMPERATURE)
            .with_max_tokens(JOKE_MAX_TOKENS);

        match self.llm.complete(request).await {
            Ok(reply) => {
                let joke = clean_joke(&reply, self.max_response_length);
                (!joke.is_empty()).then_some(joke)
            }
            Err(e) => {
                warn!(error = %e, "Joke generation request failed");
                None
            }
        }
    }

    /// Runs decision then generation for one final transcript.
    pub async fn process_text_for_joke(
        &self,
        text: &str,
        expression: Option<&ExpressionResult>,
        conversation_mode: bool,
    ) -> Option<JokeData> {
        if text.trim().chars().count() < MIN_TEXT_LEN {
            return None;
        }

        let decision = self.should_respond_with_joke(text, conversation_mode).await;

        if !conversation_mode {
            if !decision.should_respond {
                info!(reasoning = %decision.reasoning, "Not responding with a joke");
                return None;
            }
            let threshold = self.effective_threshold(text, &decision);
            if decision.confidence < threshold {
                info!(
                    confidence = decision.confidence,
                    threshold, "Joke confidence below threshold"
                );
                return None;
            }
        }

        let expression_context = if conversation_mode {
            None
        } else {
            expression.and_then(ExpressionResult::joke_context)
        };

        let joke_response = self
            .generate_joke_response(text, &decision.joke_type, expression_context.as_deref())
            .await?;

        let expression = expression.filter(|e| e.success).map(|e| JokeExpression {
            expression: e.expression.as_str().to_string(),
            expression_confidence: e.confidence,
            expression_context: expression_context.clone(),
        });

        Some(JokeData {
            original_text: text.to_string(),
            joke_response,
            joke_type: decision.joke_type,
            confidence: decision.confidence,
            reasoning: decision.reasoning,
            expression,
        })
    }
}
