//! Chat-completion reply generator
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. Upstream
//! failures are logged and surface as `None`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{PilotError, Result};
use crate::platform::ReplyGenerator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Reply generator backed by a chat-completion API
pub struct ChatReplyGenerator {
    config: GenerationConfig,
    knowledge_base: String,
    http: Client,
}

impl ChatReplyGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PilotError::Generation(format!("Failed to create HTTP client: {}", e)))?;

        let knowledge_base = match &config.knowledge_base_path {
            Some(path) => std::fs::read_to_string(path).unwrap_or_else(|e| {
                warn!("Knowledge base {} not loaded: {}", path.display(), e);
                String::new()
            }),
            None => String::new(),
        };

        Ok(Self {
            config,
            knowledge_base,
            http,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    pub fn build_prompt(&self, title: &str, body: &str) -> String {
        let mut prompt = String::from(
            "Write a helpful, friendly reply to the discussion post below. \
             Answer the question or add practical advice in 3 to 6 sentences.\n\n",
        );
        if !self.knowledge_base.trim().is_empty() {
            prompt.push_str("Reference notes (use only if relevant):\n\n");
            prompt.push_str(self.knowledge_base.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!("Post Title: {}\n\nPost Content: {}\n\nReply:", title, body));
        prompt
    }

    /// Send one prompt and return the first choice's text
    pub async fn chat(&self, prompt: &str) -> Result<String> {
        if !self.is_configured() {
            return Err(PilotError::Generation("API key not configured".to_string()));
        }

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PilotError::Generation(format!("API error: {} - {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PilotError::Generation(format!("Failed to parse response: {}", e)))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        debug!("Generation response received: {} chars", content.len());
        Ok(content)
    }

    fn finish(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(format!("{}{}", text, self.config.reply_footer))
    }
}

#[async_trait]
impl ReplyGenerator for ChatReplyGenerator {
    async fn generate(&self, title: &str, body: &str) -> Option<String> {
        let prompt = self.build_prompt(title, body);
        match self.chat(&prompt).await {
            Ok(text) => {
                let reply = self.finish(&text);
                if reply.is_none() {
                    warn!("Empty generation for post '{}'", title);
                }
                reply
            }
            Err(e) => {
                warn!("Error generating reply for post '{}': {}", title, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfig {
            reply_footer: "\n\n-- bot".to_string(),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_prompt_includes_post_and_knowledge_base() {
        let dir = tempfile::tempdir().unwrap();
        let kb = dir.path().join("notes.md");
        std::fs::write(&kb, "Snapshot tests catch UI regressions.").unwrap();

        let generator = ChatReplyGenerator::new(GenerationConfig {
            knowledge_base_path: Some(kb),
            ..config()
        })
        .unwrap();
        let prompt = generator.build_prompt("Flaky tests", "They fail on CI only");

        assert!(prompt.contains("Snapshot tests catch UI regressions."));
        assert!(prompt.contains("Post Title: Flaky tests"));
        assert!(prompt.ends_with("Post Content: They fail on CI only\n\nReply:"));
    }

    #[test]
    fn test_missing_knowledge_base_is_tolerated() {
        let generator = ChatReplyGenerator::new(GenerationConfig {
            knowledge_base_path: Some("/nonexistent/kb.md".into()),
            ..config()
        })
        .unwrap();
        assert!(!generator.build_prompt("t", "b").contains("Reference notes"));
    }

    #[test]
    fn test_finish_appends_footer_and_rejects_blank() {
        let generator = ChatReplyGenerator::new(config()).unwrap();
        assert_eq!(
            generator.finish("  Try mutation testing.  ").as_deref(),
            Some("Try mutation testing.\n\n-- bot")
        );
        assert_eq!(generator.finish("   "), None);
    }

    #[tokio::test]
    async fn test_unconfigured_generator_returns_none() {
        let generator = ChatReplyGenerator::new(config()).unwrap();
        assert!(!generator.is_configured());
        assert_eq!(generator.generate("title", "body").await, None);
    }
}
