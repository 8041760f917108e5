//! Summary expansion through OpenAI chat completions.
//!
//! Every request carries the same system instruction: expand the news summary
//! into a 500–1000 character report with extra (plausible) detail and
//! background.

use super::{join_endpoint, read_body};
use crate::capability::{CapabilityError, RemoteCapability};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const SYSTEM_PROMPT: &str = "请将以下新闻总结扩展为一篇500字到1000字新闻报道，包括更多细节和背景信息。新增的内容应该是合理的，但不必是真实的。";

#[derive(Debug, Clone)]
pub struct OpenAiExpander {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiExpander {
    pub fn new(client: Client, api_key: String, endpoint: String, model: String) -> Self {
        Self {
            client,
            api_key,
            endpoint,
            model,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

fn chat_request<'a>(model: &'a str, content: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content,
            },
        ],
    }
}

/// The generated text of the first choice.
pub fn parse_chat_response(body: &str) -> Result<String, CapabilityError> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CapabilityError::Malformed("response contains no message content".into()))
}

impl RemoteCapability for OpenAiExpander {
    type Output = String;

    fn name(&self) -> &'static str {
        "expand"
    }

    #[instrument(level = "debug", skip_all)]
    async fn call(&self, payload: &str) -> Result<Self::Output, CapabilityError> {
        let resp = self
            .client
            .post(join_endpoint(&self.endpoint, "v1/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&chat_request(&self.model, payload))
            .send()
            .await?;
        let body = read_body(resp).await?;
        parse_chat_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let v = serde_json::to_value(chat_request("gpt-4o", "新闻")).unwrap();
        assert_eq!(v["model"], "gpt-4o");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(v["messages"][1], json!({"role": "user", "content": "新闻"}));
    }

    #[test]
    fn test_parse_first_choice() {
        let body = json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "扩展后的报道"}},
                {"index": 1, "message": {"role": "assistant", "content": "other"}}
            ]
        })
        .to_string();
        assert_eq!(parse_chat_response(&body).unwrap(), "扩展后的报道");
    }

    #[test]
    fn test_null_content_is_malformed() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": null}}]})
            .to_string();
        assert!(matches!(
            parse_chat_response(&body),
            Err(CapabilityError::Malformed(_))
        ));
        assert!(matches!(
            parse_chat_response(r#"{"choices": []}"#),
            Err(CapabilityError::Malformed(_))
        ));
    }
}
