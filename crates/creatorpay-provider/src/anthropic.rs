use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{http_client, send_error, status_error, ContentBlock, LlmProvider, LlmRequest, LlmResponse};

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn to_api_request(request: LlmRequest) -> ApiRequest {
        let tools: Vec<ApiToolDef> = request
            .tools
            .into_iter()
            .map(|t| ApiToolDef {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();

        ApiRequest {
            model: request.model,
            system: request.system,
            max_tokens: request.max_tokens,
            messages: request
                .messages
                .into_iter()
                .map(|m| ApiMessage {
                    role: m.role,
                    content: m.text,
                })
                .collect(),
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice: request.forced_tool.map(|name| ApiToolChoice {
                choice_type: "tool".to_string(),
                name,
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.api_base);
        let payload = Self::to_api_request(request);

        let resp = self
            .client
            .post(url)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error("anthropic", e))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await?;
            let detail = serde_json::from_str::<ApiError>(&text)
                .ok()
                .map(|e| (e.error.r#type, e.error.message));
            return Err(status_error("anthropic", status, detail));
        }

        let body: ApiResponse = resp.json().await?;
        Ok(to_llm_response(body))
    }
}

fn to_llm_response(body: ApiResponse) -> LlmResponse {
    let content: Vec<ContentBlock> = body
        .content
        .iter()
        .filter_map(|block| match block.block_type.as_str() {
            "text" => block
                .text
                .as_ref()
                .map(|t| ContentBlock::Text { text: t.clone() }),
            "tool_use" => Some(ContentBlock::ToolUse {
                id: block.id.clone()?,
                name: block.name.clone()?,
                input: block
                    .input
                    .clone()
                    .unwrap_or(serde_json::Value::Object(Default::default())),
            }),
            _ => None,
        })
        .collect();
    let text = body
        .content
        .iter()
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");

    LlmResponse {
        text,
        content,
        input_tokens: body.usage.as_ref().map(|u| u.input_tokens),
        output_tokens: body.usage.as_ref().map(|u| u.output_tokens),
        stop_reason: body.stop_reason,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ApiToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ApiToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiToolChoice {
    #[serde(rename = "type")]
    pub choice_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiResponse {
    pub content: Vec<ApiContentBlock>,
    pub usage: Option<ApiUsage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(rename = "type")]
    pub r#type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LlmMessage, ToolDef};

    #[test]
    fn anthropic_new_trims_trailing_slash() {
        let provider = AnthropicProvider::new("test-key", "https://api.anthropic.com/");
        assert_eq!(provider.api_key, "test-key");
        assert_eq!(provider.api_base, "https://api.anthropic.com");
    }

    #[test]
    fn api_request_serialization_matches_expected_shape() {
        let req = LlmRequest {
            model: "claude-sonnet-4-5".to_string(),
            system: Some("system prompt".to_string()),
            messages: vec![LlmMessage::user("hello")],
            max_tokens: 1024,
            tools: vec![],
            forced_tool: None,
        };
        let value = serde_json::to_value(AnthropicProvider::to_api_request(req)).unwrap();
        let expected = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "system": "system prompt",
            "max_tokens": 1024,
            "messages": [
                { "role": "user", "content": "hello" }
            ]
        });
        assert_eq!(value, expected);
    }

    #[test]
    fn forced_tool_becomes_tool_choice() {
        let tool = ToolDef {
            name: "submit_payout_decision".into(),
            description: "decide".into(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let req = LlmRequest::structured("m".into(), "s".into(), "u".into(), tool);
        let value = serde_json::to_value(AnthropicProvider::to_api_request(req)).unwrap();
        assert_eq!(
            value["tool_choice"],
            serde_json::json!({"type": "tool", "name": "submit_payout_decision"})
        );
        assert_eq!(value["tools"][0]["name"], "submit_payout_decision");
    }

    #[test]
    fn tool_use_block_maps_to_content() {
        let raw = serde_json::json!({
            "content": [
                {"type": "text", "text": "Deciding."},
                {"type": "tool_use", "id": "toolu_1", "name": "submit", "input": {"amount": 3.5}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 34},
            "stop_reason": "tool_use"
        });
        let body: ApiResponse = serde_json::from_value(raw).unwrap();
        let resp = to_llm_response(body);
        assert_eq!(resp.text, "Deciding.");
        assert_eq!(resp.content.len(), 2);
        assert_eq!(resp.tool_input("submit").unwrap()["amount"], 3.5);
        assert_eq!(resp.input_tokens, Some(12));
    }

    #[test]
    fn api_error_deserialization_works() {
        let raw = serde_json::json!({
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": "messages: field required"
            }
        });
        let parsed: ApiError = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.error.r#type, "invalid_request_error");
        assert_eq!(parsed.error.message, "messages: field required");
    }
}
