use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub text: String,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            text: text.into(),
        }
    }
}

/// A function the model may call. Structured output is obtained by forcing a
/// single tool and reading its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    /// Name of the tool the model must call, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_tool: Option<String>,
}

fn default_max_tokens() -> u32 {
    2048
}

impl LlmRequest {
    pub fn simple(model: String, system: Option<String>, user: String) -> Self {
        Self {
            model,
            system,
            messages: vec![LlmMessage::user(user)],
            max_tokens: default_max_tokens(),
            tools: vec![],
            forced_tool: None,
        }
    }

    /// Request that must be answered by calling `tool`.
    pub fn structured(model: String, system: String, user: String, tool: ToolDef) -> Self {
        Self {
            model,
            system: Some(system),
            messages: vec![LlmMessage::user(user)],
            max_tokens: default_max_tokens(),
            forced_tool: Some(tool.name.clone()),
            tools: vec![tool],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub content: Vec<ContentBlock>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    /// Input of the first call to `tool`, or an error naming what came back instead.
    pub fn tool_input(&self, tool: &str) -> Result<&serde_json::Value> {
        self.content
            .iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { name, input, .. } if name == tool => Some(input),
                _ => None,
            })
            .ok_or_else(|| {
                let preview: String = self.text.chars().take(120).collect();
                anyhow!("model did not call {tool}; replied with text: {preview:?}")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ToolDef {
        ToolDef {
            name: "submit".into(),
            description: "submit the answer".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn structured_request_forces_its_tool() {
        let req = LlmRequest::structured("m".into(), "sys".into(), "hi".into(), tool());
        assert_eq!(req.forced_tool.as_deref(), Some("submit"));
        assert_eq!(req.tools.len(), 1);
        assert_eq!(req.messages[0].role, "user");
    }

    #[test]
    fn tool_input_finds_matching_call() {
        let resp = LlmResponse {
            text: String::new(),
            content: vec![
                ContentBlock::Text {
                    text: "thinking".into(),
                },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "submit".into(),
                    input: serde_json::json!({"ok": true}),
                },
            ],
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("tool_use".into()),
        };
        assert_eq!(resp.tool_input("submit").unwrap()["ok"], true);
    }

    #[test]
    fn tool_input_missing_reports_text() {
        let resp = LlmResponse {
            text: "I refuse".into(),
            content: vec![ContentBlock::Text {
                text: "I refuse".into(),
            }],
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        };
        let err = resp.tool_input("submit").unwrap_err().to_string();
        assert!(err.contains("did not call submit"));
        assert!(err.contains("I refuse"));
    }

    #[test]
    fn request_serialization_omits_empty_tools() {
        let req = LlmRequest::simple("m".into(), None, "hi".into());
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("forced_tool").is_none());
        assert_eq!(json["max_tokens"], 2048);
    }
}
