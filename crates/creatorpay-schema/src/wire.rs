use serde::{Deserialize, Serialize};

use crate::Channel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

/// Short human-readable notice that rides along with a state push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
        }
    }
}

/// Frames sent from the server to a viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full replacement of the synced object stored under `key`.
    Set {
        key: String,
        value: serde_json::Value,
    },
    Toast {
        #[serde(flatten)]
        toast: Toast,
    },
}

/// Frames sent from a viewer to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a fresh publish of the current state.
    Get,
    Action {
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Typed remote actions a viewer may trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum RemoteAction {
    AddChannel {
        channel: Channel,
    },
    #[serde(rename_all = "camelCase")]
    EvaluateAndPayForPost {
        channel_id: String,
        post_id: String,
    },
}

impl RemoteAction {
    /// Every action name a viewer may send.
    pub const NAMES: &'static [&'static str] = &["add_channel", "evaluate_and_pay_for_post"];

    /// Decode an action name plus its JSON payload as received in a
    /// [`ClientMessage::Action`] frame.
    pub fn from_parts(
        action: &str,
        payload: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "action": action,
            "payload": payload,
        }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RemoteAction::AddChannel { .. } => "add_channel",
            RemoteAction::EvaluateAndPayForPost { .. } => "evaluate_and_pay_for_post",
        }
    }
}
