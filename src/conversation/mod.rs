//! Conversation items exchanged between the agent loop and the model.
//!
//! Items are identified only by their position in a session log. The one
//! structural rule is that a `ToolResult` always follows the `ToolCall` it
//! answers; the compaction splitter relies on this.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const IMAGE_PLACEHOLDER: &str = "[image]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// Message body: either a bare string or a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Readable form of the body. Images render as `[image]`.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        self.render(|_| IMAGE_PLACEHOLDER)
    }

    /// Body with image payloads inlined, for size estimation.
    fn size_text(&self) -> Cow<'_, str> {
        self.render(|data| data)
    }

    fn render<'a>(&'a self, image: impl Fn(&'a str) -> &'a str) -> Cow<'a, str> {
        match self {
            MessageContent::Text(text) => Cow::Borrowed(text),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text } => out.push_str(text),
                        ContentPart::Image { data, .. } => out.push_str(image(data.as_str())),
                    }
                }
                Cow::Owned(out)
            }
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: Role,
        content: MessageContent,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        output: serde_json::Value,
    },
}

impl ConversationItem {
    pub fn message(role: Role, content: impl Into<MessageContent>) -> Self {
        Self::Message {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::message(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::message(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::message(Role::Assistant, content)
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            output,
        }
    }

    #[must_use]
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }

    /// Role of a message item; `None` for tool items.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Message { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Call identifier of a tool call or tool result.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall { call_id, .. } | Self::ToolResult { call_id, .. } => Some(call_id),
            Self::Message { .. } => None,
        }
    }

    /// Textual surrogate used for size estimation.
    ///
    /// Messages yield their content with image data inlined, tool calls the
    /// serialized name and arguments, tool results the serialized output.
    #[must_use]
    pub fn surrogate_text(&self) -> Cow<'_, str> {
        match self {
            Self::Message { content, .. } => content.size_text(),
            Self::ToolCall {
                name, arguments, ..
            } => {
                let call = serde_json::json!({ "name": name, "arguments": arguments });
                Cow::Owned(call.to_string())
            }
            Self::ToolResult { output, .. } => Cow::Owned(output.to_string()),
        }
    }
}
