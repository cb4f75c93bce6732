use crate::conversation::{ConversationItem, Role};

/// Character-based token estimator (~4 chars per token).
///
/// Not a tokenizer. The estimate is stable for identical input and never
/// decreases when an item is appended, which is what batch sizing relies on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Estimate tokens in a string: `ceil(chars / 4)`.
    #[must_use]
    pub fn estimate_str(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    /// Estimate a single item.
    #[must_use]
    pub fn count_item(&self, item: &ConversationItem) -> usize {
        Self::estimate_str(&item.surrogate_text())
    }

    /// Estimate across items, broken down by item kind.
    #[must_use]
    pub fn count_items(&self, items: &[ConversationItem]) -> TokenCount {
        let mut count = TokenCount {
            item_count: items.len(),
            ..TokenCount::default()
        };

        for item in items {
            let tokens = self.count_item(item);
            count.total += tokens;

            match item {
                ConversationItem::Message { role, .. } => match role {
                    Role::System => count.by_kind.system += tokens,
                    Role::User => count.by_kind.user += tokens,
                    Role::Assistant => count.by_kind.assistant += tokens,
                },
                ConversationItem::ToolCall { .. } => count.by_kind.tool_call += tokens,
                ConversationItem::ToolResult { .. } => count.by_kind.tool_result += tokens,
            }
        }

        count
    }

    /// Total estimate across items.
    #[must_use]
    pub fn estimate(&self, items: &[ConversationItem]) -> usize {
        items.iter().map(|item| self.count_item(item)).sum()
    }
}

/// Aggregated estimate across items.
#[derive(Debug, Clone, Default)]
pub struct TokenCount {
    pub total: usize,
    pub by_kind: KindTokens,
    pub item_count: usize,
}

/// Estimated tokens per item kind.
#[derive(Debug, Clone, Default)]
pub struct KindTokens {
    pub system: usize,
    pub user: usize,
    pub assistant: usize,
    pub tool_call: usize,
    pub tool_result: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ContentPart, MessageContent};
    use serde_json::json;

    #[test]
    fn test_empty() {
        assert_eq!(TokenCounter::new().estimate(&[]), 0);
    }

    #[test]
    fn test_estimate_str_rounds_up() {
        assert_eq!(TokenCounter::estimate_str("hello"), 2);
        assert_eq!(TokenCounter::estimate_str("abcd"), 1);
        assert_eq!(TokenCounter::estimate_str(""), 0);
        assert_eq!(TokenCounter::estimate_str(&"a".repeat(100)), 25);
    }

    #[test]
    fn test_message_parts() {
        let item = ConversationItem::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: "hello".into(),
            },
            ContentPart::Text {
                text: " world".into(),
            },
        ]));
        // 11 chars
        assert_eq!(TokenCounter::new().estimate(&[item]), 3);
    }

    #[test]
    fn test_tool_call_uses_serialized_form() {
        let item = ConversationItem::tool_call("c1", "test", json!("{}"));
        let serialized = json!({"name": "test", "arguments": "{}"}).to_string();
        assert_eq!(
            TokenCounter::new().estimate(&[item]),
            serialized.len().div_ceil(4)
        );
    }

    #[test]
    fn test_tool_result_uses_serialized_output() {
        let item = ConversationItem::tool_result("c1", json!({"output": "ok"}));
        let serialized = json!({"output": "ok"}).to_string();
        assert_eq!(
            TokenCounter::new().estimate(&[item]),
            serialized.len().div_ceil(4)
        );
    }

    #[test]
    fn test_by_kind() {
        let items = vec![
            ConversationItem::system("rules"),
            ConversationItem::user("What is 2 + 2?"),
            ConversationItem::assistant("The answer is 4."),
            ConversationItem::tool_call("c1", "shell", json!({"commands": ["ls"]})),
            ConversationItem::tool_result("c1", json!("Cargo.toml src")),
        ];

        let count = TokenCounter::new().count_items(&items);
        assert_eq!(count.item_count, 5);
        assert!(count.by_kind.system > 0);
        assert!(count.by_kind.user > 0);
        assert!(count.by_kind.assistant > 0);
        assert!(count.by_kind.tool_call > 0);
        assert!(count.by_kind.tool_result > 0);
        assert_eq!(count.total, TokenCounter::new().estimate(&items));
    }

    #[test]
    fn test_appending_never_decreases() {
        let counter = TokenCounter::new();
        let mut items = Vec::new();
        let mut previous = counter.estimate(&items);
        for extra in [
            ConversationItem::user(""),
            ConversationItem::assistant("x"),
            ConversationItem::tool_call("c", "t", json!(null)),
            ConversationItem::tool_result("c", json!("")),
            ConversationItem::user("a much longer message than the others"),
        ] {
            items.push(extra);
            let next = counter.estimate(&items);
            assert!(next >= previous);
            previous = next;
        }
    }
}
