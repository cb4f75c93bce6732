//! Pair-safe split of a conversation into an older prefix and a recent tail.

use crate::conversation::ConversationItem;

/// Number of trailing items kept verbatim by default.
pub const DEFAULT_RECENT_ITEMS: usize = 3;

/// Result of [`split_items`].
#[derive(Debug, Clone, Copy)]
pub struct SplitItems<'a> {
    pub older: &'a [ConversationItem],
    pub recent: &'a [ConversationItem],
}

impl SplitItems<'_> {
    /// Index of the first recent item.
    #[must_use]
    pub fn boundary(&self) -> usize {
        self.older.len()
    }
}

/// Split `items` so that roughly the last `target_recent` are recent.
///
/// The boundary moves toward the front while the item at the boundary is a
/// tool result, so a result never lands in `recent` while its call stays in
/// `older`. `recent` is therefore never shorter than
/// `min(target_recent, items.len())`.
#[must_use]
pub fn split_items(items: &[ConversationItem], target_recent: usize) -> SplitItems<'_> {
    let mut boundary = items.len().saturating_sub(target_recent);

    while boundary > 0 && boundary < items.len() && items[boundary].is_tool_result() {
        boundary -= 1;
    }

    let (older, recent) = items.split_at(boundary);
    SplitItems { older, recent }
}
