mod backend;
mod store;

pub use backend::{FileBackend, MemoryBackend, StoreBackend};
pub use store::{SessionStore, SessionStoreError, SessionSummary};

use crate::conversation::ConversationItem;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// How a [`Session`] handle picks and seeds its id.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Explicit id. When absent the earliest session in the store is reused,
    /// or a fresh id is generated.
    pub session_id: Option<String>,
    /// Items written when the session does not exist yet.
    pub initial_items: Vec<ConversationItem>,
}

impl SessionOptions {
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            session_id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn initial_items(mut self, items: Vec<ConversationItem>) -> Self {
        self.initial_items = items;
        self
    }
}

#[derive(Debug, Clone)]
struct ResolvedId {
    id: String,
    generated: bool,
}

/// Handle on one conversation log inside a shared [`SessionStore`].
///
/// The id is resolved lazily on first use. Every operation goes through the
/// store, so several handles on the same id see each other's writes.
#[derive(Clone)]
pub struct Session {
    store: Arc<SessionStore>,
    options: SessionOptions,
    resolved: Arc<OnceCell<ResolvedId>>,
}

impl Session {
    pub fn new(store: Arc<SessionStore>, options: SessionOptions) -> Self {
        Self {
            store,
            options,
            resolved: Arc::new(OnceCell::new()),
        }
    }

    /// Handle on an explicit id.
    pub fn open(store: Arc<SessionStore>, id: impl Into<String>) -> Self {
        Self::new(store, SessionOptions::with_id(id))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Session id, assigned on first call.
    pub async fn id(&self) -> Result<String, SessionStoreError> {
        Ok(self.resolve().await?.id.clone())
    }

    pub async fn items(&self) -> Result<Vec<ConversationItem>, SessionStoreError> {
        let id = &self.resolve().await?.id;
        self.store.items(id).await
    }

    pub async fn append(&self, items: Vec<ConversationItem>) -> Result<(), SessionStoreError> {
        let resolved = self.resolve().await?;
        self.store
            .append_as(&resolved.id, items, resolved.generated)
            .await
    }

    pub async fn pop_last(&self) -> Result<Option<ConversationItem>, SessionStoreError> {
        let id = &self.resolve().await?.id;
        self.store.pop_last(id).await
    }

    /// Remove this session from the store.
    pub async fn clear(&self) -> Result<(), SessionStoreError> {
        let id = &self.resolve().await?.id;
        self.store.clear(id).await.map(|_| ())
    }

    /// Replace the whole log in one write.
    pub async fn replace(&self, items: Vec<ConversationItem>) -> Result<(), SessionStoreError> {
        let resolved = self.resolve().await?;
        self.store
            .replace_as(&resolved.id, items, resolved.generated)
            .await
    }

    /// Swap the leading `expected` items for `items` if the log still starts
    /// with them. Items appended in the meantime are kept.
    pub async fn replace_prefix(
        &self,
        expected: &[ConversationItem],
        items: Vec<ConversationItem>,
    ) -> Result<bool, SessionStoreError> {
        let id = &self.resolve().await?.id;
        self.store.replace_prefix(id, expected, items).await
    }

    async fn resolve(&self) -> Result<&ResolvedId, SessionStoreError> {
        self.resolved
            .get_or_try_init(|| async {
                let resolved = match &self.options.session_id {
                    Some(id) => ResolvedId {
                        id: id.clone(),
                        generated: false,
                    },
                    None => match self.store.first_session_id().await? {
                        Some(id) => ResolvedId {
                            id,
                            generated: false,
                        },
                        None => ResolvedId {
                            id: uuid::Uuid::new_v4().to_string(),
                            generated: true,
                        },
                    },
                };

                if !self.options.initial_items.is_empty() {
                    self.store
                        .seed(
                            &resolved.id,
                            self.options.initial_items.clone(),
                            resolved.generated,
                        )
                        .await?;
                }

                tracing::debug!(session_id = %resolved.id, generated = resolved.generated, "Session resolved");
                Ok::<_, SessionStoreError>(resolved)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_generated_id_is_stable() {
        let session = Session::new(Arc::new(SessionStore::in_memory()), SessionOptions::default());
        let first = session.id().await.unwrap();
        assert_eq!(session.id().await.unwrap(), first);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn test_reuses_existing_session_without_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = Arc::new(SessionStore::file(&path));
        Session::open(store.clone(), "existing")
            .append(vec![ConversationItem::user("hello")])
            .await
            .unwrap();

        let reopened = Session::new(
            Arc::new(SessionStore::file(&path)),
            SessionOptions::default(),
        );
        assert_eq!(reopened.id().await.unwrap(), "existing");
        assert_eq!(
            reopened.items().await.unwrap(),
            vec![ConversationItem::user("hello")]
        );
    }

    #[tokio::test]
    async fn test_initial_items_seed_new_session_only() {
        let store = Arc::new(SessionStore::in_memory());
        let seed = vec![ConversationItem::system("You are helpful.")];

        let session = Session::new(
            store.clone(),
            SessionOptions::with_id("s").initial_items(seed.clone()),
        );
        assert_eq!(session.items().await.unwrap(), seed);
        session
            .append(vec![ConversationItem::user("hi")])
            .await
            .unwrap();

        let again = Session::new(
            store,
            SessionOptions::with_id("s").initial_items(vec![ConversationItem::system("other")]),
        );
        assert_eq!(again.items().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_handles_observe_each_other() {
        let store = Arc::new(SessionStore::in_memory());
        let a = Session::open(store.clone(), "shared");
        let b = Session::open(store, "shared");

        a.append(vec![ConversationItem::user("from a")]).await.unwrap();
        b.append(vec![ConversationItem::user("from b")]).await.unwrap();

        assert_eq!(
            a.items().await.unwrap(),
            vec![ConversationItem::user("from a"), ConversationItem::user("from b")]
        );
        assert_eq!(b.pop_last().await.unwrap(), Some(ConversationItem::user("from b")));
        assert_eq!(a.items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_replace() {
        let store = Arc::new(SessionStore::in_memory());
        let session = Session::open(store.clone(), "s");
        session
            .append(vec![ConversationItem::user("1"), ConversationItem::user("2")])
            .await
            .unwrap();

        session
            .replace(vec![ConversationItem::system("notice")])
            .await
            .unwrap();
        assert_eq!(
            session.items().await.unwrap(),
            vec![ConversationItem::system("notice")]
        );

        session.clear().await.unwrap();
        assert!(session.items().await.unwrap().is_empty());
        assert!(!store.contains("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_generated_flag_recorded() {
        let store = Arc::new(SessionStore::in_memory());
        let session = Session::new(store.clone(), SessionOptions::default());
        session
            .append(vec![ConversationItem::user("q")])
            .await
            .unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].generated_id);
        assert_eq!(list[0].id, session.id().await.unwrap());
    }
}
