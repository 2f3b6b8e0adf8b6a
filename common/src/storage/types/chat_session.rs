use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    pub fn user(content: String) -> Self {
        Self {
            role: ChatRole::User,
            content,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn assistant(content: String) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
            created_at: chrono::Utc::now(),
        }
    }
}

// One session per (owner, document); the message list is the session.
stored_object!(ChatSession, "chat_sessions", {
    owner_id: String,
    document_id: String,
    messages: Vec<ChatMessage>
});

impl ChatSession {
    /// Composite session key: one session per (owner, document) pair. The
    /// underscore separator keeps the id free of record-reference syntax.
    pub fn session_key(owner_id: &str, document_id: &str) -> String {
        format!("{owner_id}_{document_id}")
    }

    pub fn new(owner_id: String, document_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Self::session_key(&owner_id, &document_id),
            created_at: now,
            updated_at: now,
            owner_id,
            document_id,
            messages: Vec::new(),
        }
    }

    pub async fn get(
        db: &SurrealDbClient,
        owner_id: &str,
        document_id: &str,
    ) -> Result<Option<ChatSession>, AppError> {
        Ok(db
            .get_item::<ChatSession>(&Self::session_key(owner_id, document_id))
            .await?)
    }

    /// Appends a user/assistant exchange, creating the session on first
    /// use, and returns the full updated session.
    pub async fn append_exchange(
        db: &SurrealDbClient,
        owner_id: &str,
        document_id: &str,
        user_message: ChatMessage,
        assistant_message: ChatMessage,
    ) -> Result<ChatSession, AppError> {
        let mut session = Self::get(db, owner_id, document_id)
            .await?
            .unwrap_or_else(|| Self::new(owner_id.to_string(), document_id.to_string()));

        session.messages.push(user_message);
        session.messages.push(assistant_message);
        session.updated_at = chrono::Utc::now();

        db.upsert_item(session.clone()).await?;
        Ok(session)
    }

    pub async fn delete(
        db: &SurrealDbClient,
        owner_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        db.delete_item::<ChatSession>(&Self::session_key(owner_id, document_id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[tokio::test]
    async fn append_creates_session_and_preserves_order() {
        let db = memory_db().await;

        let session = ChatSession::append_exchange(
            &db,
            "user_1",
            "doc-1",
            ChatMessage::user("When does it terminate?".into()),
            ChatMessage::assistant("On January 1, 2030.".into()),
        )
        .await
        .expect("append");

        assert_eq!(session.messages.len(), 2);

        let session = ChatSession::append_exchange(
            &db,
            "user_1",
            "doc-1",
            ChatMessage::user("Who are the parties?".into()),
            ChatMessage::assistant("Acme and Beta Corp.".into()),
        )
        .await
        .expect("append again");

        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert_eq!(session.messages[1].role, ChatRole::Assistant);
        assert_eq!(session.messages[2].content, "Who are the parties?");
    }

    #[tokio::test]
    async fn sessions_are_keyed_per_owner_and_document() {
        let db = memory_db().await;

        ChatSession::append_exchange(
            &db,
            "user_1",
            "doc-1",
            ChatMessage::user("hi".into()),
            ChatMessage::assistant("hello".into()),
        )
        .await
        .expect("append");

        let other = ChatSession::get(&db, "user_1", "doc-2").await.expect("get");
        assert!(other.is_none());

        let same = ChatSession::get(&db, "user_1", "doc-1")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(same.document_id, "doc-1");
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let db = memory_db().await;

        ChatSession::append_exchange(
            &db,
            "user_1",
            "doc-1",
            ChatMessage::user("hi".into()),
            ChatMessage::assistant("hello".into()),
        )
        .await
        .expect("append");

        ChatSession::delete(&db, "user_1", "doc-1").await.expect("delete");
        assert!(ChatSession::get(&db, "user_1", "doc-1")
            .await
            .expect("get")
            .is_none());
    }
}
