use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Lives in the content database, keyed by the owning document's id. The
// metadata row is only ever flipped to parsing_completed after this write
// has succeeded, so observing that status guarantees this record exists.
stored_object!(ParsedContent, "parsed_documents", {
    document_id: String,
    text: String
});

impl ParsedContent {
    pub fn new(document_id: String, text: String) -> Self {
        let now = Utc::now();
        Self {
            id: document_id.clone(),
            created_at: now,
            updated_at: now,
            document_id,
            text,
        }
    }

    pub async fn get(
        db: &SurrealDbClient,
        document_id: &str,
    ) -> Result<Option<ParsedContent>, AppError> {
        Ok(db.get_item::<ParsedContent>(document_id).await?)
    }

    /// Idempotent write: re-running extraction over the same input replaces
    /// the record under the same id.
    pub async fn save(db: &SurrealDbClient, content: ParsedContent) -> Result<(), AppError> {
        db.upsert_item(content).await?;
        Ok(())
    }

    pub async fn delete(db: &SurrealDbClient, document_id: &str) -> Result<(), AppError> {
        db.delete_item::<ParsedContent>(document_id).await?;
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
    async fn save_and_get_roundtrip() {
        let db = memory_db().await;
        let content = ParsedContent::new("doc-1".into(), "The agreement text.".into());

        ParsedContent::save(&db, content.clone()).await.expect("save");

        let fetched = ParsedContent::get(&db, "doc-1")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(fetched.text, "The agreement text.");
        assert_eq!(fetched.document_id, "doc-1");
    }

    #[tokio::test]
    async fn save_is_idempotent_per_document() {
        let db = memory_db().await;
        ParsedContent::save(&db, ParsedContent::new("doc-1".into(), "v1".into()))
            .await
            .expect("first save");
        ParsedContent::save(&db, ParsedContent::new("doc-1".into(), "v2".into()))
            .await
            .expect("second save");

        let all = db
            .get_all_stored_items::<ParsedContent>()
            .await
            .expect("all");
        assert_eq!(all.len(), 1);
        assert_eq!(all.first().map(|c| c.text.as_str()), Some("v2"));
    }

    #[tokio::test]
    async fn absent_content_reads_as_none() {
        let db = memory_db().await;
        let fetched = ParsedContent::get(&db, "missing").await.expect("get");
        assert!(fetched.is_none());

        // Deleting something absent is not an error.
        ParsedContent::delete(&db, "missing").await.expect("delete");
    }
}
