use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Content-database record, keyed by document id. Created only after
// ParsedContent exists for the same document.
stored_object!(AnalysisResult, "document_analysis", {
    document_id: String,
    summary: String,
    entities: Vec<String>,
    risk_factors: Vec<String>,
    recommendations: Vec<String>,
    model_used: String
});

impl AnalysisResult {
    pub fn new(
        document_id: String,
        summary: String,
        entities: Vec<String>,
        risk_factors: Vec<String>,
        recommendations: Vec<String>,
        model_used: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: document_id.clone(),
            created_at: now,
            updated_at: now,
            document_id,
            summary,
            entities,
            risk_factors,
            recommendations,
            model_used,
        }
    }

    pub async fn get(
        db: &SurrealDbClient,
        document_id: &str,
    ) -> Result<Option<AnalysisResult>, AppError> {
        Ok(db.get_item::<AnalysisResult>(document_id).await?)
    }

    /// Replaces any previous analysis of the same document (re-analysis
    /// after a failure or a model change).
    pub async fn save(db: &SurrealDbClient, result: AnalysisResult) -> Result<(), AppError> {
        db.upsert_item(result).await?;
        Ok(())
    }

    pub async fn delete(db: &SurrealDbClient, document_id: &str) -> Result<(), AppError> {
        db.delete_item::<AnalysisResult>(document_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn save_replaces_previous_analysis() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb");

        let first = AnalysisResult::new(
            "doc-1".into(),
            "A lease agreement.".into(),
            vec!["Landlord Inc".into()],
            vec!["No escape clause".into()],
            vec!["Negotiate clause 4".into()],
            "gpt-4o".into(),
        );
        AnalysisResult::save(&db, first).await.expect("first save");

        let second = AnalysisResult::new(
            "doc-1".into(),
            "Updated summary.".into(),
            vec![],
            vec![],
            vec![],
            "deepseek-chat".into(),
        );
        AnalysisResult::save(&db, second).await.expect("second save");

        let stored = AnalysisResult::get(&db, "doc-1")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.summary, "Updated summary.");
        assert_eq!(stored.model_used, "deepseek-chat");

        let all = db
            .get_all_stored_items::<AnalysisResult>()
            .await
            .expect("all");
        assert_eq!(all.len(), 1);
    }
}
