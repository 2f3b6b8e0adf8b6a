use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{delete, get, post, put},
    Router,
};
use routes::{
    documents::{
        analyze_document, chat_with_document, create_document, delete_document, get_document,
        get_document_analysis, get_document_status, ingest_document, list_documents,
        request_extraction, update_document_status,
    },
    liveness::live,
    readiness::ready,
    search::{query_documents, search_documents},
};

pub mod api_state;
pub mod error;
mod routes;

const UPLOAD_BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public probes (for k8s/systemd) plus the document and search API.
    Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route(
            "/documents",
            post(create_document).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT_BYTES)),
        )
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document))
        .route("/documents/{id}", delete(delete_document))
        .route("/documents/{id}/status", get(get_document_status))
        .route("/documents/{id}/status", put(update_document_status))
        .route("/documents/{id}/extract", post(request_extraction))
        .route("/documents/{id}/ingest", post(ingest_document))
        .route("/documents/{id}/analyze", post(analyze_document))
        .route("/documents/{id}/analysis", get(get_document_analysis))
        .route("/documents/{id}/chat", post(chat_with_document))
        .route("/search", post(search_documents))
        .route("/query", post(query_documents))
}
