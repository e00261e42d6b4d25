//! HTTP service for uploads, flashcards and signed object downloads.
//!
//! Routes:
//! - `POST /api/files/process`, `GET /api/files/list`,
//!   `DELETE /api/files/delete`, `POST /api/files/:id/resume`
//! - `GET|PATCH|DELETE /api/flashcards`, `POST /api/flashcards/reorder`,
//!   `POST /api/flashcards/:id/review`
//! - `GET|POST /api/paths`, `GET /api/paths/next`
//! - `GET /objects/*key` for URLs issued by the object store

mod handlers;
mod routes;

pub use handlers::ApiError;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::service::DocumentService;
use crate::storage::{ObjectStore, UrlSigner};

/// Shared state for the HTTP service.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DocumentService>,
    pub store: Arc<dyn ObjectStore>,
    /// Must be the signer the store issues URLs with.
    pub signer: UrlSigner,
}

impl AppState {
    pub fn new(service: DocumentService, store: Arc<dyn ObjectStore>, signer: UrlSigner) -> Self {
        Self {
            service: Arc::new(service),
            store,
            signer,
        }
    }
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = create_router(state);

    tracing::info!("Starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, Pool};
    use crate::error::GenerationFailure;
    use crate::pipeline::batch::BatchPipeline;
    use crate::pipeline::generate::{BinaryPart, GenerationClient, ModelClient};
    use crate::pipeline::retry::RetryPolicy;
    use crate::pipeline::schema::Flashcard;
    use crate::service::ServiceSettings;
    use crate::storage::LocalObjectStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    struct NoModel;

    #[async_trait]
    impl ModelClient for NoModel {
        async fn generate(&self, _: &str, _: &[BinaryPart]) -> Result<String, GenerationFailure> {
            Err(GenerationFailure::Parse {
                detail: "no model in tests".into(),
            })
        }
    }

    async fn setup_test_app() -> (axum::Router, AppState, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let signer = UrlSigner::new("test-secret", "http://localhost:3000");
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(dir.path().join("objects"), signer.clone()));
        let pipeline = BatchPipeline::new(
            GenerationClient::new(Arc::new(NoModel)),
            RetryPolicy::default(),
        );
        let service = DocumentService::new(
            pool,
            Arc::clone(&store),
            pipeline,
            ServiceSettings::default(),
        );

        let state = AppState::new(service, store, signer);
        (create_router(state.clone()), state, dir)
    }

    fn card(term: &str) -> Flashcard {
        Flashcard {
            term: term.into(),
            definition: format!("{term} definition"),
            hint: None,
            explanation: None,
            key_concept: None,
            source: "notes.pdf".into(),
            page: "1".into(),
            difficulty: 20,
            index: 0,
            language: Some("en".into()),
            metadata: None,
        }
    }

    async fn seed_cards(pool: &Pool, terms: &[&str]) -> Vec<i64> {
        let mut ids = Vec::new();
        for t in terms {
            ids.push(db::insert_flashcard(pool, None, &card(t)).await.unwrap());
        }
        ids
    }

    async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/files/process")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn list_files_empty() {
        let (app, _state, _dir) = setup_test_app().await;
        let (status, json) = send(
            &app,
            Request::builder()
                .uri("/api/files/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "files": [] }));
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let (app, _state, _dir) = setup_test_app().await;
        let (status, json) = send(
            &app,
            multipart_request("other", "a.pdf", "application/pdf", b"%PDF-1.7"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "File is required");
    }

    #[tokio::test]
    async fn upload_rejects_non_pdf_and_empty_files() {
        let (app, _state, _dir) = setup_test_app().await;

        let (status, json) =
            send(&app, multipart_request("file", "a.txt", "text/plain", b"hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("text/plain"));

        let (status, json) =
            send(&app, multipart_request("file", "a.pdf", "application/pdf", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "File is required");
    }

    #[tokio::test]
    async fn delete_file_requires_known_id() {
        let (app, _state, _dir) = setup_test_app().await;

        let (status, json) = send(&app, json_request("DELETE", "/api/files/delete", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "File ID is required");

        let (status, json) = send(
            &app,
            json_request("DELETE", "/api/files/delete", json!({ "fileId": 99 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "File not found");
    }

    #[tokio::test]
    async fn flashcard_crud_and_reorder() {
        let (app, state, _dir) = setup_test_app().await;
        let ids = seed_cards(state.service.pool(), &["a", "b", "c"]).await;

        let (status, json) = send(
            &app,
            Request::builder()
                .uri("/api/flashcards")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let terms: Vec<&str> = json["flashcards"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["term"].as_str().unwrap())
            .collect();
        assert_eq!(terms, ["a", "b", "c"]);

        let (status, json) = send(
            &app,
            json_request(
                "PATCH",
                "/api/flashcards",
                json!({ "id": ids[1], "definition": "updated", "keyConcept": "k" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["flashcard"]["definition"], "updated");
        assert_eq!(json["flashcard"]["keyConcept"], "k");

        let (status, _) = send(
            &app,
            json_request("PATCH", "/api/flashcards", json!({ "definition": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/flashcards/reorder",
                json!({ "ids": [ids[2], ids[0], ids[1]] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            json_request("POST", "/api/flashcards/reorder", json!({ "ids": [ids[0]] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/flashcards?id={}", ids[2]))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let remaining = db::list_flashcards(state.service.pool()).await.unwrap();
        let order: Vec<(String, i64)> = remaining.iter().map(|c| (c.term.clone(), c.index)).collect();
        assert_eq!(order, vec![("a".into(), 0), ("b".into(), 1)]);
    }

    #[tokio::test]
    async fn malformed_requests_get_json_errors() {
        let (app, state, _dir) = setup_test_app().await;
        let ids = seed_cards(state.service.pool(), &["a"]).await;

        let broken_patch = Request::builder()
            .method("PATCH")
            .uri("/api/flashcards")
            .header("content-type", "application/json")
            .body(Body::from("{\"id\": 1,"))
            .unwrap();
        let (status, json) = send(&app, broken_patch).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string(), "{json}");

        let (status, json) = send(
            &app,
            json_request(
                "PATCH",
                "/api/flashcards",
                json!({ "id": ids[0], "difficulty": "hard" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].is_string(), "{json}");

        let (status, json) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri("/api/flashcards?id=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string(), "{json}");

        let (status, json) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/api/files/abc/resume")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string(), "{json}");
    }

    #[tokio::test]
    async fn object_without_signature_is_forbidden() {
        let (app, state, _dir) = setup_test_app().await;
        state
            .store
            .put("1-notes.pdf", b"%PDF-1.7", "application/pdf")
            .await
            .unwrap();

        for uri in ["/objects/1-notes.pdf", "/objects/1-notes.pdf?expires=9999999999"] {
            let (status, json) = send(
                &app,
                Request::builder().uri(uri).body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
            assert_eq!(json["error"], "Invalid or expired signature");
        }
    }

    #[tokio::test]
    async fn review_updates_progress() {
        let (app, state, _dir) = setup_test_app().await;
        let ids = seed_cards(state.service.pool(), &["atp"]).await;

        let (status, json) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/flashcards/{}/review", ids[0]),
                json!({ "correct": true }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["totalAttempts"], 1);
        assert_eq!(json["correctAttempts"], 1);

        let (status, _) = send(
            &app,
            json_request("POST", "/api/flashcards/999/review", json!({ "correct": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn learning_paths_follow_reviews() {
        let (app, state, _dir) = setup_test_app().await;
        let ids = seed_cards(state.service.pool(), &["atp", "dna"]).await;

        let (status, json) = send(
            &app,
            json_request(
                "POST",
                "/api/paths",
                json!({ "title": "Energy", "difficulty": 20, "flashcardIds": [ids[0]] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let first = json["path"]["id"].as_i64().unwrap();

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/paths",
                json!({
                    "title": "Genes",
                    "difficulty": 40,
                    "flashcardIds": [ids[1]],
                    "prerequisites": [first]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/paths",
                json!({ "title": "Bad", "difficulty": 20, "flashcardIds": [ids[0]], "prerequisites": [77] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let next = |app: axum::Router| async move {
            send(
                &app,
                Request::builder()
                    .uri("/api/paths/next")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .1
        };
        assert_eq!(next(app.clone()).await["path"]["title"], "Energy");

        for _ in 0..5 {
            send(
                &app,
                json_request(
                    "POST",
                    &format!("/api/flashcards/{}/review", ids[0]),
                    json!({ "correct": true }),
                ),
            )
            .await;
        }
        assert_eq!(next(app.clone()).await["path"]["title"], "Genes");

        let (status, json) = send(
            &app,
            Request::builder().uri("/api/paths").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["paths"][0]["completed"], true);
        assert_eq!(json["paths"][1]["unlocked"], true);
        assert_eq!(json["paths"][1]["completedCards"], 0);
    }

    #[tokio::test]
    async fn signed_objects_are_served() {
        let (app, state, _dir) = setup_test_app().await;
        let url = state
            .store
            .put("1-notes.pdf", b"%PDF-1.7 body", "application/pdf")
            .await
            .unwrap();
        let path = url.trim_start_matches("http://localhost:3000");

        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/pdf");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"%PDF-1.7 body");

        let tampered = format!("{}0", path);
        let (status, _) = send(
            &app,
            Request::builder().uri(tampered).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
