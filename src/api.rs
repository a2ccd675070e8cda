use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::url_service::{CreateUrlError, RedirectTarget, ResolveAliasError, UrlService};

const HOME_PATH: &str = "/";

/// Missing fields deserialize as empty strings so they surface as
/// field-specific validation errors.
#[derive(Debug, Deserialize)]
pub struct CreateUrlPayload {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    error: String,
    error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

pub fn router(url_service: Arc<dyn UrlService>) -> Router {
    Router::new()
        .route(HOME_PATH, routing::get(home).post(create_url))
        .route("/debug/urls", routing::get(list_urls))
        .route("/{alias}", routing::get(redirect))
        .with_state(url_service)
}

async fn home() -> &'static str {
    "URL shortener: POST a JSON body {\"url\": ..., \"alias\": ...} to / to create a short link.\n"
}

#[instrument(skip(url_service))]
async fn create_url(
    State(url_service): State<Arc<dyn UrlService>>,
    payload: Result<Json<CreateUrlPayload>, JsonRejection>,
) -> Response {
    let CreateUrlPayload { url, alias } = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            let err_uuid = Uuid::new_v4();
            info!(?err_uuid, ?rejection, "User submitted a malformed request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(Error {
                    error: rejection.body_text(),
                    error_id: err_uuid.to_string(),
                    field: None,
                }),
            )
                .into_response();
        }
    };

    url_service
        .create_short_url(&url, &alias)
        .await
        .map(|shortened_url| (StatusCode::CREATED, Json(shortened_url)))
        .map_err(|error: CreateUrlError| {
            let err_uuid = Uuid::new_v4();
            let field = error.field();
            match error {
                CreateUrlError::AliasTaken => {
                    info!(?err_uuid, ?error, "Alias exists under a different entry");
                    (
                        StatusCode::CONFLICT,
                        Json(Error {
                            error: error.to_string(),
                            error_id: err_uuid.to_string(),
                            field,
                        }),
                    )
                }
                CreateUrlError::InvalidAlias(_) | CreateUrlError::InvalidUrl(_) => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    (
                        StatusCode::BAD_REQUEST,
                        Json(Error {
                            error: error.to_string(),
                            error_id: err_uuid.to_string(),
                            field,
                        }),
                    )
                }
                CreateUrlError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    internal_server_error(err_uuid)
                }
            }
        })
        .into_response()
}

#[instrument(skip(url_service))]
async fn redirect(
    State(url_service): State<Arc<dyn UrlService>>,
    Path(alias): Path<String>,
) -> impl IntoResponse {
    url_service
        .resolve_alias(&alias)
        .await
        .map(|target| match target {
            RedirectTarget::Original(url) => {
                info!(url, "Redirecting to original URL");
                Redirect::temporary(&url)
            }
            RedirectTarget::Home => Redirect::temporary(HOME_PATH),
        })
        .map_err(|error: ResolveAliasError| {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?error, "Encountered database error");
            internal_server_error(err_uuid)
        })
}

#[instrument(skip(url_service))]
async fn list_urls(State(url_service): State<Arc<dyn UrlService>>) -> impl IntoResponse {
    url_service.list_urls().await.map(Json).map_err(|error| {
        let err_uuid = Uuid::new_v4();
        error!(?err_uuid, ?error, "Failed to list URLs");
        internal_server_error(err_uuid)
    })
}

fn internal_server_error(err_uuid: Uuid) -> (StatusCode, Json<Error>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Error {
            error: "Internal server error".to_owned(),
            error_id: err_uuid.to_string(),
            field: None,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use crate::{
        memory_repo::InMemoryUrlRepository,
        url_repo::{MockUrlRepository, UrlRepository},
        url_service::new_url_service,
        visit_worker::run_visit_worker,
    };

    use super::*;

    /// A server over a fresh in-memory store with a running visit worker.
    fn new_server() -> TestServer {
        let url_repo: Arc<dyn UrlRepository> = Arc::new(InMemoryUrlRepository::new());
        let (visits, visit_receiver) = mpsc::channel(64);
        tokio::spawn(run_visit_worker(visit_receiver, Arc::clone(&url_repo)));
        let url_service = new_url_service(url_repo, visits, "https://sho.rt".to_owned());
        TestServer::new(router(url_service)).unwrap()
    }

    async fn listed_visits(server: &TestServer, alias: &str) -> Option<u64> {
        let listing = server.get("/debug/urls").await.json::<Value>();
        listing
            .as_array()
            .unwrap()
            .iter()
            .find(|entry| entry["alias"] == alias)
            .map(|entry| entry["visits"].as_u64().unwrap())
    }

    #[tokio::test]
    async fn test_create_then_redirect_counts_visit() {
        let server = new_server();

        let response = server
            .post("/")
            .json(&json!({ "url": "https://example.com/page", "alias": "Promo-2024" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body = response.json::<Value>();
        assert_eq!(body["shortUrl"], "https://sho.rt/promo-2024");
        assert_eq!(body["alias"], "promo-2024");
        assert_eq!(body["originalUrl"], "https://example.com/page");
        assert_eq!(listed_visits(&server, "promo-2024").await, Some(0));

        let response = server.get("/promo-2024").await;
        response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.header("location"), "https://example.com/page");

        // NOTE: visits are counted in the background; give the worker a chance
        let mut visits = None;
        for _ in 0..100 {
            visits = listed_visits(&server, "promo-2024").await;
            if visits == Some(1) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(visits, Some(1));
    }

    #[tokio::test]
    async fn test_redirect_is_case_insensitive() {
        let server = new_server();
        server
            .post("/")
            .json(&json!({ "url": "https://example.com", "alias": "My-Link" }))
            .await
            .assert_status(StatusCode::CREATED);

        for path in ["/my-link", "/MY-LINK", "/My-Link"] {
            let response = server.get(path).await;
            response.assert_status(StatusCode::TEMPORARY_REDIRECT);
            assert_eq!(response.header("location"), "https://example.com");
        }
    }

    #[tokio::test]
    async fn test_unknown_alias_redirects_home_without_creating_record() {
        let server = new_server();

        let response = server.get("/unknown").await;
        response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.header("location"), "/");

        let listing = server.get("/debug/urls").await.json::<Value>();
        assert_eq!(listing, json!([]));
    }

    #[tokio::test]
    async fn test_duplicate_alias_conflicts() {
        let server = new_server();
        server
            .post("/")
            .json(&json!({ "url": "https://example.com/first", "alias": "dup" }))
            .await
            .assert_status(StatusCode::CREATED);

        let response = server
            .post("/")
            .json(&json!({ "url": "https://example.com/second", "alias": " DUP " }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body = response.json::<Value>();
        assert_eq!(
            body["error"],
            "This alias is already taken. Please choose another one."
        );
        assert_eq!(body["field"], "alias");
        assert!(body["errorId"].is_string());

        let response = server.get("/dup").await;
        assert_eq!(response.header("location"), "https://example.com/first");
    }

    #[tokio::test]
    async fn test_validation_errors_name_the_field() {
        let server = new_server();

        let response = server
            .post("/")
            .json(&json!({ "url": "ftp://example.com", "alias": "ok" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["field"], "url");

        let response = server
            .post("/")
            .json(&json!({ "url": "https://example.com", "alias": "not_ok" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json::<Value>();
        assert_eq!(body["field"], "alias");
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .contains("letters, numbers, and hyphens")
        );

        let listing = server.get("/debug/urls").await.json::<Value>();
        assert_eq!(listing, json!([]));
    }

    #[tokio::test]
    async fn test_missing_fields_name_the_field() {
        let server = new_server();

        let response = server
            .post("/")
            .json(&json!({ "url": "https://example.com" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json::<Value>();
        assert_eq!(body["field"], "alias");
        assert_eq!(body["error"], "Please enter an alias");
        assert!(body["errorId"].is_string());

        let response = server.post("/").json(&json!({ "alias": "ok" })).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json::<Value>();
        assert_eq!(body["field"], "url");
        assert_eq!(body["error"], "Please enter a URL");
    }

    #[tokio::test]
    async fn test_malformed_body_is_json_bad_request() {
        let server = new_server();

        for request in [
            server.post("/").json(&json!({ "url": 42, "alias": "ok" })),
            server.post("/").json(&json!("https://example.com")),
            server.post("/").text("url=https://example.com&alias=ok"),
        ] {
            let response = request.await;
            response.assert_status(StatusCode::BAD_REQUEST);
            let body = response.json::<Value>();
            assert!(body["error"].is_string());
            assert!(body["errorId"].is_string());
            assert!(body.get("field").is_none());
        }

        let listing = server.get("/debug/urls").await.json::<Value>();
        assert_eq!(listing, json!([]));
    }

    #[tokio::test]
    async fn test_url_with_line_break_is_rejected() {
        let server = new_server();

        let response = server
            .post("/")
            .json(&json!({ "url": "https://example.com/a\nb", "alias": "nl" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["field"], "url");

        let response = server.get("/nl").await;
        response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.header("location"), "/");
    }

    #[tokio::test]
    async fn test_home() {
        let server = new_server();
        let response = server.get("/").await;
        response.assert_status_ok();
        assert!(response.text().contains("alias"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_generic_500() {
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_retrieve_url()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        mock_repo
            .expect_list_urls()
            .returning(|| Err(anyhow::anyhow!("connection refused")));
        let (visits, _visit_receiver) = mpsc::channel(1);
        let url_service = new_url_service(Arc::new(mock_repo), visits, "https://sho.rt".to_owned());
        let server = TestServer::new(router(url_service)).unwrap();

        for path in ["/promo", "/debug/urls"] {
            let response = server.get(path).await;
            response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
            let body = response.json::<Value>();
            assert_eq!(body["error"], "Internal server error");
            assert!(body.get("field").is_none());
        }
    }
}
