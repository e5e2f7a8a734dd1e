use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use serde::Deserialize;
use time::{macros::format_description, OffsetDateTime};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::batch::{self, BatchJob};
use crate::config::Config;
use crate::provider::namecheap::{Credentials, NamecheapClient};
use crate::provider::DomainResult;

// Results waiting to be written; small so a hung-up client is noticed early.
const RESULT_BUFFER: usize = 4;

pub struct AppState {
    pub config: Config,
    pub namecheap: NamecheapClient,
}

/// Body of `POST /api/update-dns`. Everything is optional here so missing
/// fields get our own 400 instead of a deserialization rejection.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    api_user: Option<String>,
    api_key: Option<String>,
    domains: Option<Vec<String>>,
    nameservers: Option<Vec<String>>,
    client_ip: Option<String>,
}

impl UpdateRequest {
    fn into_job(self) -> Option<BatchJob> {
        let api_user = self.api_user.filter(|v| !v.is_empty())?;
        let api_key = self.api_key.filter(|v| !v.is_empty())?;
        let domains = self.domains.filter(|v| !v.is_empty())?;
        let nameservers = self.nameservers.filter(|v| !v.is_empty())?;
        let client_ip = self.client_ip.filter(|v| !v.is_empty())?;

        Some(BatchJob {
            credentials: Credentials {
                api_user,
                api_key,
                client_ip,
            },
            domains,
            nameservers,
        })
    }
}

pub fn create_router(config: Config) -> Result<Router> {
    let http = reqwest::Client::builder()
        .timeout(config.namecheap.timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let namecheap = NamecheapClient::new(http, config.namecheap.endpoint());
    let static_files = ServeDir::new(&config.server.static_dir);
    let state = Arc::new(AppState { config, namecheap });

    Ok(Router::new()
        .route("/api/update-dns", post(update_dns))
        .route("/health", get(health_check))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(access_log))
        .with_state(state))
}

// Path only: the query string and body may carry API credentials.
async fn access_log(request: Request, next: Next) -> Response {
    let timestamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ))
        .unwrap_or_else(|_| "-".to_string());

    info!(
        target: "access",
        "{} - {} {}",
        timestamp,
        request.method(),
        request.uri().path()
    );

    next.run(request).await
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

async fn update_dns(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        // Without a JSON content type the body is treated as empty.
        Err(JsonRejection::MissingJsonContentType(_)) => {
            warn!("Missing required fields");
            return bad_request("Missing required fields".to_string());
        }
        Err(rejection) => {
            warn!("Rejected update request: {}", rejection.body_text());
            return bad_request(rejection.body_text());
        }
    };

    let Some(job) = request.into_job() else {
        warn!("Missing required fields");
        return bad_request("Missing required fields".to_string());
    };

    info!(
        "Updating nameservers for {} domain(s) to {}",
        job.domains.len(),
        job.nameservers.join(",")
    );

    let (tx, rx) = mpsc::channel(RESULT_BUFFER);
    tokio::spawn(batch::run(
        state.namecheap.clone(),
        job,
        state.config.namecheap.request_delay(),
        tx,
    ));

    // No content length, so hyper sends the body chunked.
    let lines = ReceiverStream::new(rx).map(|result| ndjson_line(&result));
    (
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(lines),
    )
        .into_response()
}

fn ndjson_line(result: &DomainResult) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(result)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": error })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamecheapConfig;
    use axum::http::Method;
    use tower::ServiceExt;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OK_XML: &str = r#"<ApiResponse Status="OK"><Errors/></ApiResponse>"#;

    fn app(server: &MockServer) -> Router {
        let config = Config {
            namecheap: NamecheapConfig {
                endpoint: Some(format!("{}/xml.response", server.uri())),
                request_delay_ms: 0,
                ..NamecheapConfig::default()
            },
            ..Config::default()
        };
        create_router(config).unwrap()
    }

    fn post_json(body: serde_json::Value) -> Request {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/update-dns")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn valid_body() -> serde_json::Value {
        serde_json::json!({
            "apiUser": "u",
            "apiKey": "k",
            "domains": ["example.com", "bad"],
            "nameservers": ["ns1.x.com", "ns2.x.com"],
            "clientIp": "1.2.3.4"
        })
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn streams_one_line_per_domain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("SLD", "example"))
            .and(query_param("TLD", "com"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OK_XML))
            .expect(1)
            .mount(&server)
            .await;

        let response = app(&server).oneshot(post_json(valid_body())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            body_text(response).await,
            concat!(
                r#"{"domain":"example.com","status":"success","message":"Nameservers updated successfully"}"#,
                "\n",
                r#"{"domain":"bad","status":"error","message":"Invalid domain format: bad"}"#,
                "\n",
            )
        );
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_without_upstream_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OK_XML))
            .expect(0)
            .mount(&server)
            .await;

        for field in ["apiUser", "apiKey", "domains", "nameservers", "clientIp"] {
            let mut body = valid_body();
            body.as_object_mut().unwrap().remove(field);

            let response = app(&server).oneshot(post_json(body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "without {}", field);
            assert_eq!(body_text(response).await, r#"{"error":"Missing required fields"}"#);
        }
    }

    #[tokio::test]
    async fn empty_values_are_rejected() {
        let server = MockServer::start().await;

        for (field, value) in [
            ("apiKey", serde_json::json!("")),
            ("domains", serde_json::json!([])),
            ("nameservers", serde_json::json!([])),
        ] {
            let mut body = valid_body();
            body[field] = value;

            let response = app(&server).oneshot(post_json(body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "empty {}", field);
            assert_eq!(body_text(response).await, r#"{"error":"Missing required fields"}"#);
        }
    }

    #[tokio::test]
    async fn body_without_content_type_is_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OK_XML))
            .expect(0)
            .mount(&server)
            .await;
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/update-dns")
            .body(Body::from(valid_body().to_string()))
            .unwrap();

        let response = app(&server).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, r#"{"error":"Missing required fields"}"#);
    }

    #[tokio::test]
    async fn malformed_json_is_a_json_400() {
        let server = MockServer::start().await;
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/update-dns")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app(&server).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn upstream_failures_stay_in_the_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ApiResponse Status="ERROR"><Errors><Error Number="2019166">Domain not found</Error></Errors></ApiResponse>"#,
            ))
            .expect(2)
            .mount(&server)
            .await;

        let mut body = valid_body();
        body["domains"] = serde_json::json!(["one.com", "two.com"]);

        let response = app(&server).oneshot(post_json(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let lines: Vec<DomainResultLine> = body_text(response)
            .await
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].domain, "one.com");
        assert_eq!(lines[1].domain, "two.com");
        assert!(lines.iter().all(|l| l.status == "error" && l.message == "Domain not found"));
    }

    #[derive(Deserialize)]
    struct DomainResultLine {
        domain: String,
        status: String,
        message: String,
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let server = MockServer::start().await;
        let request = axum::http::Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://elsewhere.example")
            .body(Body::empty())
            .unwrap();

        let response = app(&server).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body_text(response).await, r#"{"status":"ok"}"#);
    }
}
