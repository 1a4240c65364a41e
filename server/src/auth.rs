//! HTTP Basic auth for mutating routes, mirroring `_is_authorized_request`
//! in the original: short-circuits to "allow" when no credentials are
//! configured at all.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::state::AppState;

pub async fn require_basic_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(cfg) = &state.auth else {
        return next.run(req).await;
    };

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| BASE64.decode(b64).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|decoded| decoded.split_once(':').map(|(u, p)| (u.to_string(), p.to_string())))
        .is_some_and(|(user, pass)| user == cfg.user && pass == cfg.pass);

    if authorized {
        return next.run(req).await;
    }

    let mut resp = StatusCode::UNAUTHORIZED.into_response();
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"runnerd\""),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BasicAuthConfig;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn router(auth: Option<BasicAuthConfig>) -> Router {
        let state = AppState {
            broker: runner_core::Broker::new(10, 10),
            supervisor: runner_core::Supervisor::new(
                runner_core::Broker::new(10, 10),
                std::sync::Arc::new(test_notifier()),
                std::env::temp_dir(),
                std::sync::Arc::new(runner_core::NullStatusSink),
            ),
            sequencer: runner_core::Sequencer::new(
                runner_core::Supervisor::new(
                    runner_core::Broker::new(10, 10),
                    std::sync::Arc::new(test_notifier()),
                    std::env::temp_dir(),
                    std::sync::Arc::new(runner_core::NullStatusSink),
                ),
                runner_core::Broker::new(10, 10),
            ),
            store: std::sync::Arc::new(test_store()),
            transport: std::sync::Arc::new(transport::PushoverTransport::with_endpoint("http://127.0.0.1:1")),
            log_dir: std::env::temp_dir(),
            auth,
        };
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth))
            .with_state(state)
    }

    fn test_store() -> store::SqliteStore {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.into_path().join("auth-test.db");
        store::SqliteStore::open(&path, store::Envelope::none()).expect("open store")
    }

    fn test_notifier() -> runner_core::Notifier {
        struct NoopTransport;
        #[async_trait::async_trait]
        impl runner_core::NotificationTransport for NoopTransport {
            async fn send(&self, _u: &str, _t: &str, _ti: &str, _m: &str) -> Result<(), runner_core::TransportError> {
                Ok(())
            }
        }
        struct NoopDirectory;
        #[async_trait::async_trait]
        impl runner_core::NotifyProfileDirectory for NoopDirectory {
            async fn lookup(&self, _id: &str) -> Option<runner_core::NotifyProfileView> {
                None
            }
            async fn record_delivery(&self, _id: &str, _success: bool) -> runner_core::notifier::DeliveryCountersUpdate {
                runner_core::notifier::DeliveryCountersUpdate {
                    failure_count: 0,
                    sent_count: 0,
                    active: true,
                    just_auto_disabled: false,
                }
            }
        }
        struct NoopJournal;
        #[async_trait::async_trait]
        impl runner_core::JournalSink for NoopJournal {
            async fn record(&self, _row: runner_core::JournalRow) {}
        }
        runner_core::Notifier::new(
            runner_core::Broker::new(10, 10),
            std::sync::Arc::new(NoopTransport),
            std::sync::Arc::new(NoopDirectory),
            std::sync::Arc::new(NoopJournal),
        )
    }

    #[tokio::test]
    async fn no_credentials_configured_allows_unauthenticated_requests() {
        let app = router(None);
        let resp = app
            .oneshot(Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_rejected_when_credentials_configured() {
        let app = router(Some(BasicAuthConfig { user: "u".to_string(), pass: "p".to_string() }));
        let resp = app
            .oneshot(Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_header_is_accepted() {
        let app = router(Some(BasicAuthConfig { user: "u".to_string(), pass: "p".to_string() }));
        let credentials = BASE64.encode("u:p");
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
