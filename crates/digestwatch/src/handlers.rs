//! HTTP handlers: index page, log stream, health.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderName, header};
use axum::response::{Html, IntoResponse, Json, Response, Sse};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use digestwatch_core::stream::{StreamMode, StreamSession};
use digestwatch_core::util::parse_duration;

use crate::sse;
use crate::state::{AppState, ConnectionGuard};

/// Flushed events buffered between a session and the HTTP body.
const EVENT_BUFFER: usize = 16;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>digestwatch</title></head>
<body>
<h1>digestwatch</h1>
<p>Live monitor log: <a href="/logs">/logs</a> (event stream, optional <code>?heartbeat=15s</code>).</p>
<pre id="log"></pre>
<script>
const log = document.getElementById("log");
const es = new EventSource("/logs");
es.onmessage = (e) => { log.textContent += e.data + "\n"; };
</script>
</body>
</html>
"#;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/logs", get(handle_logs))
        .route("/logs/", get(handle_logs))
        .route("/api/v1/health", get(handle_health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub(crate) async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ============================================================
// Health
// ============================================================

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    mode: StreamMode,
    ring_head: u64,
    subscribers: usize,
    connections: usize,
}

pub(crate) async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: state.hub.mode(),
        ring_head: state.hub.ring().head(),
        subscribers: state.hub.broadcaster().subscriber_count(),
        connections: state.active_connections(),
    })
}

// ============================================================
// Log stream
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogsQuery {
    heartbeat: Option<String>,
}

pub(crate) async fn handle_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
    request: Request,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let requested = query
        .heartbeat
        .as_deref()
        .and_then(|raw| match parse_duration(raw) {
            Ok(period) => Some(period),
            Err(e) => {
                debug!(error = %e, "ignoring heartbeat parameter");
                None
            }
        });

    // Logged before the session exists so the client does not receive its
    // own connect line.
    let guard = ConnectionGuard::new(&state, remote);
    let session = state.hub.open_session(requested);
    let (sink, rx) = sse::channel(EVENT_BUFFER);
    let disconnect = sink.closed();

    tokio::spawn(async move {
        let _guard = guard;
        let heartbeat_ms = session.heartbeat().as_millis() as u64;
        let end = session.run(sink, disconnect).await;
        info!(
            remote = ?remote,
            heartbeat_ms,
            reason = end.as_str(),
            "stream session ended"
        );
    });

    // Heartbeats come from the session itself, so no `KeepAlive` here.
    (
        [
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(sse::events(rx)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use digestwatch_core::stream::{LogLine, LogTee, SessionSettings, StreamHub};

    use super::*;

    const HELLO: &str = "event: hello\ndata: {\"msg\":\"connected\"}\n\n";
    const KEEPALIVE: &str = ": keepalive\n\n";

    fn test_state(mode: StreamMode) -> AppState {
        let settings = SessionSettings {
            min_heartbeat: Duration::from_millis(10),
            ..SessionSettings::default()
        };
        AppState::new(StreamHub::new(64, 16, mode, settings))
    }

    async fn next_chunk(body: &mut Body) -> String {
        let frame = body.frame().await.unwrap().unwrap();
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn index_links_to_stream() {
        let response = router(test_state(StreamMode::Push))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("href=\"/logs\""));
    }

    #[tokio::test]
    async fn health_reports_stream_state() {
        let state = test_state(StreamMode::Poll);
        state.hub.publish(LogLine::from("one"));

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["mode"], "poll");
        assert_eq!(json["ring_head"], 1);
        assert_eq!(json["subscribers"], 0);
    }

    #[tokio::test]
    async fn push_stream_delivers_hello_then_lines() {
        let state = test_state(StreamMode::Push);
        let response = router(state.clone())
            .oneshot(Request::builder().uri("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        let mut body = response.into_body();
        assert_eq!(next_chunk(&mut body).await, HELLO);
        assert_eq!(state.hub.broadcaster().subscriber_count(), 1);
        assert_eq!(state.active_connections(), 1);

        state.hub.publish(LogLine::from("{\"msg\":\"tick\"}"));
        assert_eq!(next_chunk(&mut body).await, "data: {\"msg\":\"tick\"}\n\n");

        drop(body);
        wait_until(|| {
            state.hub.broadcaster().subscriber_count() == 0 && state.active_connections() == 0
        })
        .await;
    }

    #[tokio::test]
    async fn client_does_not_receive_its_own_connect_line() {
        let state = test_state(StreamMode::Push);
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(LogTee::with_echo(state.hub.clone(), std::io::sink))
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let response = router(state.clone())
            .oneshot(Request::builder().uri("/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let mut body = response.into_body();
        assert_eq!(next_chunk(&mut body).await, HELLO);
        assert!(state.hub.ring().head() >= 1);

        state.hub.publish(LogLine::from("marker"));
        assert_eq!(next_chunk(&mut body).await, "data: marker\n\n");
    }

    #[tokio::test]
    async fn heartbeat_parameter_is_honored() {
        let state = test_state(StreamMode::Poll);
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/logs/?heartbeat=20ms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let mut body = response.into_body();
        assert_eq!(next_chunk(&mut body).await, HELLO);
        assert_eq!(next_chunk(&mut body).await, KEEPALIVE);
    }

    #[tokio::test]
    async fn invalid_heartbeat_falls_back_to_default() {
        let state = test_state(StreamMode::Push);
        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/logs?heartbeat=soon")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        assert_eq!(next_chunk(&mut body).await, HELLO);
        state.hub.publish(LogLine::from("after"));
        // With the 15s default no keepalive can come first.
        assert_eq!(next_chunk(&mut body).await, "data: after\n\n");
    }
}
