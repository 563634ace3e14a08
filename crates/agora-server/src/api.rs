use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use agora_hub::Hub;
use agora_shared::protocol::{ChatPayload, ServerEvent};
use agora_shared::Handle;
use agora_store::DirectoryEntry;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/notifications", get(unread_notifications))
        .route("/api/notifications/clear", post(clear_notifications))
        .route("/api/messages", get(message_history))
        .route("/api/users", get(user_directory))
        .route("/api/users/announce", post(announce_user))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
}

#[derive(Deserialize)]
struct NicknameQuery {
    nickname: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    nickname: Option<String>,
    #[serde(rename = "otherUser")]
    other_user: Option<String>,
    offset: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct ClearRequest {
    receiver: String,
    sender: String,
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: usize,
}

#[derive(Deserialize)]
struct AnnounceRequest {
    nickname: String,
}

#[derive(Serialize)]
struct AnnounceResponse {
    delivered: usize,
}

fn require_handle(raw: Option<&str>, field: &str) -> Result<Handle, ServerError> {
    raw.and_then(|raw| Handle::new(raw).ok())
        .ok_or_else(|| ServerError::BadRequest(format!("Missing {field}")))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: state.hub.registry().len().await,
    })
}

/// Unread notifications for `nickname`, newest first, in the same shape as
/// the frames pushed over the socket.
async fn unread_notifications(
    State(state): State<AppState>,
    Query(params): Query<NicknameQuery>,
) -> Result<Json<Vec<ServerEvent>>, ServerError> {
    let recipient = require_handle(params.nickname.as_deref(), "nickname")?;
    let unread = state.hub.notifications().unread_for(&recipient).await?;

    Ok(Json(
        unread
            .into_iter()
            .map(|record| ServerEvent::Notification {
                sender: record.sender,
                id: Some(record.id),
            })
            .collect(),
    ))
}

/// Drop every notification from `sender` to `receiver`; the client calls
/// this when it opens the conversation.
async fn clear_notifications(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<ClearResponse>, ServerError> {
    let receiver = require_handle(Some(&req.receiver), "receiver")?;
    let sender = require_handle(Some(&req.sender), "sender")?;

    let cleared = state.hub.notifications().clear(&receiver, &sender).await?;
    info!(receiver = %receiver, sender = %sender, cleared, "Notifications cleared");
    Ok(Json(ClearResponse { cleared }))
}

async fn message_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatPayload>>, ServerError> {
    let me = require_handle(params.nickname.as_deref(), "nickname")?;
    let other = require_handle(params.other_user.as_deref(), "otherUser")?;

    let page = state
        .hub
        .history(&me, &other, params.offset.unwrap_or(0), params.limit)
        .await?;
    Ok(Json(page))
}

async fn user_directory(
    State(state): State<AppState>,
    Query(params): Query<NicknameQuery>,
) -> Result<Json<Vec<DirectoryEntry>>, ServerError> {
    let viewer = require_handle(params.nickname.as_deref(), "nickname")?;
    Ok(Json(state.hub.directory(&viewer).await?))
}

/// Called by the registration flow once the user row exists.
async fn announce_user(
    State(state): State<AppState>,
    Json(req): Json<AnnounceRequest>,
) -> Result<Json<AnnounceResponse>, ServerError> {
    let handle = require_handle(Some(&req.nickname), "nickname")?;
    let delivery = state.hub.announce_registration(&handle).await?;
    Ok(Json(AnnounceResponse {
        delivered: delivery.delivered,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use agora_hub::HubConfig;
    use agora_shared::Identity;
    use agora_store::SqliteGateway;

    use super::*;

    fn handle(raw: &str) -> Handle {
        Handle::new(raw).unwrap()
    }

    fn test_app(nicks: &[&str]) -> (Router, Arc<SqliteGateway>) {
        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        {
            let db = gateway.db().unwrap();
            for nick in nicks {
                db.create_user(&Identity::new(handle(nick), *nick, "Test")).unwrap();
            }
        }
        let state = AppState {
            hub: Hub::new(gateway.clone(), HubConfig::default()),
            config: Arc::new(ServerConfig::default()),
        };
        (build_router(state), gateway)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app(&[]);
        let (status, body) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_notifications_query_and_clear() {
        let (app, gateway) = test_app(&["alice", "bob"]);
        {
            let db = gateway.db().unwrap();
            db.create_notification(&handle("bob"), &handle("alice")).unwrap();
        }

        let (status, body) = send(app.clone(), get("/api/notifications?nickname=bob")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["type"], "notification");
        assert_eq!(body[0]["sender"], "alice");

        let (status, body) = send(
            app.clone(),
            post_json(
                "/api/notifications/clear",
                serde_json::json!({ "receiver": "bob", "sender": "alice" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], 1);

        let (_, body) = send(app, get("/api/notifications?nickname=bob")).await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_missing_nickname_is_bad_request() {
        let (app, _) = test_app(&["alice"]);
        let (status, body) = send(app, get("/api/notifications")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("nickname"));
    }

    #[tokio::test]
    async fn test_message_history_page() {
        let (app, gateway) = test_app(&["alice", "bob"]);
        {
            let db = gateway.db().unwrap();
            let now = chrono::Utc::now();
            for i in 0..3 {
                db.append_chat_message(
                    &handle("alice"),
                    agora_store::Recipient::User(&handle("bob")),
                    &format!("m{i}"),
                    now + chrono::Duration::seconds(i),
                )
                .unwrap();
            }
        }

        let (status, body) = send(
            app,
            get("/api/messages?nickname=bob&otherUser=alice&offset=0&limit=2"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let contents: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_directory_and_unknown_announce() {
        let (app, _) = test_app(&["alice", "bob"]);

        let (status, body) = send(app.clone(), get("/api/users?nickname=alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["nickname"], "bob");
        assert_eq!(body[0]["isOnline"], false);

        let (status, _) = send(
            app,
            post_json("/api/users/announce", serde_json::json!({ "nickname": "ghost" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
