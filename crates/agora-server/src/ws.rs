use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use agora_hub::{lifecycle, HubError};
use agora_shared::constants::MAX_FRAME_SIZE;

use crate::api::AppState;

/// Close code sent when the handshake named no user we know.
const CLOSE_UNKNOWN_IDENTITY: u16 = 4004;

#[derive(Deserialize)]
pub struct WsQuery {
    nickname: Option<String>,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let nickname = match query.nickname {
        Some(nick) if !nick.trim().is_empty() => nick,
        _ => {
            debug!("WebSocket upgrade without nickname");
            return (StatusCode::UNAUTHORIZED, "Missing nickname").into_response();
        }
    };

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, nickname))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, nickname: String) {
    let hub = state.hub;

    let session = match hub.connect(&nickname).await {
        Ok(session) => session,
        Err(e) => {
            let code = match e {
                HubError::AuthenticationMissing | HubError::UnknownIdentity(_) => {
                    info!(nickname = %nickname, error = %e, "Rejected WebSocket connection");
                    CLOSE_UNKNOWN_IDENTITY
                }
                _ => {
                    warn!(nickname = %nickname, error = %e, "Failed to open session");
                    close_code::ERROR
                }
            };
            let frame = CloseFrame {
                code,
                reason: e.to_string().into(),
            };
            if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                debug!(nickname = %nickname, error = %e, "Failed to send close frame");
            }
            return;
        }
    };

    let (sink, stream) = socket.split();

    let writer = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));

    let reader = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                // Pings are answered by the transport; binary frames carry nothing for us.
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    lifecycle::run_session(hub, session, reader, writer).await;
}
