//! WebSocket endpoint: one logical real-time channel per connection.
//!
//! Each accepted socket gets a bounded outbox drained by a writer task;
//! events emitted to the connection are delivered in emission order, with no
//! acknowledgement or retry. The read loop decodes client events and hands
//! them to the delivery router.

pub mod delivery;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::events::{ClientEvent, ServerEvent};
use crate::state::AppState;

use delivery::ConnectionContext;

/// Create the WebSocket routes
pub fn create_websocket_routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_handler))
}

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: String,
}

/// Verify the connection's identity, then upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketQuery>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    let identity = state
        .verifier()
        .verify(&params.token)
        .map_err(|error| {
            warn!(%error, "rejected websocket connection");
            StatusCode::UNAUTHORIZED
        })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: String) {
    let (mut ws_sender, mut receiver) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(state.channel().outbox_capacity);
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(error) => {
                    warn!(%error, "failed to encode server event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnectionContext::new(identity);

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(GatewayError::ChannelClosed) =
                        delivery::handle_client_event(event, &out_tx, &state, &mut ctx).await
                    {
                        break;
                    }
                }
                Err(error) => {
                    debug!(identity = %ctx.identity(), %error, "failed to parse client event");
                    let event = ServerEvent::Error {
                        message: "invalid event format".to_string(),
                    };
                    if out_tx.send(event).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Close(_)) => break,
            Err(error) => {
                debug!(identity = %ctx.identity(), %error, "websocket receive error");
                break;
            }
            // ping/pong/binary
            _ => {}
        }
    }

    delivery::handle_disconnect(&state, &ctx);
    drop(out_tx);
    let _ = writer.await;

    info!(identity = %ctx.identity(), "connection closed");
}
