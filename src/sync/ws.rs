use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, warn};

use crate::state::AppState;
use crate::sync::hub::SyncHub;
use crate::sync::protocol::ClientEvent;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: Arc<SyncHub>, socket: WebSocket) {
    let (client, mut outbox) = hub.connect();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(event) => hub.handle(client, event),
                            Err(err) => {
                                debug!("malformed event from {}: {}", client, err);
                                hub.send_error(client, format!("Malformed event: {}", err));
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        hub.send_error(client, "Binary frames are not supported");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!("websocket error on {}: {}", client, err);
                        break;
                    }
                }
            }
            out = outbox.recv() => {
                // None: the session was swept
                let Some(event) = out else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        error!("failed to encode server event: {}", err);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
    hub.disconnect(client);
}
