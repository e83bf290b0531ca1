use axum::extract::State;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::broadcast;

use crate::LauncherState;
use crate::events::{self, ClientEvent};

/// Upgrades to the bidirectional event channel
pub(super) async fn events_handler(State(state): State<LauncherState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: LauncherState) {
    let (mut sink, mut stream) = socket.split();
    let mut broadcast_rx = state.events.subscribe();
    let mut shutdown_signal = state.shutdown_signal.clone();

    debug!("Event channel client connected");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(ws::Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => events::handle_client_event(&state.activity, event),
                        Err(error) => debug!(%error, "Ignoring unrecognised event payload"),
                    },
                    Some(Ok(ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ping, pong and binary frames are not part of the protocol.
                    Some(Err(error)) => {
                        debug!(%error, "Event channel closed abruptly");
                        break;
                    }
                }
            }
            outgoing = broadcast_rx.recv() => {
                match outgoing {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(error) => {
                                error!(%error, "Failed to serialise server event");
                                continue;
                            }
                        };

                        if sink.send(ws::Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event channel client lagging behind broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            () = shutdown_signal.wait() => break,
        }
    }

    debug!("Event channel client disconnected");
}
