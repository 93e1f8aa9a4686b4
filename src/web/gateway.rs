use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::models::LinkRole;
use crate::web::protocol::{ClientCommand, ErrorReply, LinkSpec, ServerEvent};
use crate::web::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscriber connection: a writer task owns the sink, a forwarder
/// shovels bus events into it, and this task handles inbound commands.
/// A send failure tears down this connection and nobody else.
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("dashboard client connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let forward_tx = out_tx.clone();
    let mut bus_rx = state.events.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if forward_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "slow subscriber, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => handle_command(&state, command, &out_tx).await,
                Err(err) => debug!(%err, "dropping malformed client frame"),
            },
            Message::Close(_) => break,
            // Pings are answered by axum itself; binary frames are noise.
            _ => {}
        }
    }

    writer.abort();
    forwarder.abort();
    info!("dashboard client disconnected");
}

/// Apply one inbound command to the registry and fan the resulting events
/// out. Rejections go back to the originating connection only.
pub async fn handle_command(state: &AppState, command: ClientCommand, replies: &mpsc::Sender<Message>) {
    match command {
        ClientCommand::Add { url, competitor_id } => {
            let role = LinkRole::from(competitor_id);
            match state.registry.add(&url, role).await {
                Ok(link) => {
                    // A fresh add resets diffing so the first extraction
                    // counts as a first observation.
                    state.prices.invalidate(&link.url).await;
                    state.events.publish(ServerEvent::link_added(link.url, role));
                    state.scanner.spawn_cycle();
                }
                Err(err) if err.is_rejection() => {
                    send_error(replies, err.to_string()).await;
                }
                Err(err) => {
                    error!(%err, url, "add command failed");
                    send_error(replies, "internal error".to_string()).await;
                }
            }
        }

        ClientCommand::Remove { url } => match state.registry.remove(&url).await {
            Ok(true) => {
                state.prices.invalidate(&url).await;
                state.events.publish(ServerEvent::link_removed(url));
            }
            Ok(false) => debug!(url, "remove for unknown url ignored"),
            Err(err) => error!(%err, url, "remove command failed"),
        },

        ClientCommand::UpdateLinks { links } => {
            let pairs = links.into_iter().map(LinkSpec::into_parts).collect();
            match state.registry.replace_all(pairs).await {
                Ok((added, removed)) => {
                    // Wholesale replacement restarts diffing from scratch.
                    state.prices.clear().await;
                    for url in removed {
                        state.events.publish(ServerEvent::link_removed(url));
                    }
                    for link in added {
                        state.events.publish(ServerEvent::link_added(link.url, link.role));
                    }
                    state.scanner.spawn_cycle();
                }
                Err(err) => {
                    error!(%err, "updateLinks command failed");
                    send_error(replies, "internal error".to_string()).await;
                }
            }
        }
    }
}

async fn send_error(replies: &mpsc::Sender<Message>, error: String) {
    let reply = ErrorReply { error };
    let Ok(text) = serde_json::to_string(&reply) else {
        return;
    };
    // The connection may already be gone; that is fine.
    let _ = replies.send(Message::Text(text)).await;
}
