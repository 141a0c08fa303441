//! Per-connection WebSocket handling
//!
//! Each upgraded socket gets one writer task fed by a bounded queue, so every
//! outbound frame goes through a single sink, and one session controller that
//! consumes the decoded inbound frames.

use crate::session::{run_session, SessionContext};
use crate::signaling::protocol::{Envelope, SignalMessage};
use crate::{Error, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upgrade `/signal` requests and hand the socket to a new session
pub async fn signal_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<SessionContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<SessionContext>) {
    info!("New signaling connection");

    let (ws_tx, ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<SignalMessage>(ctx.config.outbound_queue_size);
    let writer = spawn_writer(ws_tx, rx);

    let inbound = ws_rx
        .filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(decode_frame(&text)),
                Ok(Message::Close(_)) => {
                    debug!("Client sent close frame");
                    None
                }
                // Pings are answered by axum itself
                Ok(_) => None,
                Err(e) => Some(Err(Error::Transport(e.to_string()))),
            }
        })
        .boxed();

    match run_session(&ctx, inbound, tx).await {
        Ok(final_state) => debug!("Session finished in state {}", final_state),
        Err(e) => error!("Failed to create session: {}", e),
    }

    // The controller dropped the last sender; let queued frames drain
    let grace = ctx.config.teardown_grace();
    let abort = writer.abort_handle();
    if tokio::time::timeout(grace, writer).await.is_err() {
        warn!("Signaling writer did not drain within {:?}", grace);
        abort.abort();
    }

    info!("Signaling connection closed");
}

fn decode_frame(text: &str) -> Result<Envelope> {
    let envelope = SignalMessage::decode(text)?;
    debug!("Received {} message", envelope.message.kind());
    Ok(envelope)
}

fn spawn_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<SignalMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {} message: {}", message.kind(), e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    })
}
