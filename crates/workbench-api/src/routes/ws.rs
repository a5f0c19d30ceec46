//! `/ws/updates`: the event stream.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};
use workbench_engine::Context;

pub async fn updates(ws: WebSocketUpgrade, State(ctx): State<Context>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: Context) {
    let (mut sender, mut receiver) = socket.split();
    let mut sub = ctx.bus.subscribe(Some(ctx.hello()));
    let session = sub.id;
    info!(%session, sessions = ctx.bus.session_count(), "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = sub.frames.recv().await {
            if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are not part of the protocol; only close matters.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
            debug!("Ignoring inbound websocket frame");
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.bus.unsubscribe(session);
    info!(%session, "WebSocket client disconnected");
}
