use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State as AxumState,
    },
    response::IntoResponse,
};
use degendome_types::{Frame, Inbound, Outbound};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Simulator;

pub(super) async fn battle_ws(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_battle_ws(socket, simulator))
}

async fn handle_battle_ws(socket: WebSocket, simulator: Arc<Simulator>) {
    tracing::info!("Battle WebSocket connected");
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(msg).await.is_err() {
                tracing::warn!("Failed to send reply, client disconnected");
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let event = match Frame::decode(&text).and_then(|frame| Outbound::from_frame(&frame)) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "invalid inbound frame");
                        continue;
                    }
                };
                let is_bet = matches!(event, Outbound::PlaceBet { .. });
                let Some(reply) = simulator.handle(event) else {
                    continue;
                };
                let delay = simulator.config.bet_delay;
                if is_bet && matches!(reply, Inbound::BetPlaced(_)) && !delay.is_zero() {
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        enqueue(&out_tx, &reply);
                    });
                } else if !enqueue(&out_tx, &reply) {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = out_tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Client closed WebSocket connection");
                break;
            }
            Ok(_) => {} // Ignore other message types
            Err(e) => {
                tracing::warn!("WebSocket error: {:?}", e);
                break;
            }
        }
    }

    tracing::info!("Battle WebSocket handler exiting");
    drop(out_tx);
    let _ = writer_handle.await;
}

/// Encode `reply` and queue it for the writer. Returns false once the writer
/// has gone away.
fn enqueue(out_tx: &mpsc::UnboundedSender<Message>, reply: &Inbound) -> bool {
    let text = match reply.to_frame().and_then(|frame| frame.encode()) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode reply");
            return true;
        }
    };
    out_tx.send(Message::Text(text)).is_ok()
}
