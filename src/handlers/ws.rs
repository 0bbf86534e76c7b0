use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::services::TransactionEvent;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    /// Only forward events where this bank is on either side.
    pub bank_code: Option<String>,
}

impl EventStreamQuery {
    fn matches(&self, event: &TransactionEvent) -> bool {
        match &self.bank_code {
            Some(code) => event.payer_bank_code == *code || event.payee_bank_code == *code,
            None => true,
        }
    }
}

/// Upgrades to a socket streaming terminal lifecycle events as JSON text frames.
pub async fn transaction_events(
    ws: WebSocketUpgrade,
    Query(filter): Query<EventStreamQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: EventStreamQuery) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => {
                    tracing::debug!("event stream client closed connection");
                    break;
                }
                Message::Text(text) => {
                    tracing::trace!(%text, "ignoring client frame on event stream");
                }
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat_interval = tokio::time::interval(tokio::time::Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if !filter.matches(&event) {
                                continue;
                            }
                            let json = match serde_json::to_string(&event) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!(error = %e, "failed to serialize lifecycle event");
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event stream subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    tracing::debug!("event stream connection closed");
}
