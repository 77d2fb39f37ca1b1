use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use feed::protocol::parse_interest_request;
use feed::{Connection, FeedMessage};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use types::errors::DeliveryError;
use types::ids::ConnectionId;

/// Frames buffered per client before deliveries are skipped.
const OUTBOUND_BUFFER: usize = 256;

/// One WebSocket session as seen by the feed engine.
///
/// Sends never await the socket: frames go into a bounded channel drained by
/// the session's writer task, so a slow client cannot stall a flush.
pub struct WsConnection {
    tx: mpsc::Sender<Message>,
    live: AtomicBool,
}

impl WsConnection {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            tx,
            live: AtomicBool::new(true),
        }
    }

    pub fn mark_closed(&self) {
        self.live.store(false, Ordering::Release);
    }

    fn push(&self, text: String) -> Result<(), DeliveryError> {
        self.tx
            .try_send(Message::Text(text.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::BufferFull,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Tell the client its last frame was rejected.
    pub fn reject(&self, reason: &str) -> Result<(), DeliveryError> {
        self.push(json!({ "error": reason }).to_string())
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn send(&self, message: FeedMessage) -> Result<(), DeliveryError> {
        if !self.is_live() {
            return Err(DeliveryError::Closed);
        }
        let text =
            serde_json::to_string(&message).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        self.push(text)
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let connection = Arc::new(WsConnection::new(tx));
    // Dropping the guard on any exit path below unregisters the session.
    let guard = match state.engine.connect(connection.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            warn!(error = %e, "Refusing WebSocket session");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let id = guard.id();
    info!(connection_id = %id, "Client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_interest(&state, id, &connection, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %id, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut send_task => {
                debug!(connection_id = %id, "Writer stopped");
                break;
            }
        }
    }

    connection.mark_closed();
    send_task.abort();
    drop(guard);

    info!(connection_id = %id, "Client disconnected");
}

/// Apply one interest declaration. Invalid frames are answered and leave the
/// current interest set untouched.
fn handle_interest(state: &AppState, id: ConnectionId, connection: &WsConnection, text: &str) {
    let request = match parse_interest_request(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(connection_id = %id, error = %e, "Rejected interest frame");
            let _ = connection.reject("invalid interest request");
            return;
        }
    };

    if request.keys.len() > state.max_interest_keys {
        debug!(
            connection_id = %id,
            keys = request.keys.len(),
            limit = state.max_interest_keys,
            "Interest declaration too large"
        );
        let _ = connection.reject(&format!(
            "too many keys: limit is {}",
            state.max_interest_keys
        ));
        return;
    }

    let keys = request.into_key_set();
    let count = keys.len();
    if state.engine.set_interest(id, keys) {
        debug!(connection_id = %id, keys = count, "Interest updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::record::{RawRecord, RecordKey};

    fn text(msg: Message) -> String {
        match msg {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    async fn next_json(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        serde_json::from_str(&text(rx.recv().await.unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_send_serializes_batch() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = WsConnection::new(tx);

        let record = RawRecord {
            price: Some(1.7),
            ..RawRecord::default()
        }
        .normalize(RecordKey::new("0xAAA"));
        conn.send(FeedMessage::Batch {
            updates: vec![record],
        })
        .await
        .unwrap();

        let value = next_json(&mut rx).await;
        assert_eq!(value["updates"][0]["address"], "0xaaa");
        assert_eq!(value["updates"][0]["price"], 1.7);
    }

    #[tokio::test]
    async fn test_full_buffer_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = WsConnection::new(tx);

        conn.send(FeedMessage::Heartbeat { timestamp: 1 }).await.unwrap();
        assert_eq!(
            conn.send(FeedMessage::Heartbeat { timestamp: 2 }).await,
            Err(DeliveryError::BufferFull)
        );
        assert!(conn.is_live());
    }

    #[tokio::test]
    async fn test_closed_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let conn = WsConnection::new(tx);
        drop(rx);

        assert!(!conn.is_live());
        assert_eq!(
            conn.send(FeedMessage::Heartbeat { timestamp: 1 }).await,
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn test_mark_closed() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = WsConnection::new(tx);
        conn.mark_closed();
        assert!(!conn.is_live());
    }

    #[tokio::test]
    async fn test_interest_declarations() {
        let store = Arc::new(feed::MemoryStore::new());
        let (engine, _task) = feed::FeedEngine::start(store.clone(), Default::default())
            .await
            .unwrap();
        let state = AppState::new(Arc::new(engine), store, 2);

        let (tx, mut rx) = mpsc::channel(4);
        let conn = Arc::new(WsConnection::new(tx));
        let guard = state.engine.connect(conn.clone()).unwrap();
        let id = guard.id();

        handle_interest(&state, id, &conn, r#"{"keys": ["0xA", "0xb"]}"#);
        assert_eq!(state.engine.interested_keys(&id).len(), 2);

        // Over the limit: rejected, previous set kept
        handle_interest(&state, id, &conn, r#"{"keys": ["0xa", "0xb", "0xc"]}"#);
        let value = next_json(&mut rx).await;
        assert!(value["error"].as_str().unwrap().contains("limit is 2"));
        assert!(state.engine.interested_keys(&id).contains(&RecordKey::new("0xa")));

        handle_interest(&state, id, &conn, "subscribe:0xa");
        let value = next_json(&mut rx).await;
        assert_eq!(value["error"], "invalid interest request");
        assert_eq!(state.engine.interested_keys(&id).len(), 2);

        handle_interest(&state, id, &conn, r#"{"keys": []}"#);
        assert!(state.engine.interested_keys(&id).is_empty());
    }

    #[tokio::test]
    async fn test_reject_payload() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = WsConnection::new(tx);
        conn.reject("invalid interest request").unwrap();

        let value = next_json(&mut rx).await;
        assert_eq!(value["error"], "invalid interest request");
    }
}
