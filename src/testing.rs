//! Scripted WebSocket peer used by socket-level tests.
//!
//! Binds an ephemeral localhost port, accepts exactly one client and lets the
//! test play the game server's side by hand.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::network::{close_frame, CloseReason};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Listening side, before the client connected.
pub(crate) struct TestServer {
    url: String,
    accepted: oneshot::Receiver<WebSocketStream<TcpStream>>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    let _ = tx.send(ws);
                }
            }
        });

        Self {
            url: format!("ws://{}", addr),
            accepted: rx,
        }
    }

    pub(crate) fn url(&self) -> String {
        self.url.clone()
    }

    pub(crate) async fn accept(self) -> Peer {
        let ws = timeout(STEP_TIMEOUT, self.accepted)
            .await
            .expect("client never connected")
            .expect("accept task failed");
        Peer { ws }
    }
}

/// The server end of an accepted connection.
pub(crate) struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    pub(crate) async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub(crate) async fn send_json(&mut self, value: serde_json::Value) {
        self.send_text(&value.to_string()).await;
    }

    async fn next_message(&mut self) -> Option<Message> {
        timeout(STEP_TIMEOUT, self.ws.next())
            .await
            .expect("timed out waiting for the client")
            .and_then(Result::ok)
    }

    /// Next text frame. Panics on anything else.
    pub(crate) async fn recv_text(&mut self) -> String {
        loop {
            match self.next_message().await {
                Some(Message::Text(text)) => return text,
                Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
                other => panic!("expected text from client, got {:?}", other),
            }
        }
    }

    pub(crate) async fn recv_json(&mut self) -> serde_json::Value {
        let text = self.recv_text().await;
        serde_json::from_str(&text).unwrap()
    }

    /// Next frame must be the client's close frame. Panics on text, so this
    /// also proves nothing else was sent first.
    pub(crate) async fn expect_close(&mut self) -> Option<CloseFrame<'static>> {
        loop {
            match self.next_message().await {
                Some(Message::Close(frame)) => {
                    // Push out the close reply tungstenite queued.
                    let _ = self.ws.flush().await;
                    return frame;
                }
                Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
                other => panic!("expected close from client, got {:?}", other),
            }
        }
    }

    /// Close from the server side with one of the agreed reasons.
    pub(crate) async fn close(&mut self, reason: CloseReason, detail: Option<&str>) {
        let _ = self.ws.close(Some(close_frame(reason, detail))).await;
    }

    /// Drop the TCP stream without a close handshake.
    pub(crate) fn drop_abruptly(self) {
        drop(self.ws);
    }
}
