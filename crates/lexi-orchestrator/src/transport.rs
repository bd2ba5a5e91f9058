//! Message transport between a session and its client.
//!
//! The session only sees classified [`ClientFrame`]s and typed
//! [`ServerMessage`]s. [`WsTransport`] adapts an axum WebSocket; tests use
//! the channel transport in [`crate::testing`].

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use tracing::{debug, warn};

use crate::error::{LexiError, Result};
use crate::protocol::{ClientFrame, ServerMessage};

/// Bidirectional, message-oriented connection to one client.
#[async_trait]
pub trait Transport: Send {
    /// Waits for the next client frame. `None` means the client went away.
    ///
    /// Must be cancel-safe: the session races it against termination.
    async fn recv(&mut self) -> Option<Result<ClientFrame>>;

    /// Sends one message.
    async fn send(&mut self, message: &ServerMessage) -> Result<()>;

    /// Closes the connection from the server side.
    async fn close(&mut self);
}

/// [`Transport`] over an axum WebSocket.
#[derive(Debug)]
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    /// Wraps an upgraded socket.
    #[must_use]
    pub const fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<ClientFrame>> {
        loop {
            match self.socket.recv().await? {
                Ok(Message::Text(text)) => return Some(Ok(ClientFrame::from_text(&text))),
                Ok(Message::Binary(bytes)) => return Some(Ok(ClientFrame::Binary(bytes))),
                Ok(Message::Ping(data)) => {
                    if self.socket.send(Message::Pong(data)).await.is_err() {
                        debug!("Failed to send pong, client disconnected");
                        return None;
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    debug!("Client requested close");
                    return None;
                }
                Err(e) => return Some(Err(LexiError::transport(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.socket
            .send(Message::Text(json))
            .await
            .map_err(|e| LexiError::transport(e.to_string()))
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: axum::extract::ws::close_code::NORMAL,
            reason: "assessment session ended".into(),
        };
        if let Err(e) = self.socket.send(Message::Close(Some(frame))).await {
            warn!(error = %e, "Failed to send close frame");
        }
    }
}
