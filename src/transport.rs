//! WebSocket transport seam.
//!
//! The relay supervisor only ever sees framed text messages, so the
//! transport boils down to a sink/stream pair per connection. The seam is a
//! trait so tests (and embedders with their own socket stack) can inject a
//! different implementation; [`WebSocketTransport`] is the tokio-tungstenite
//! default.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,
}

type Result<T> = std::result::Result<T, TransportError>;

/// Outbound half of one connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: &str) -> Result<()>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Inbound half of one connection. The stream ending means the socket
/// closed; an `Err` item means it broke.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Connection factory injected into the client at construction.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, FrameStream)>;
}

/// Default transport: tokio-tungstenite over TCP/TLS.
#[derive(Debug, Default)]
pub struct WebSocketTransport;

struct WebSocketSink {
    inner: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: &str) -> Result<()> {
        self.inner
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        // Best effort: the peer may already be gone.
        let _ = self.inner.send(Message::Close(Some(frame))).await;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, FrameStream)> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = ws.split();

        let frames: FrameStream = stream
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(_)) => {
                        tracing::warn!("unexpected binary frame, dropping");
                        None
                    }
                    // Ping/pong are transport liveness, close ends the
                    // stream by itself.
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
                }
            })
            .boxed();

        Ok((Box::new(WebSocketSink { inner: sink }), frames))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-process transport for supervisor and client tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;

    /// One accepted connection: everything the client sent, a handle to
    /// push relay frames, and the close frame if the client closed.
    pub(crate) struct MockConnection {
        pub url: String,
        sent: Mutex<Vec<String>>,
        inbound: Mutex<Option<mpsc::UnboundedSender<Result<String>>>>,
        closed: Mutex<Option<(u16, String)>>,
    }

    impl MockConnection {
        /// Frames the client wrote, in order.
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        /// Push a relay → client text frame.
        pub fn push(&self, frame: impl Into<String>) {
            if let Some(tx) = self.inbound.lock().as_ref() {
                let _ = tx.send(Ok(frame.into()));
            }
        }

        /// Sever the connection from the relay side: the frame stream ends.
        pub fn drop_from_server(&self) {
            self.inbound.lock().take();
        }

        /// Close frame received from the client, if any.
        pub fn close_frame(&self) -> Option<(u16, String)> {
            self.closed.lock().clone()
        }
    }

    pub(crate) struct MockTransport {
        connections: Mutex<Vec<Arc<MockConnection>>>,
        fail_connects: AtomicBool,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                connections: Mutex::new(Vec::new()),
                fail_connects: AtomicBool::new(false),
            })
        }

        pub fn set_fail_connects(&self, fail: bool) {
            self.fail_connects.store(fail, Ordering::SeqCst);
        }

        pub fn connection_count(&self) -> usize {
            self.connections.lock().len()
        }

        pub fn connection(&self, index: usize) -> Arc<MockConnection> {
            self.connections.lock()[index].clone()
        }

        pub fn last_connection(&self) -> Arc<MockConnection> {
            self.connections.lock().last().expect("no connections").clone()
        }
    }

    struct MockSink {
        conn: Arc<MockConnection>,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send(&mut self, text: &str) -> Result<()> {
            if self.conn.inbound.lock().is_none() {
                return Err(TransportError::Closed);
            }
            self.conn.sent.lock().push(text.to_owned());
            Ok(())
        }

        async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
            *self.conn.closed.lock() = Some((code, reason.to_owned()));
            self.conn.inbound.lock().take();
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, FrameStream)> {
            if self.fail_connects.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("scripted failure".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = Arc::new(MockConnection {
                url: url.to_string(),
                sent: Mutex::new(Vec::new()),
                inbound: Mutex::new(Some(tx)),
                closed: Mutex::new(None),
            });
            self.connections.lock().push(conn.clone());
            let stream: FrameStream = UnboundedReceiverStream::new(rx).boxed();
            Ok((Box::new(MockSink { conn }), stream))
        }
    }
}
