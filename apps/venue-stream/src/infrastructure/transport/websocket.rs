//! WebSocket Transport
//!
//! [`Transport`] over `tokio-tungstenite`. `open` performs the handshake and
//! splits the socket into a reader task feeding the event channel and a
//! writer task draining an unbounded queue, so `send` never blocks.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Frame, Transport, TransportError, TransportEvent, TransportEvents};

const INBOUND_BUFFER: usize = 1024;

#[derive(Debug)]
struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

/// WebSocket client transport for one URL.
#[derive(Debug)]
pub struct WebSocketTransport {
    url: String,
    session: Mutex<Option<Session>>,
}

impl WebSocketTransport {
    /// Create a transport for `url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: Mutex::new(None),
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping => Message::Ping(Vec::new().into()),
        Frame::Pong => Message::Pong(Vec::new().into()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<TransportEvents, TransportError> {
        tracing::info!(url = %self.url, "Connecting to venue stream");

        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::channel(INBOUND_BUFFER);
        let cancel = CancellationToken::new();

        let previous = self.session.lock().replace(Session {
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        let writer_cancel = cancel.clone();
        let writer_events = events_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = write.send(message).await {
                            let _ = writer_events
                                .send(TransportEvent::Error(TransportError::Socket(e.to_string())))
                                .await;
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let frame = Frame::Text(text.as_str().to_owned());
                            if events_tx.send(TransportEvent::Message(frame)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            let frame = Frame::Binary(bytes.to_vec());
                            if events_tx.send(TransportEvent::Message(frame)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            let _ = events_tx.send(TransportEvent::Message(Frame::Pong)).await;
                        }
                        Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Venue sent close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            let _ = events_tx
                                .send(TransportEvent::Error(TransportError::Socket(e.to_string())))
                                .await;
                            break;
                        }
                        None => break,
                    },
                }
            }
            let _ = events_tx.send(TransportEvent::Closed).await;
        });

        Ok(events_rx)
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(TransportError::NotConnected)?;
        session
            .outbound
            .send(to_message(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            tracing::debug!(url = %self.url, "Closing venue stream socket");
            session.cancel.cancel();
        }
    }
}
