use axum::extract::ws::{Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;

/// Write half of a peer connection. Each item is one binary message.
pub type Outbound = Pin<Box<dyn Sink<Vec<u8>, Error = ConnectionError> + Send>>;
/// Read half of a peer connection. The stream ends when the peer goes away.
pub type Inbound = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ConnectionError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
    #[error("connection closed by peer")]
    Closed,
}

/// Message-framed duplex channel to one peer.
pub struct Connection {
    outbound: Outbound,
    inbound: Inbound,
}

impl Connection {
    pub fn new<O, I>(outbound: O, inbound: I) -> Self
    where
        O: Sink<Vec<u8>, Error = ConnectionError> + Send + 'static,
        I: Stream<Item = Result<Vec<u8>, ConnectionError>> + Send + 'static,
    {
        Self {
            outbound: Box::pin(outbound),
            inbound: Box::pin(inbound),
        }
    }

    /// Adapts an upgraded websocket. Text frames are relayed as their UTF-8
    /// bytes; ping/pong frames are answered by the websocket layer and never
    /// surface here.
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let outbound = sink.with(|payload: Vec<u8>| {
            future::ready(Ok::<_, ConnectionError>(Message::Binary(payload)))
        });
        let inbound = stream.filter_map(|frame| future::ready(inbound_payload(frame)));
        Self::new(outbound, inbound)
    }

    pub fn into_split(self) -> (Outbound, Inbound) {
        (self.outbound, self.inbound)
    }

    /// Closes the connection without sending anything else.
    pub async fn close(self) {
        let (mut outbound, _inbound) = self.into_split();
        if let Err(err) = outbound.close().await {
            tracing::debug!(%err, "Error while closing connection");
        }
    }

    /// In-memory connection for tests. The returned peer sees everything the
    /// server writes and can inject inbound messages or hang up.
    #[cfg(test)]
    pub(crate) fn in_memory() -> (Self, MemoryPeer) {
        use futures::channel::mpsc;

        let (to_peer, from_server) = mpsc::unbounded::<Vec<u8>>();
        let (to_server, from_peer) = mpsc::unbounded::<Result<Vec<u8>, ConnectionError>>();
        let outbound = to_peer.sink_map_err(|_| ConnectionError::Closed);
        (
            Self::new(outbound, from_peer),
            MemoryPeer {
                inbox: from_server,
                outbox: to_server,
            },
        )
    }
}

fn inbound_payload(frame: Result<Message, axum::Error>) -> Option<Result<Vec<u8>, ConnectionError>> {
    match frame {
        Ok(Message::Binary(payload)) => Some(Ok(payload)),
        Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Err(ConnectionError::Closed)),
        Err(err) => Some(Err(err.into())),
    }
}

#[cfg(test)]
pub(crate) struct MemoryPeer {
    pub inbox: futures::channel::mpsc::UnboundedReceiver<Vec<u8>>,
    pub outbox: futures::channel::mpsc::UnboundedSender<Result<Vec<u8>, ConnectionError>>,
}

#[cfg(test)]
impl MemoryPeer {
    pub fn send(&self, payload: &[u8]) {
        let _ = self.outbox.unbounded_send(Ok(payload.to_vec()));
    }

    /// Next message written by the server, or `None` once the server closed
    /// its side. Panics if nothing happens within a second.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(std::time::Duration::from_secs(1), self.inbox.next())
            .await
            .expect("Timed out waiting for server message")
    }

    /// Asserts that the server writes nothing for a short while.
    pub async fn expect_silence(&mut self) {
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(100), self.inbox.next()).await;
        assert!(waited.is_err(), "unexpected server message: {waited:?}");
    }

    /// Drops the peer's write half, ending the server's inbound stream.
    pub fn hang_up(&self) {
        self.outbox.close_channel();
    }
}
