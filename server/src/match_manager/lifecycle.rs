use crate::connection::{Connection, ConnectionError, Inbound, Outbound};
use crate::match_manager::{AppState, PendingMatch};
use futures::{SinkExt, StreamExt};
use pong_shared::{MatchId, Role, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Messages a reader may buffer before it waits for the relay loop.
const READER_BACKLOG: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a match stopped.
#[derive(Debug, thiserror::Error)]
pub enum MatchEnd {
    #[error("could not send the match id to the host: {0}")]
    HostUnreachable(ConnectionError),
    #[error("host disconnected while awaiting a client")]
    HostLeft,
    #[error("no client joined in time")]
    AwaitTimedOut,
    #[error("a peer disconnected")]
    Finished,
}

impl AppState {
    /// Drives one match from host registration to teardown. Every exit path
    /// closes both connections, forgets the match id and returns the session
    /// slot.
    pub async fn run_match(self: Arc<Self>, pending: PendingMatch) {
        let PendingMatch {
            id,
            host,
            client,
            permit,
        } = pending;
        let (host_out, host_in) = host.into_split();
        let mut session = MatchSession::new(id, host_out);

        tracing::info!(match_id = %id, "Starting match");
        let end = session
            .play(host_in, client, self.settings.await_timeout)
            .await;
        session.shutdown().await;

        self.registry.release(id);
        let remaining = permit.release();
        match end {
            MatchEnd::Finished => {
                tracing::info!(match_id = %id, remaining, "Match completed");
            }
            reason => {
                tracing::info!(match_id = %id, remaining, %reason, "Match aborted");
            }
        }
    }
}

enum Wake {
    Cancelled,
    Client(Connection),
    TimedOut,
}

struct MatchSession {
    id: MatchId,
    cancel: CancellationToken,
    /// Flipped once before `MatchStart`; readers drop what they read until then.
    relaying: watch::Sender<bool>,
    host: Outbound,
    client: Option<Outbound>,
    readers: Vec<JoinHandle<()>>,
}

impl MatchSession {
    fn new(id: MatchId, host: Outbound) -> Self {
        let (relaying, _) = watch::channel(false);
        Self {
            id,
            cancel: CancellationToken::new(),
            relaying,
            host,
            client: None,
            readers: Vec::with_capacity(2),
        }
    }

    async fn play(
        &mut self,
        host_in: Inbound,
        client: oneshot::Receiver<Connection>,
        await_timeout: Option<Duration>,
    ) -> MatchEnd {
        if let Err(err) = self.host.send(ServerMessage::MatchId(self.id).encode()).await {
            close_late_client(client).await;
            return MatchEnd::HostUnreachable(err);
        }
        let mut host_rx = self.spawn_reader(Role::Host, host_in);

        let client = match self.await_client(client, await_timeout).await {
            Ok(client) => client,
            Err(end) => return end,
        };

        // Anything the host reader picks up from here on was sent after the
        // host could see MatchStart.
        self.relaying.send_replace(true);
        tracing::info!(match_id = %self.id, "Client found, sending match start");
        let (client_out, client_in) = client.into_split();
        let client_out = self.client.insert(client_out);
        // A failed send cancels the session; the relay loop then stops
        // before forwarding anything.
        forward(
            &mut self.host,
            ServerMessage::MatchStart(Role::Host).encode(),
            &self.cancel,
            self.id,
            Role::Host,
        )
        .await;
        forward(
            client_out,
            ServerMessage::MatchStart(Role::Client).encode(),
            &self.cancel,
            self.id,
            Role::Client,
        )
        .await;
        let mut client_rx = self.spawn_reader(Role::Client, client_in);

        self.relay(&mut host_rx, &mut client_rx).await;
        MatchEnd::Finished
    }

    /// Waits for the hand-off. The host reader cancels the session when the
    /// host goes away, so cancellation means the host left.
    async fn await_client(
        &mut self,
        mut client: oneshot::Receiver<Connection>,
        await_timeout: Option<Duration>,
    ) -> Result<Connection, MatchEnd> {
        let deadline = expire_after(await_timeout);

        // The registry holds the hand-off sender until this session releases
        // the id, so the receiver only ever yields a connection. Should the
        // sender vanish anyway the branch is disabled and the wait goes on.
        let wake = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Wake::Cancelled,
            Ok(connection) = &mut client => Wake::Client(connection),
            () = deadline => Wake::TimedOut,
        };

        match wake {
            Wake::Client(connection) => Ok(connection),
            Wake::Cancelled => {
                close_late_client(client).await;
                Err(MatchEnd::HostLeft)
            }
            Wake::TimedOut => {
                close_late_client(client).await;
                Err(MatchEnd::AwaitTimedOut)
            }
        }
    }

    async fn relay(
        &mut self,
        host_rx: &mut mpsc::Receiver<Vec<u8>>,
        client_rx: &mut mpsc::Receiver<Vec<u8>>,
    ) {
        let Some(client) = self.client.as_mut() else {
            return;
        };

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(payload) = host_rx.recv() => {
                    forward(client, payload, &self.cancel, self.id, Role::Client).await;
                }
                Some(payload) = client_rx.recv() => {
                    forward(&mut self.host, payload, &self.cancel, self.id, Role::Host).await;
                }
            }
        }
    }

    fn spawn_reader(&mut self, peer: Role, inbound: Inbound) -> mpsc::Receiver<Vec<u8>> {
        let (relay, received) = mpsc::channel(READER_BACKLOG);
        self.readers.push(tokio::spawn(read_messages(
            self.id,
            peer,
            inbound,
            relay,
            self.relaying.subscribe(),
            self.cancel.clone(),
        )));
        received
    }

    async fn shutdown(mut self) {
        self.cancel.cancel();
        for reader in self.readers.drain(..) {
            if let Err(err) = reader.await {
                tracing::warn!(match_id = %self.id, %err, "Reader task failed");
            }
        }
        close_outbound(&mut self.host, self.id, Role::Host).await;
        if let Some(client) = self.client.as_mut() {
            close_outbound(client, self.id, Role::Client).await;
        }
    }
}

/// Feeds one peer's messages to the relay loop until the read fails or the
/// session is cancelled, then cancels the session. Messages read before
/// `relaying` turns true are dropped here.
async fn read_messages(
    id: MatchId,
    peer: Role,
    mut inbound: Inbound,
    relay: mpsc::Sender<Vec<u8>>,
    relaying: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = inbound.next() => next,
        };
        let payload = match next {
            Some(Ok(payload)) => payload,
            Some(Err(err)) => {
                tracing::debug!(match_id = %id, %peer, %err, "Read failed");
                break;
            }
            None => {
                tracing::debug!(match_id = %id, %peer, "Peer closed the connection");
                break;
            }
        };
        if !*relaying.borrow() {
            tracing::debug!(
                match_id = %id,
                %peer,
                len = payload.len(),
                "Ignoring message while awaiting client"
            );
            continue;
        }
        let delivered = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            sent = relay.send(payload) => sent.is_ok(),
        };
        if !delivered {
            break;
        }
    }
    cancel.cancel();
}

/// Writes one message to `peer`. A failed write cancels the session; once
/// cancelled nothing more is written.
async fn forward(
    to: &mut Outbound,
    payload: Vec<u8>,
    cancel: &CancellationToken,
    id: MatchId,
    peer: Role,
) {
    if cancel.is_cancelled() {
        return;
    }
    let sent = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        sent = to.send(payload) => sent,
    };
    if let Err(err) = sent {
        tracing::debug!(match_id = %id, %peer, %err, "Write failed");
        cancel.cancel();
    }
}

async fn expire_after(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Closes a client that was handed off after the session already gave up.
async fn close_late_client(mut client: oneshot::Receiver<Connection>) {
    client.close();
    if let Ok(connection) = client.try_recv() {
        connection.close().await;
    }
}

async fn close_outbound(outbound: &mut Outbound, id: MatchId, peer: Role) {
    match tokio::time::timeout(CLOSE_TIMEOUT, outbound.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::debug!(match_id = %id, %peer, %err, "Error while closing connection");
        }
        Err(_) => {
            tracing::debug!(match_id = %id, %peer, "Timed out closing connection");
        }
    }
}
