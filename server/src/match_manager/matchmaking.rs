use crate::connection::Connection;
use crate::match_manager::{AppState, SessionPermit};
use pong_shared::MatchId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An upgraded connection waiting to be paired.
pub enum MatchRequest {
    /// No match id was given: open a new match. The permit is the session
    /// slot the gateway admitted.
    Host {
        connection: Connection,
        permit: SessionPermit,
    },
    /// Join the match a host is waiting in.
    Client {
        match_id: MatchId,
        connection: Connection,
    },
}

impl MatchRequest {
    pub fn into_connection(self) -> Connection {
        match self {
            Self::Host { connection, .. } | Self::Client { connection, .. } => connection,
        }
    }
}

impl AppState {
    /// Pairs hosts and clients, one request at a time.
    pub async fn serve_match_requests(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<MatchRequest>,
    ) {
        while let Some(request) = requests.recv().await {
            self.dispatch(request);
        }
        tracing::info!("Match request queue closed, dispatcher stopping");
    }

    pub fn dispatch(self: &Arc<Self>, request: MatchRequest) {
        match request {
            MatchRequest::Host { connection, permit } => {
                let pending = self.registry.allocate(connection, permit);
                tracing::info!(match_id = %pending.id, "Host registered, awaiting client");
                tokio::spawn(Arc::clone(self).run_match(pending));
            }
            MatchRequest::Client {
                match_id,
                connection,
            } => match self.registry.claim(match_id) {
                Some(handoff) => {
                    tracing::info!(match_id = %match_id, "Client claimed match");
                    if let Err(connection) = handoff.send(connection) {
                        tracing::info!(match_id = %match_id, "Host left before the client arrived");
                        tokio::spawn(connection.close());
                    }
                }
                None => {
                    tracing::info!(match_id = %match_id, "No pending match for client, closing");
                    tokio::spawn(connection.close());
                }
            },
        }
    }
}
