use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod counter;
pub mod lifecycle;
pub mod matchmaking;
pub mod registry;

pub use counter::{SessionCounter, SessionPermit};
pub use lifecycle::MatchEnd;
pub use matchmaking::MatchRequest;
pub use registry::{MatchRegistry, PendingMatch};

/// Ceiling on pending plus running matches unless configured otherwise.
pub const DEFAULT_MAX_MATCHES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSettings {
    pub max_matches: usize,
    /// How long a host may wait for its client. `None` waits until the host
    /// disconnects.
    pub await_timeout: Option<Duration>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_matches: DEFAULT_MAX_MATCHES,
            await_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub active_matches: usize,
    pub pending_matches: usize,
    pub max_matches: usize,
}

pub struct AppState {
    pub registry: MatchRegistry,
    pub counter: Arc<SessionCounter>,
    pub settings: MatchSettings,
    requests: mpsc::UnboundedSender<MatchRequest>,
}

impl AppState {
    /// Builds the shared state and the queue the dispatcher consumes.
    pub fn new(settings: MatchSettings) -> (Arc<Self>, mpsc::UnboundedReceiver<MatchRequest>) {
        let (requests, incoming) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            registry: MatchRegistry::new(),
            counter: Arc::new(SessionCounter::new()),
            settings,
            requests,
        });
        (state, incoming)
    }

    /// Builds the shared state and spawns its dispatcher task.
    pub fn start(settings: MatchSettings) -> Arc<Self> {
        let (state, incoming) = Self::new(settings);
        tokio::spawn(Arc::clone(&state).serve_match_requests(incoming));
        state
    }

    /// Queues a request for the dispatcher.
    pub fn submit(&self, request: MatchRequest) {
        if let Err(mpsc::error::SendError(request)) = self.requests.send(request) {
            tracing::error!("Dispatcher is gone, dropping match request");
            tokio::spawn(request.into_connection().close());
        }
    }

    pub fn stats(&self) -> MatchStats {
        MatchStats {
            active_matches: self.counter.active_count(),
            pending_matches: self.registry.pending_count(),
            max_matches: self.settings.max_matches,
        }
    }
}
