use crate::connection::Connection;
use crate::match_manager::counter::SessionPermit;
use dashmap::{mapref::entry::Entry, DashMap};
use pong_shared::MatchId;
use rand::Rng;
use tokio::sync::oneshot;

/// Hand-off for the client connection of one match.
pub type Handoff = oneshot::Sender<Connection>;

enum MatchSlot {
    /// Host is waiting; the sender routes the joining client to its session.
    Pending(Handoff),
    /// Claimed by a client. Kept until the session ends so the id stays
    /// reserved while the match is live.
    Running,
}

/// Everything a session needs to wait for its client.
pub struct PendingMatch {
    pub id: MatchId,
    pub host: Connection,
    pub client: oneshot::Receiver<Connection>,
    pub permit: SessionPermit,
}

/// Directory of live matches keyed by id.
#[derive(Default)]
pub struct MatchRegistry {
    matches: DashMap<MatchId, MatchSlot>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending match under an id no live match uses.
    pub fn allocate(&self, host: Connection, permit: SessionPermit) -> PendingMatch {
        let mut rng = rand::thread_rng();
        loop {
            let Some(id) = MatchId::new(rng.gen_range(0..MatchId::SPACE)) else {
                continue;
            };
            match self.matches.entry(id) {
                Entry::Vacant(slot) => {
                    let (handoff, client) = oneshot::channel();
                    slot.insert(MatchSlot::Pending(handoff));
                    return PendingMatch {
                        id,
                        host,
                        client,
                        permit,
                    };
                }
                Entry::Occupied(_) => {
                    tracing::trace!(match_id = %id, "Match id collision, retrying");
                }
            }
        }
    }

    /// Takes the hand-off of a pending match. Only the first caller for a
    /// given id gets it.
    pub fn claim(&self, id: MatchId) -> Option<Handoff> {
        let mut slot = self.matches.get_mut(&id)?;
        let previous = std::mem::replace(slot.value_mut(), MatchSlot::Running);
        match previous {
            MatchSlot::Pending(handoff) => Some(handoff),
            MatchSlot::Running => None,
        }
    }

    /// Whether a host is waiting under `id`.
    pub fn exists(&self, id: MatchId) -> bool {
        self.matches
            .get(&id)
            .is_some_and(|slot| matches!(slot.value(), MatchSlot::Pending(_)))
    }

    /// Forgets a match whose session has ended.
    pub fn release(&self, id: MatchId) {
        self.matches.remove(&id);
    }

    pub fn pending_count(&self) -> usize {
        self.matches
            .iter()
            .filter(|entry| matches!(entry.value(), MatchSlot::Pending(_)))
            .count()
    }

    /// Pending plus running matches.
    pub fn live_count(&self) -> usize {
        self.matches.len()
    }
}
