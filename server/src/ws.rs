use crate::connection::Connection;
use crate::match_manager::{AppState, MatchRequest, SessionPermit};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pong_shared::MatchId;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SockParams {
    /// Match to join. Absent for hosts.
    pub mid: Option<String>,
}

/// Reasons a connection is turned away before the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("match does not exist")]
    MatchNotFound,
    #[error("too many active matches")]
    TooManyMatches,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MatchNotFound => StatusCode::NOT_FOUND,
            Self::TooManyMatches => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Outcome of the pre-upgrade checks.
#[derive(Debug)]
pub enum Admission {
    Host(SessionPermit),
    Client(MatchId),
}

impl Admission {
    fn into_request(self, connection: Connection) -> MatchRequest {
        match self {
            Self::Host(permit) => MatchRequest::Host { connection, permit },
            Self::Client(match_id) => MatchRequest::Client {
                match_id,
                connection,
            },
        }
    }
}

/// Clients must name a waiting match; hosts need a free session slot.
pub fn admit(state: &AppState, mid: Option<&str>) -> Result<Admission, GatewayError> {
    match mid {
        Some(mid) => mid
            .parse::<MatchId>()
            .ok()
            .filter(|id| state.registry.exists(*id))
            .map(Admission::Client)
            .ok_or(GatewayError::MatchNotFound),
        None => state
            .counter
            .admit(state.settings.max_matches)
            .map(Admission::Host)
            .ok_or(GatewayError::TooManyMatches),
    }
}

pub async fn sock_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SockParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::debug!(mid = ?params.mid, "Handling match request");
    let admission = match admit(&state, params.mid.as_deref()) {
        Ok(admission) => admission,
        Err(err) => {
            tracing::info!(mid = ?params.mid, %err, "Rejected match request");
            return err.into_response();
        }
    };

    ws.on_failed_upgrade(|err| tracing::warn!(%err, "Websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            tracing::debug!("Upgraded match connection");
            state.submit(admission.into_request(Connection::from_websocket(socket)));
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_manager::MatchSettings;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn rejections_map_to_status_and_body() {
        let response = GatewayError::MatchNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "match does not exist");

        let response = GatewayError::TooManyMatches.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "too many active matches");
    }

    #[test]
    fn hosts_are_admitted_up_to_the_ceiling() {
        let (state, _incoming) = AppState::new(MatchSettings {
            max_matches: 3,
            ..MatchSettings::default()
        });
        let admitted: Vec<_> = (0..3).map(|_| admit(&state, None)).collect();
        assert!(admitted.iter().all(Result::is_ok));
        assert_eq!(
            admit(&state, None).err(),
            Some(GatewayError::TooManyMatches)
        );
        assert_eq!(state.counter.active_count(), 3);

        drop(admitted);
        assert_eq!(state.counter.active_count(), 0);
        assert!(admit(&state, None).is_ok());
    }

    #[test]
    fn clients_need_a_pending_match() {
        let (state, _incoming) = AppState::new(MatchSettings::default());
        assert_eq!(
            admit(&state, Some("9999")).err(),
            Some(GatewayError::MatchNotFound)
        );
        assert_eq!(
            admit(&state, Some("")).err(),
            Some(GatewayError::MatchNotFound)
        );
        assert_eq!(
            admit(&state, Some("not-a-match")).err(),
            Some(GatewayError::MatchNotFound)
        );

        let (host, _peer) = Connection::in_memory();
        let pending = state.registry.allocate(host, state.counter.open());
        let mid = pending.id.to_string();
        assert!(matches!(
            admit(&state, Some(&mid)),
            Ok(Admission::Client(id)) if id == pending.id
        ));
        assert_eq!(state.counter.active_count(), 1);
    }

    #[test]
    fn full_server_still_admits_clients() {
        let (state, _incoming) = AppState::new(MatchSettings {
            max_matches: 1,
            ..MatchSettings::default()
        });
        let Ok(Admission::Host(permit)) = admit(&state, None) else {
            panic!("first host should be admitted");
        };
        let (host, _peer) = Connection::in_memory();
        let pending = state.registry.allocate(host, permit);

        assert!(admit(&state, None).is_err());
        assert!(admit(&state, Some(&pending.id.to_string())).is_ok());
    }
}
