use futures::{SinkExt, StreamExt};
use pong_server::{AppState, MatchSettings};
use pong_shared::{MatchId, Role, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::Error as WsError, tungstenite::Message, MaybeTlsStream,
    WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(settings: MatchSettings) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::start(settings);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = Arc::clone(&state);
    tokio::spawn(async move {
        pong_server::serve(listener, served, None).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, mid: Option<&str>) -> Result<Socket, u16> {
    let url = match mid {
        Some(mid) => format!("ws://{addr}/sock?mid={mid}"),
        None => format!("ws://{addr}/sock"),
    };
    match connect_async(url).await {
        Ok((socket, _)) => Ok(socket),
        Err(WsError::Http(response)) => Err(response.status().as_u16()),
        Err(err) => panic!("Unexpected connect error: {err}"),
    }
}

/// Next binary frame, or `None` once the server closed the socket.
async fn next_binary(socket: &mut Socket) -> Option<Vec<u8>> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Binary(payload))) => return Some(payload),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
                Some(Ok(other)) => panic!("Unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("Timed out waiting for a frame")
}

async fn host(addr: SocketAddr) -> (Socket, MatchId) {
    let mut socket = connect(addr, None).await.expect("Host rejected");
    let frame = next_binary(&mut socket).await.expect("Host closed");
    assert_eq!(frame.len(), 5);
    assert_eq!(frame[0], 1);
    match ServerMessage::decode(&frame) {
        Ok(ServerMessage::MatchId(id)) => (socket, id),
        other => panic!("Expected MatchId, got {other:?}"),
    }
}

async fn wait_for_active(state: &AppState, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.counter.active_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Active match count never settled");
}

#[tokio::test]
async fn test_host_and_client_are_paired_and_relayed() {
    let (addr, state) = spawn_server(MatchSettings::default()).await;
    let (mut host_socket, id) = host(addr).await;
    assert_eq!(state.counter.active_count(), 1);

    let mut client_socket = connect(addr, Some(&id.to_string()))
        .await
        .expect("Client rejected");
    assert_eq!(next_binary(&mut host_socket).await, Some(vec![2, 1]));
    assert_eq!(next_binary(&mut client_socket).await, Some(vec![2, 2]));
    assert_eq!(
        ServerMessage::decode(&[2, 2]),
        Ok(ServerMessage::MatchStart(Role::Client))
    );

    host_socket
        .send(Message::Binary(vec![0xAA, 0xBB]))
        .await
        .unwrap();
    assert_eq!(next_binary(&mut client_socket).await, Some(vec![0xAA, 0xBB]));

    for seq in 0..20_u8 {
        client_socket.send(Message::Binary(vec![seq, seq])).await.unwrap();
    }
    for seq in 0..20_u8 {
        assert_eq!(next_binary(&mut host_socket).await, Some(vec![seq, seq]));
    }

    client_socket.close(None).await.unwrap();
    assert_eq!(next_binary(&mut host_socket).await, None);
    wait_for_active(&state, 0).await;
    assert_eq!(state.registry.live_count(), 0);
}

#[tokio::test]
async fn test_unknown_match_is_not_found() {
    let (addr, _state) = spawn_server(MatchSettings::default()).await;
    assert_eq!(connect(addr, Some("9999")).await.err(), Some(404));
    assert_eq!(connect(addr, Some("abc")).await.err(), Some(404));
}

#[tokio::test]
async fn test_claimed_match_cannot_be_joined_again() {
    let (addr, _state) = spawn_server(MatchSettings::default()).await;
    let (mut host_socket, id) = host(addr).await;
    let mid = id.to_string();

    let _client = connect(addr, Some(&mid)).await.expect("Client rejected");
    assert_eq!(next_binary(&mut host_socket).await, Some(vec![2, 1]));
    assert_eq!(connect(addr, Some(&mid)).await.err(), Some(404));
}

#[tokio::test]
async fn test_thirty_third_host_is_turned_away() {
    let (addr, state) = spawn_server(MatchSettings::default()).await;
    let mut hosts = Vec::new();
    for _ in 0..32 {
        hosts.push(host(addr).await);
    }
    assert_eq!(state.counter.active_count(), 32);
    assert_eq!(connect(addr, None).await.err(), Some(503));

    let ids: std::collections::HashSet<_> = hosts.iter().map(|(_, id)| *id).collect();
    assert_eq!(ids.len(), 32);

    // A waiting host can still be joined while the server is full.
    let joinable = hosts[0].1;
    let _client = connect(addr, Some(&joinable.to_string()))
        .await
        .expect("Client rejected");

    let (mut leaving, _) = hosts.pop().unwrap();
    leaving.close(None).await.unwrap();
    wait_for_active(&state, 31).await;
    let (_socket, _id) = host(addr).await;
    assert_eq!(state.counter.active_count(), 32);
}

#[tokio::test]
async fn test_stats_endpoint_reports_counts() {
    let (addr, _state) = spawn_server(MatchSettings::default()).await;
    let (_host_socket, _id) = host(addr).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET /stats HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let stats: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(stats["active_matches"], 1);
    assert_eq!(stats["pending_matches"], 1);
    assert_eq!(stats["max_matches"], 32);
}
