use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use swipesoccer_core::board::Vertex;
use swipesoccer_core::net::messages::{
    ClientMessage, GameStateMsg, KickBallMsg, RegisterMsg, RegisterResponseMsg, ServerMessage,
};
use swipesoccer_core::net::protocol::{
    PROTOCOL_VERSION, decode_server_message, encode_client_message,
};

use swipesoccer_server::config::ServerConfig;
use swipesoccer_server::{build_app, spawn_presence_listener};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);
        spawn_presence_listener(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Send a Register and return the RegisterResponse, whatever its outcome.
pub async fn ws_register_raw(
    stream: &mut WsStream,
    token: &str,
    name: Option<&str>,
) -> RegisterResponseMsg {
    let msg = ClientMessage::Register(RegisterMsg {
        token: token.to_string(),
        player_name: name.map(str::to_string),
        protocol_version: PROTOCOL_VERSION,
    });
    ws_send_client_msg(stream, &msg).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::RegisterResponse(resp) => resp,
        other => panic!("Expected RegisterResponse, got: {other:?}"),
    }
}

/// Register successfully and consume the GameState broadcast that follows.
pub async fn ws_register(
    stream: &mut WsStream,
    token: &str,
    name: &str,
) -> (RegisterResponseMsg, GameStateMsg) {
    let resp = ws_register_raw(stream, token, Some(name)).await;
    assert!(resp.success, "Expected successful registration: {resp:?}");
    let state = ws_read_game_state(stream).await;
    (resp, state)
}

pub async fn ws_kick(stream: &mut WsStream, target: Vertex) {
    ws_send_client_msg(stream, &ClientMessage::KickBall(KickBallMsg { target })).await;
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read raw binary data, returning None on timeout.
pub async fn ws_try_read_raw(stream: &mut WsStream, timeout_ms: u64) -> Option<Vec<u8>> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

pub async fn ws_read_game_state(stream: &mut WsStream) -> GameStateMsg {
    match ws_read_server_msg(stream).await {
        ServerMessage::GameState(msg) => *msg,
        other => panic!("Expected GameState, got: {other:?}"),
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
