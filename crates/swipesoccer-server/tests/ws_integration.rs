#[allow(dead_code)]
mod common;

use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use swipesoccer_core::game::GamePhase;
use swipesoccer_core::net::messages::{ClientMessage, KickBallMsg, RegisterMsg, ServerMessage};
use swipesoccer_core::reject::RejectReason;

use common::{
    TestServer, WsStream, ws_connect, ws_kick, ws_read_game_state, ws_read_server_msg,
    ws_register, ws_register_raw, ws_send_client_msg, ws_try_read_raw,
};

/// Register two clients so they land in the same started game.
async fn matched_pair(server: &TestServer) -> (WsStream, WsStream) {
    let mut alice = ws_connect(&server.ws_url()).await;
    let (_, waiting) = ws_register(&mut alice, "token-alice", "Alice").await;
    assert_eq!(waiting.phase, GamePhase::Waiting);

    let mut bob = ws_connect(&server.ws_url()).await;
    let (_, started) = ws_register(&mut bob, "token-bob", "Bob").await;
    assert_eq!(started.phase, GamePhase::InProgress);

    let started = ws_read_game_state(&mut alice).await;
    assert_eq!(started.phase, GamePhase::InProgress);
    (alice, bob)
}

#[tokio::test]
async fn first_player_waits_until_second_arrives() {
    let server = TestServer::new().await;

    let mut alice = ws_connect(&server.ws_url()).await;
    let (resp, waiting) = ws_register(&mut alice, "token-alice", "Alice").await;
    let alice_id = resp.player.as_ref().unwrap().id;
    assert_eq!(resp.player.unwrap().name, "Alice");
    assert_eq!(waiting.phase, GamePhase::Waiting);
    assert_eq!(waiting.players.len(), 1);
    assert!(waiting.state.is_none());

    let mut bob = ws_connect(&server.ws_url()).await;
    let (bob_resp, bob_view) = ws_register(&mut bob, "token-bob", "Bob").await;
    assert_eq!(bob_resp.game_id, resp.game_id);
    assert_eq!(bob_view.phase, GamePhase::InProgress);

    let alice_view = ws_read_game_state(&mut alice).await;
    assert_eq!(alice_view, bob_view);
    let state = alice_view.state.unwrap();
    assert_eq!(state.ball(), 38);
    assert_eq!(state.player_in_turn(), 0);
    assert_eq!(state.players()[0].id, alice_id);
}

#[tokio::test]
async fn accepted_kick_is_broadcast_to_both_players() {
    let server = TestServer::new().await;
    let (mut alice, mut bob) = matched_pair(&server).await;

    ws_kick(&mut alice, 31).await;

    let alice_view = ws_read_game_state(&mut alice).await;
    let bob_view = ws_read_game_state(&mut bob).await;
    assert_eq!(alice_view, bob_view);

    let state = alice_view.state.unwrap();
    assert_eq!(state.ball(), 31);
    assert_eq!(state.move_count(), 1);
    assert_eq!(state.owner_of(38, 31), Some(0));
    assert_eq!(state.player_in_turn(), 1);
}

#[tokio::test]
async fn out_of_turn_kick_is_rejected_only_to_the_kicker() {
    let server = TestServer::new().await;
    let (mut alice, mut bob) = matched_pair(&server).await;

    ws_kick(&mut bob, 31).await;
    match ws_read_server_msg(&mut bob).await {
        ServerMessage::MoveRejected(msg) => {
            assert_eq!(msg.target, 31);
            assert_eq!(msg.reason, RejectReason::NotYourTurn);
        },
        other => panic!("Expected MoveRejected, got: {other:?}"),
    }
    assert!(ws_try_read_raw(&mut alice, 200).await.is_none());
}

#[tokio::test]
async fn illegal_kick_leaves_the_game_unchanged() {
    let server = TestServer::new().await;
    let (mut alice, mut bob) = matched_pair(&server).await;

    // Not adjacent to the ball.
    ws_kick(&mut alice, 3).await;
    match ws_read_server_msg(&mut alice).await {
        ServerMessage::MoveRejected(msg) => assert_eq!(msg.reason, RejectReason::IllegalMove),
        other => panic!("Expected MoveRejected, got: {other:?}"),
    }
    assert!(ws_try_read_raw(&mut bob, 200).await.is_none());

    // Still Alice's turn from the same spot.
    ws_kick(&mut alice, 31).await;
    let view = ws_read_game_state(&mut bob).await;
    assert_eq!(view.state.unwrap().move_count(), 1);
}

#[tokio::test]
async fn goal_finishes_the_game() {
    let server = TestServer::new().await;
    let (mut alice, mut bob) = matched_pair(&server).await;

    let kicks = [31, 24, 17, 10, 3];
    for (i, target) in kicks.into_iter().enumerate() {
        let kicker = if i % 2 == 0 { &mut alice } else { &mut bob };
        ws_kick(kicker, target).await;
        ws_read_game_state(&mut alice).await;
        ws_read_game_state(&mut bob).await;
    }

    ws_kick(&mut bob, 10).await;
    match ws_read_server_msg(&mut bob).await {
        ServerMessage::MoveRejected(msg) => assert_eq!(msg.reason, RejectReason::GameOver),
        other => panic!("Expected MoveRejected, got: {other:?}"),
    }
}

#[tokio::test]
async fn wrong_protocol_version_is_refused() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    let msg = ClientMessage::Register(RegisterMsg {
        token: "token-old".to_string(),
        player_name: Some("Old".to_string()),
        protocol_version: 99,
    });
    ws_send_client_msg(&mut stream, &msg).await;

    match ws_read_server_msg(&mut stream).await {
        ServerMessage::RegisterResponse(resp) => {
            assert!(!resp.success);
            assert!(resp.error.unwrap().contains("Protocol version mismatch"));
        },
        other => panic!("Expected RegisterResponse, got: {other:?}"),
    }
}

#[tokio::test]
async fn first_message_must_be_register() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    ws_send_client_msg(
        &mut stream,
        &ClientMessage::KickBall(KickBallMsg { target: 31 }),
    )
    .await;

    match ws_read_server_msg(&mut stream).await {
        ServerMessage::RegisterResponse(resp) => {
            assert!(!resp.success);
            assert!(resp.player.is_none());
        },
        other => panic!("Expected RegisterResponse, got: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_token_is_refused() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    let resp = ws_register_raw(&mut stream, "", Some("Nobody")).await;
    assert!(!resp.success);
    assert!(resp.game_id.is_none());
    assert!(resp.error.is_some());
}

#[tokio::test]
async fn missing_name_registers_as_guest() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    let resp = ws_register_raw(&mut stream, "token-guest", None).await;
    assert!(resp.success);
    assert_eq!(resp.player.unwrap().name, "Guest");
}

#[tokio::test]
async fn reconnect_with_same_token_resumes_game() {
    let server = TestServer::new().await;
    let (mut alice, mut bob) = matched_pair(&server).await;

    ws_kick(&mut alice, 31).await;
    let before = ws_read_game_state(&mut alice).await;
    ws_read_game_state(&mut bob).await;

    alice.close(None).await.unwrap();
    drop(alice);

    let mut again = ws_connect(&server.ws_url()).await;
    let (resp, view) = ws_register(&mut again, "token-alice", "Alice").await;
    assert_eq!(resp.game_id, Some(before.game_id));
    assert_eq!(view.state, before.state);

    // Bob also sees the re-registration snapshot.
    let bob_view = ws_read_game_state(&mut bob).await;
    assert_eq!(bob_view.game_id, before.game_id);

    // The resumed connection can keep playing once it is its turn.
    ws_kick(&mut bob, 24).await;
    let after = ws_read_game_state(&mut again).await;
    assert_eq!(after.state.unwrap().ball(), 24);
}

#[tokio::test]
async fn non_binary_frames_are_ignored() {
    let server = TestServer::new().await;
    let (mut alice, mut bob) = matched_pair(&server).await;

    alice
        .send(Message::Text("hello".to_string().into()))
        .await
        .unwrap();
    alice.send(Message::Binary(vec![0xFF].into())).await.unwrap();

    ws_kick(&mut alice, 31).await;
    let view = ws_read_game_state(&mut bob).await;
    assert_eq!(view.state.unwrap().ball(), 31);
}
