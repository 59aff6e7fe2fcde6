//! End-to-end tests: handshake, authentication, fan-out, and dispatch over
//! in-memory duplex sockets through the real server path.

use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;

use pling::notify::{NewNotification, NotificationKind};
use pling::ws::frame::Opcode;

mod common;
use common::{TestStack, test_stack, test_stack_with_keepalive, upgrade_request, wait_until};

#[tokio::test]
async fn handshake_yields_101_and_connected() {
    let stack = test_stack().await;
    let user = stack.create_user("alice").await;
    let token = stack.token_for(user.id);

    let mut client = stack
        .connect_raw(&upgrade_request(
            &format!("/ws/notifications?token={token}"),
            None,
        ))
        .await;

    let head = client.read_http_head().await.expect("response head");
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    // RFC 6455 vector for the fixture's Sec-WebSocket-Key.
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    let connected = client.next_json().await;
    assert_eq!(connected, json!({"type": "connected"}));
    assert_eq!(stack.hub.connection_count(user.id), 1);
}

#[tokio::test]
async fn cookie_token_is_accepted() {
    let stack = test_stack().await;
    let user = stack.create_user("bob").await;
    let token = stack.token_for(user.id);

    let mut client = stack
        .connect_raw(&upgrade_request(
            "/ws/notifications",
            Some(&format!("auth_token={token}")),
        ))
        .await;

    let head = client.read_http_head().await.expect("response head");
    assert!(head.starts_with("HTTP/1.1 101"));
    assert_eq!(client.next_json().await["type"], "connected");
}

#[tokio::test]
async fn missing_token_gets_bare_401() {
    let stack = test_stack().await;

    let mut client = stack
        .connect_raw(&upgrade_request("/ws/notifications", None))
        .await;

    let head = client.read_http_head().await.expect("response head");
    assert_eq!(head, "HTTP/1.1 401 Unauthorized\r\n\r\n");
    assert_eq!(stack.hub.user_count(), 0);
}

#[tokio::test]
async fn garbage_token_gets_401() {
    let stack = test_stack().await;

    let mut client = stack
        .connect_raw(&upgrade_request("/ws/notifications?token=garbage", None))
        .await;

    let head = client.read_http_head().await.expect("response head");
    assert!(head.starts_with("HTTP/1.1 401"));
}

#[tokio::test]
async fn token_for_unknown_user_gets_401() {
    let stack = test_stack().await;
    let token = stack.token_for(424242);

    let mut client = stack
        .connect_raw(&upgrade_request(
            &format!("/ws/notifications?token={token}"),
            None,
        ))
        .await;

    let head = client.read_http_head().await.expect("response head");
    assert!(head.starts_with("HTTP/1.1 401"));
}

#[tokio::test]
async fn wrong_path_is_dropped_without_a_byte() {
    let stack = test_stack().await;
    let user = stack.create_user("carol").await;
    let token = stack.token_for(user.id);

    let client = stack
        .connect_raw(&upgrade_request(&format!("/other?token={token}"), None))
        .await;
    client.expect_silent_drop().await;
}

#[tokio::test]
async fn non_upgrade_request_is_dropped_without_a_byte() {
    let stack = test_stack().await;

    let client = stack
        .connect_raw("GET /ws/notifications HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    client.expect_silent_drop().await;
}

#[tokio::test]
async fn ping_is_answered_with_matching_pong() {
    let stack = test_stack().await;
    let user = stack.create_user("dana").await;
    let mut client = stack.connect(&stack.token_for(user.id)).await;

    client.send_masked(0x9, b"keepalive").await;

    let pong = client.next_frame().await;
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(pong.payload, b"keepalive");
}

#[tokio::test]
async fn keepalive_ping_arrives_on_the_configured_interval() {
    let stack = test_stack_with_keepalive(Duration::from_millis(50)).await;
    let user = stack.create_user("jana").await;
    let mut client = stack.connect(&stack.token_for(user.id)).await;

    // No traffic from the client; the next frame must be the server's ping.
    let ping = client.next_frame().await;
    assert_eq!(ping.opcode, Opcode::Ping);
}

#[tokio::test]
async fn failed_keepalive_ping_unsubscribes_the_connection() {
    let stack = test_stack_with_keepalive(Duration::from_millis(50)).await;
    let user = stack.create_user("kofi").await;
    let token = stack.token_for(user.id);

    // Separate pipes per direction: the inbound side stays open the whole
    // time, so only the failing ping write can tear the session down.
    let (mut inbound_client, inbound_server) = tokio::io::duplex(4096);
    let (outbound_client, outbound_server) = tokio::io::duplex(4096);
    let (inbound_read, _inbound_write) = tokio::io::split(inbound_server);
    let (_outbound_read, outbound_write) = tokio::io::split(outbound_server);

    let server = stack.server.clone();
    tokio::spawn(async move {
        server
            .handle_socket(tokio::io::join(inbound_read, outbound_write))
            .await;
    });

    inbound_client
        .write_all(upgrade_request(&format!("/ws/notifications?token={token}"), None).as_bytes())
        .await
        .unwrap();

    let hub = stack.hub.clone();
    wait_until(|| hub.connection_count(user.id) == 1).await;

    // Peer vanishes without a close frame or EOF; the next ping write fails
    // and must remove the connection from the hub.
    drop(outbound_client);
    wait_until(|| hub.connection_count(user.id) == 0).await;
}

#[tokio::test]
async fn client_close_frame_unsubscribes() {
    let stack = test_stack().await;
    let user = stack.create_user("erin").await;
    let mut client = stack.connect(&stack.token_for(user.id)).await;
    assert_eq!(stack.hub.connection_count(user.id), 1);

    client.send_masked(0x8, &[]).await;

    let hub = stack.hub.clone();
    wait_until(|| hub.connection_count(user.id) == 0).await;
}

fn trade_offer(user_id: i64) -> NewNotification {
    NewNotification::new(
        user_id,
        NotificationKind::TradeOffer,
        "New Offer",
        "You received a trade offer on your listing",
        json!({"trade_id": 7, "action_url": "/trades/7"}),
    )
}

async fn persisted_rows(stack: &TestStack, user_id: i64) -> (i64, i64) {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(stack.db.pool())
            .await
            .expect("counting rows");
    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(stack.db.pool())
    .await
    .expect("counting unread rows");
    (total, unread)
}

#[tokio::test]
async fn end_to_end_delivery_and_persistence() {
    let stack = test_stack().await;
    let user = stack.create_user("frank").await;
    let mut client = stack.connect(&stack.token_for(user.id)).await;

    let stored = stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("creating notification");

    let envelope = client.next_json().await;
    assert_eq!(envelope["type"], "notification");
    assert_eq!(envelope["data"]["id"], stored.id);
    assert_eq!(envelope["data"]["type"], "trade_offer");
    assert_eq!(envelope["data"]["title"], "New Offer");
    assert_eq!(envelope["data"]["data"]["trade_id"], 7);
    assert!(envelope["data"]["read_at"].is_null());

    // Exactly one row, unread, regardless of delivery.
    assert_eq!(persisted_rows(&stack, user.id).await, (1, 1));

    // Exactly one frame per dispatch: the next frame the client sees is the
    // next notification, not a duplicate of the first.
    let second = stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("second notification");
    assert_eq!(client.next_json().await["data"]["id"], second.id);
}

#[tokio::test]
async fn fan_out_reaches_every_connection_until_one_closes() {
    let stack = test_stack().await;
    let user = stack.create_user("gail").await;
    let token = stack.token_for(user.id);
    let mut first = stack.connect(&token).await;
    let mut second = stack.connect(&token).await;
    assert_eq!(stack.hub.connection_count(user.id), 2);

    let stored = stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("creating notification");

    assert_eq!(first.next_json().await["data"]["id"], stored.id);
    assert_eq!(second.next_json().await["data"]["id"], stored.id);

    first.send_masked(0x8, &[]).await;
    let hub = stack.hub.clone();
    wait_until(|| hub.connection_count(user.id) == 1).await;

    let next = stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("second notification");
    assert_eq!(second.next_json().await["data"]["id"], next.id);
}

#[tokio::test]
async fn vanished_peer_is_absent_before_the_next_dispatch() {
    let stack = test_stack().await;
    let user = stack.create_user("hugo").await;
    let client = stack.connect(&stack.token_for(user.id)).await;

    // Peer disappears without a close frame.
    drop(client);

    stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("dispatch to vanished peer");

    let hub = stack.hub.clone();
    wait_until(|| hub.connection_count(user.id) == 0).await;

    // Next dispatch sees no connections at all and still succeeds.
    stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("dispatch to empty hub");
    assert_eq!(persisted_rows(&stack, user.id).await, (2, 2));
}

#[tokio::test]
async fn offline_user_dispatch_is_a_no_op() {
    let stack = test_stack().await;
    let user = stack.create_user("ines").await;

    let stored = stack
        .service
        .create_notification(trade_offer(user.id))
        .await
        .expect("offline dispatch");

    assert!(stored.read_at.is_none());
    assert_eq!(persisted_rows(&stack, user.id).await, (1, 1));
}
