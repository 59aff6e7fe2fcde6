//! Shared fixtures for the integration tests: a full in-process stack and a
//! hand-rolled WebSocket client over an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use pling::auth::{AuthConfig, AuthState};
use pling::db::Database;
use pling::notify::{NotificationRepository, NotificationService};
use pling::user::{User, UserRepository};
use pling::ws::frame::{Frame, decode_frame};
use pling::ws::{Hub, WsServer};

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-chars";

pub struct TestStack {
    pub db: Database,
    pub hub: Arc<Hub>,
    pub auth: AuthState,
    pub users: UserRepository,
    pub service: NotificationService,
    pub server: Arc<WsServer>,
}

pub async fn test_stack() -> TestStack {
    // Long enough that no keepalive ping fires during a test.
    test_stack_with_keepalive(Duration::from_secs(30)).await
}

pub async fn test_stack_with_keepalive(keepalive: Duration) -> TestStack {
    let db = Database::in_memory().await.expect("in-memory database");

    let auth = AuthState::new(AuthConfig {
        jwt_secret: Some(TEST_SECRET.to_string()),
    });

    let hub = Hub::new();
    let users = UserRepository::new(db.pool().clone());
    let service = NotificationService::new(
        NotificationRepository::new(db.pool().clone()),
        hub.clone(),
    );
    let server = WsServer::new(hub.clone(), auth.clone(), users.clone(), keepalive);

    TestStack {
        db,
        hub,
        auth,
        users,
        service,
        server,
    }
}

impl TestStack {
    pub async fn create_user(&self, username: &str) -> User {
        self.users.create(username).await.expect("creating user")
    }

    pub fn token_for(&self, user_id: i64) -> String {
        self.auth
            .generate_token(user_id, 3600)
            .expect("minting test token")
    }

    /// Hand one end of a duplex pipe to the server's socket handler and
    /// write the given HTTP request on the other.
    pub async fn connect_raw(&self, request: &str) -> WsClient {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let server = self.server.clone();
        tokio::spawn(async move {
            server.handle_socket(server_side).await;
        });

        let (read, mut write) = tokio::io::split(client);
        write
            .write_all(request.as_bytes())
            .await
            .expect("writing upgrade request");

        WsClient {
            read,
            write,
            buf: BytesMut::new(),
        }
    }

    /// Perform a full handshake with a query-string token and consume the
    /// `connected` confirmation, returning a session-ready client.
    pub async fn connect(&self, token: &str) -> WsClient {
        let mut client = self.connect_raw(&upgrade_request(
            &format!("/ws/notifications?token={token}"),
            None,
        ))
        .await;

        let head = client.read_http_head().await.expect("handshake response");
        assert!(
            head.starts_with("HTTP/1.1 101"),
            "expected 101, got: {head}"
        );

        let connected = client.next_json().await;
        assert_eq!(connected["type"], "connected");
        client
    }
}

pub struct WsClient {
    pub read: ReadHalf<DuplexStream>,
    pub write: WriteHalf<DuplexStream>,
    buf: BytesMut,
}

impl WsClient {
    /// Read until the end of an HTTP header block; frame bytes that arrive
    /// behind it stay buffered. Returns `None` when the server destroyed
    /// the socket without writing anything.
    pub async fn read_http_head(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self
                .buf
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .map(|i| i + 4)
            {
                let head = self.buf.split_to(end);
                return Some(String::from_utf8_lossy(&head).into_owned());
            }
            let mut chunk = [0u8; 2048];
            match self.read.read(&mut chunk).await {
                Ok(0) => {
                    return if self.buf.is_empty() {
                        None
                    } else {
                        Some(String::from_utf8_lossy(&self.buf).into_owned())
                    };
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(_) => return None,
            }
        }
    }

    /// Next complete frame from the server. Panics if the stream ends first.
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf).expect("well-formed server frame") {
                return frame;
            }
            let mut chunk = [0u8; 2048];
            let n = self.read.read(&mut chunk).await.expect("reading frame");
            assert!(n > 0, "stream ended before a complete frame arrived");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next text frame, parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        let frame = self.next_frame().await;
        serde_json::from_slice(&frame.payload).expect("JSON text frame")
    }

    /// Write one masked client frame.
    pub async fn send_masked(&mut self, opcode: u8, payload: &[u8]) {
        assert!(payload.len() <= 125, "test frames use the short length form");
        let mask = [0x1Au8, 0x2B, 0x3C, 0x4D];
        let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        for (i, byte) in payload.iter().enumerate() {
            frame.push(byte ^ mask[i % 4]);
        }
        self.write
            .write_all(&frame)
            .await
            .expect("writing client frame");
    }

    /// Expect the server to destroy the socket without writing a byte.
    pub async fn expect_silent_drop(mut self) {
        let mut chunk = [0u8; 64];
        match self.read.read(&mut chunk).await {
            Ok(0) => {}
            Ok(n) => panic!("expected silent drop, got {n} bytes"),
            Err(_) => {}
        }
    }
}

pub fn upgrade_request(target: &str, cookie: Option<&str>) -> String {
    let cookie_line = cookie
        .map(|value| format!("Cookie: {value}\r\n"))
        .unwrap_or_default();
    format!(
        "GET {target} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         {cookie_line}\r\n"
    )
}

/// Poll until the condition holds or a short deadline passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}
