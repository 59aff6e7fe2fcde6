//! Upgrade router and accept loop.
//!
//! Owns the raw TCP listener: reads the HTTP head off each accepted socket,
//! routes eligible upgrades on `/ws/notifications` through the handshake,
//! and destroys everything else without writing a byte. Successful upgrades
//! become hub-registered [`Connection`]s driven by the frame read loop.

use anyhow::Result;
use bytes::BytesMut;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::auth::{AuthError, AuthState};
use crate::user::{User, UserRepository};

use super::connection::{Connection, read_loop};
use super::handshake::{
    UNAUTHORIZED_RESPONSE, build_accept_response, find_header_end, parse_upgrade,
};
use super::hub::Hub;
use super::types::ServerEvent;

/// The only upgrade path this service accepts.
pub const UPGRADE_PATH: &str = "/ws/notifications";

/// Cap on buffered handshake bytes before the socket is dropped.
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// WebSocket server: accept loop plus everything the handshake needs.
pub struct WsServer {
    hub: Arc<Hub>,
    auth: AuthState,
    users: UserRepository,
    keepalive: Duration,
}

impl WsServer {
    pub fn new(
        hub: Arc<Hub>,
        auth: AuthState,
        users: UserRepository,
        keepalive: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub,
            auth,
            users,
            keepalive,
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Accept connections until the shutdown future resolves.
    pub async fn run(
        self: &Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {}", peer);
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_socket(stream).await;
                            });
                        }
                        Err(err) => warn!("accept error: {}", err),
                    }
                }
            }
        }

        Ok(())
    }

    /// Drive one raw socket from HTTP head to connection teardown.
    ///
    /// Generic over the stream so tests can run the full path over an
    /// in-memory duplex pipe.
    pub async fn handle_socket(
        self: Arc<Self>,
        stream: impl AsyncRead + AsyncWrite + Send + Unpin + 'static,
    ) {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        // Read until the header block is complete.
        let mut buf = BytesMut::with_capacity(2048);
        let mut chunk = [0u8; 2048];
        let header_end = loop {
            if let Some(end) = find_header_end(&buf) {
                break end;
            }
            if buf.len() > MAX_HANDSHAKE_BYTES {
                debug!("handshake exceeded {} bytes, dropping", MAX_HANDSHAKE_BYTES);
                return;
            }
            match read_half.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(_) => return,
            }
        };

        // Bytes past the header end ("head") are seeded into the frame
        // buffer so nothing the client pipelined is lost.
        let head_bytes = buf.split_to(header_end);

        let request = match parse_upgrade(&head_bytes) {
            Ok(request) => request,
            Err(err) => {
                debug!("rejecting non-upgrade request: {}", err);
                return;
            }
        };

        if request.path != UPGRADE_PATH {
            debug!("rejecting upgrade on path {}", request.path);
            return;
        }

        let user = match self.authenticate(request.auth_token()).await {
            Ok(user) => user,
            Err(err) => {
                warn!("handshake auth failed: {}", err);
                let _ = write_half.write_all(UNAUTHORIZED_RESPONSE).await;
                return;
            }
        };

        if write_half
            .write_all(&build_accept_response(&request.key))
            .await
            .is_err()
        {
            return;
        }

        let conn = Arc::new(Connection::new(user.id, write_half));
        self.hub.subscribe(conn.clone());
        info!(
            "websocket session established for user {} (connection {})",
            user.id,
            conn.id()
        );

        if conn.send(&ServerEvent::connected_json()).await.is_err() {
            return;
        }

        // Keepalive: protocol-level pings on an interval; a failed write
        // closes the connection through the normal path.
        let keepalive_conn = conn.clone();
        let keepalive_interval = self.keepalive;
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if !keepalive_conn.is_open() || keepalive_conn.ping().await.is_err() {
                    break;
                }
            }
        });

        read_loop(&conn, read_half, buf).await;
        conn.close().await;
        keepalive.abort();

        info!(
            "websocket session ended for user {} (connection {})",
            user.id,
            conn.id()
        );
    }

    /// Resolve the handshake's token to a known user.
    async fn authenticate(&self, token: Option<String>) -> Result<User, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let claims = self.auth.validate_token(&token)?;
        let user_id: i64 = claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidToken(format!("non-numeric subject: {}", claims.sub)))?;

        self.users
            .get(user_id)
            .await
            .map_err(|err| AuthError::Internal(err.to_string()))?
            .ok_or(AuthError::UnknownUser)
    }
}
