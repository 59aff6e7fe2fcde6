//! Connection wrapper over a raw duplex socket.
//!
//! Adapts one accepted, already-handshaken socket into a small uniform
//! surface: `send` / `ping` / `pong` / `close`, plus a read loop that runs
//! inbound bytes through the frame codec and dispatches by opcode. The
//! write half is boxed so tests can drive connections over in-memory
//! duplex pipes instead of TCP sockets.

use bytes::BytesMut;
use log::{debug, warn};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::WsError;
use super::frame::{Opcode, decode_frame, encode_frame};

/// Ready state: open immediately after construction (the handshake has
/// already succeeded), closed forever after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Open = 1,
    Closed = 3,
}

type WriteBox = Box<dyn AsyncWrite + Send + Unpin>;
type CloseHook = Box<dyn FnOnce() + Send>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live, authenticated client connection.
///
/// Owned by exactly one hub entry for exactly one user id, decided at
/// handshake time and never changed.
pub struct Connection {
    id: u64,
    user_id: i64,
    state: AtomicU8,
    writer: tokio::sync::Mutex<WriteBox>,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl Connection {
    /// Wrap the write half of a freshly upgraded socket.
    pub fn new(user_id: i64, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            state: AtomicU8::new(ReadyState::Open as u8),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            close_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Process-unique connection id, used as the hub's set key.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The user this connection was registered under at handshake.
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.state.load(Ordering::SeqCst) == ReadyState::Open as u8 {
            ReadyState::Open
        } else {
            ReadyState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Register a hook to run when the connection closes. Hooks run exactly
    /// once, however the connection terminates.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.close_hooks.lock().expect("close hooks lock");
        if self.is_open() {
            hooks.push(Box::new(hook));
        } else {
            // Closed before the hook was attached: run it immediately so
            // cleanup still happens.
            drop(hooks);
            hook();
        }
    }

    /// Send one unmasked text frame. No-op unless the connection is open;
    /// a write failure closes the connection and surfaces the error.
    pub async fn send(&self, text: &str) -> Result<(), WsError> {
        if !self.is_open() {
            return Ok(());
        }
        self.write_frame(encode_frame(text.as_bytes(), Opcode::Text))
            .await
    }

    /// Send a protocol-level ping (keepalive).
    pub async fn ping(&self) -> Result<(), WsError> {
        if !self.is_open() {
            return Ok(());
        }
        self.write_frame(encode_frame(&[], Opcode::Ping)).await
    }

    /// Answer an inbound ping, echoing its payload.
    pub async fn pong(&self, payload: &[u8]) -> Result<(), WsError> {
        if !self.is_open() {
            return Ok(());
        }
        self.write_frame(encode_frame(payload, Opcode::Pong)).await
    }

    async fn write_frame(&self, bytes: Vec<u8>) -> Result<(), WsError> {
        let result = {
            let mut writer = self.writer.lock().await;
            async {
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                Ok::<_, std::io::Error>(())
            }
            .await
        };

        if let Err(err) = result {
            // Keep internal state consistent: a failed write means the
            // socket is gone, so tear the connection down.
            self.close().await;
            return Err(WsError::Io(err));
        }
        Ok(())
    }

    /// Close the connection. Idempotent: transitions state, ends the
    /// socket, and fires the close hooks exactly once no matter how many
    /// callers race here.
    pub async fn close(&self) {
        let was_open = self
            .state
            .compare_exchange(
                ReadyState::Open as u8,
                ReadyState::Closed as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !was_open {
            return;
        }

        let hooks = {
            let mut hooks = self.close_hooks.lock().expect("close hooks lock");
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook();
        }

        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.ready_state())
            .finish()
    }
}

/// Drive the inbound side of a connection until it terminates.
///
/// `head` carries any bytes the handshake already read past the header end.
/// Frames are decoded out of an accumulating buffer, so frames split across
/// socket reads are reassembled rather than dropped.
pub async fn read_loop(
    conn: &Connection,
    mut reader: impl AsyncRead + Send + Unpin,
    head: BytesMut,
) {
    let mut buf = head;
    let mut chunk = [0u8; 8 * 1024];

    loop {
        loop {
            match decode_frame(&mut buf) {
                Ok(Some(frame)) => match frame.opcode {
                    Opcode::Text | Opcode::Binary => {
                        // Message event. The protocol defines no inbound
                        // client commands, so there is nothing to act on.
                        debug!(
                            "message from user {} connection {}: {} bytes",
                            conn.user_id(),
                            conn.id(),
                            frame.payload.len()
                        );
                    }
                    Opcode::Ping => {
                        if conn.pong(&frame.payload).await.is_err() {
                            return;
                        }
                    }
                    Opcode::Pong => {}
                    Opcode::Close => {
                        conn.close().await;
                        return;
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    // Malformed frame: close defensively, no resync.
                    warn!(
                        "frame decode error on connection {}: {}",
                        conn.id(),
                        err
                    );
                    conn.close().await;
                    return;
                }
            }
        }

        match reader.read(&mut chunk).await {
            Ok(0) => {
                conn.close().await;
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                debug!("read error on connection {}: {}", conn.id(), err);
                conn.close().await;
                return;
            }
        }
    }
}
