//! WebSocket connection management
//!
//! A [`Connection`] is the registry's handle to one live client session. All
//! writes to the client go through the connection's outbound queue, which is
//! drained by a single writer task, so frames from concurrent broadcasts never
//! interleave on the wire.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use helpdesk_shared::{TenantId, UserRole};

use crate::auth::Identity;

/// Liveness of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a frame could not be queued for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound buffer is full")]
    Backpressure,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: String,

    /// Tenant this connection is tagged with
    pub tenant_id: TenantId,

    /// Role from the identity claims
    pub role: UserRole,

    /// Queue drained by the writer task
    sender: mpsc::Sender<Message>,

    /// Flipped to `true` once the connection is being torn down
    shutdown: watch::Sender<bool>,

    state: AtomicU8,
}

impl Connection {
    /// Create a new connection and the receiving half of its outbound queue
    pub fn new(identity: Identity, buffer: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let (shutdown, _) = watch::channel(false);

        let conn = Self {
            session_id: Uuid::new_v4(),
            user_id: identity.user_id,
            tenant_id: identity.tenant_id,
            role: identity.role,
            sender,
            shutdown,
            state: AtomicU8::new(ConnectionState::Open as u8),
        };

        (conn, receiver)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame without waiting
    pub fn deliver(&self, frame: Message) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }

        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Begin tearing the connection down.
    ///
    /// Returns `false` if it was already closing or closed.
    pub(super) fn begin_close(&self) -> bool {
        let first = self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        self.shutdown.send_replace(true);
        first
    }

    fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Resolves once the connection starts closing
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            // Sender lives as long as the connection; an error means it is gone
            let _ = rx.wait_for(|closing| *closing).await;
        }
    }
}

/// How a writer task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// Connection was closed by the registry or the queue was dropped
    Shutdown,
    /// A write failed or missed its deadline
    Dead,
}

/// Turn a raw broker payload into a frame, text when it is valid UTF-8.
pub fn frame_for(payload: &[u8]) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::Text(text.to_string()),
        Err(_) => Message::Binary(payload.to_vec()),
    }
}

/// Drain a connection's outbound queue into its sink.
///
/// Every write is bounded by `write_timeout`. The task ends on the first
/// failed or late write, or when the connection starts closing; a close frame
/// is then attempted under the same deadline.
pub async fn write_loop<S>(
    conn: &Connection,
    mut sink: S,
    mut outbound: mpsc::Receiver<Message>,
    write_timeout: Duration,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let closed = conn.closed();
    tokio::pin!(closed);

    let exit = loop {
        tokio::select! {
            biased;
            _ = &mut closed => break WriterExit::Shutdown,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break WriterExit::Shutdown;
                };

                match tokio::time::timeout(write_timeout, sink.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(
                            session_id = %conn.session_id,
                            error = %e,
                            "WebSocket write failed"
                        );
                        break WriterExit::Dead;
                    }
                    Err(_) => {
                        tracing::warn!(
                            session_id = %conn.session_id,
                            timeout_ms = write_timeout.as_millis() as u64,
                            "WebSocket write timed out"
                        );
                        break WriterExit::Dead;
                    }
                }
            }
        }
    };

    if exit == WriterExit::Shutdown {
        let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(None))).await;
    }
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;

    conn.mark_closed();
    exit
}
