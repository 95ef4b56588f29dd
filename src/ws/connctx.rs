use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

pub type ConnId = u64;

/// Identity of a registered connection.
#[derive(Clone, Debug)]
pub struct ConnCtx {
    pub conn_id: ConnId,
    pub user_id: String,
    pub firm_id: String,
    pub room_id: String,
}

/// What a connection's writer task puts on the socket.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Arc<Vec<u8>>),
    Ping,
    Close { code: u16, reason: String },
}

/// A connection as held by its room.
///
/// Dropping the handle closes the outbound channel, which ends the writer task
/// and with it the socket.
#[derive(Debug)]
pub struct ConnHandle {
    pub ctx: ConnCtx,
    tx: mpsc::Sender<Outbound>,
    /// Awareness client ids created by this connection.
    pub controlled: HashSet<u64>,
}

impl ConnHandle {
    pub fn new(ctx: ConnCtx, tx: mpsc::Sender<Outbound>) -> Self {
        Self { ctx, tx, controlled: HashSet::new() }
    }

    /// Queue a frame without waiting. `false` means the peer is gone or too slow.
    pub fn send(&self, frame: Arc<Vec<u8>>) -> bool {
        self.tx.try_send(Outbound::Frame(frame)).is_ok()
    }
}
