//! Per-connection session state
//!
//! One `Session` per live socket. Mutable state lives behind a single
//! `parking_lot::Mutex` and is only touched synchronously; no lock is ever
//! held across an await point, which is what keeps handler mutations atomic
//! with respect to other connections.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::packets::{encode, ServerPacket};
use crate::protocol::Vector3;
use crate::store::accounts::UserProfile;

/// Outbound queue depth per connection; slow consumers get disconnected by
/// backpressure rather than unbounded buffering.
const OUTBOUND_CAPACITY: usize = 256;

/// Protocol state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, not authenticated yet
    Login,
    /// Authenticated, browsing the battle list
    ChatLobby,
    /// Authenticated, in the garage, not in a battle
    ChatGarage,
    /// In a battle, battle-list overlay open
    BattleLobby,
    /// In a battle, garage overlay open
    BattleGarage,
    /// In a battle, battle view active
    Battle,
}

/// Combat life-cycle of the controlled tank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankState {
    /// No live tank: initial state, after destruction, while self-destruct
    /// is pending
    Dead,
    /// Placed on the field, not yet activated
    Newcome,
    /// Activated and vulnerable
    Active,
}

/// Spawn location reserved by "ready to spawn", consumed by "ready to place"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnReservation {
    pub position: Vector3,
    pub rotation: Vector3,
}

/// Messages on the per-connection writer channel
#[derive(Debug, Clone)]
pub enum Outgoing {
    Frame(Bytes),
    /// Force-disconnect: the writer task closes the socket
    Close,
}

/// Mutable, battle-scoped part of a session
pub struct SessionShared {
    pub state: SessionState,
    pub user: Option<UserProfile>,
    pub current_battle: Option<String>,
    pub last_viewed_battle: Option<String>,
    pub is_spectator: bool,
    pub tank: TankState,
    pub position: Option<Vector3>,
    pub orientation: Option<Vector3>,
    pub turret_angle: f32,
    pub turret_control: i8,
    pub current_health: i32,
    /// Bumped on every placement and every destruction; stale delayed
    /// effects compare against it and abort.
    pub incarnation: u16,
    pub pending_spawn: Option<SpawnReservation>,
    pub pending_equipment_respawn: bool,
    /// True while a self-destruct charge is ticking; duplicate requests are
    /// refused until it fires or the tank is placed again.
    pub self_destruct_pending: bool,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: SessionState::Login,
            user: None,
            current_battle: None,
            last_viewed_battle: None,
            is_spectator: false,
            tank: TankState::Dead,
            position: None,
            orientation: None,
            turret_angle: 0.0,
            turret_control: 0,
            current_health: 0,
            incarnation: 0,
            pending_spawn: None,
            pending_equipment_respawn: false,
            self_destruct_pending: false,
        }
    }

    /// Reset everything scoped to a battle so nothing leaks into the next
    /// one. Identity, lobby selection, and incarnation survive; a stale
    /// incarnation must keep invalidating timers from the previous life.
    pub fn clear_battle_state(&mut self) {
        self.current_battle = None;
        self.is_spectator = false;
        self.tank = TankState::Dead;
        self.position = None;
        self.orientation = None;
        self.turret_angle = 0.0;
        self.turret_control = 0;
        self.current_health = 0;
        self.pending_spawn = None;
        self.pending_equipment_respawn = false;
        self.self_destruct_pending = false;
    }
}

pub struct Session {
    pub id: Uuid,
    pub addr: SocketAddr,
    outbound: mpsc::Sender<Outgoing>,
    shared: Mutex<SessionShared>,
}

impl Session {
    pub fn new(addr: SocketAddr) -> (Arc<Self>, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            addr,
            outbound: tx,
            shared: Mutex::new(SessionShared::new()),
        });
        (session, rx)
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionShared> {
        self.shared.lock()
    }

    pub fn username(&self) -> Option<String> {
        self.shared.lock().user.as_ref().map(|u| u.username.clone())
    }

    pub fn current_battle(&self) -> Option<String> {
        self.shared.lock().current_battle.clone()
    }

    /// Queue one encoded packet. Best-effort: a full or closed queue means
    /// the peer is gone or about to be, and the frame is dropped.
    pub fn send<P: ServerPacket>(&self, packet: &P) {
        self.send_frame(encode(packet));
    }

    pub fn send_frame(&self, frame: Bytes) {
        if self.outbound.try_send(Outgoing::Frame(frame)).is_err() {
            debug!(peer = %self.addr, "outbound queue unavailable, frame dropped");
        }
    }

    /// Tear the connection down from server side. Used on protocol
    /// violations that indicate desynchronized client state.
    pub fn force_disconnect(&self) {
        let _ = self.outbound.try_send(Outgoing::Close);
    }
}
