//! Network layer: sessions, the live-connection registry, and the
//! WebSocket transport carrying the binary protocol

pub mod handler;
pub mod registry;
pub mod session;

pub use registry::ClientRegistry;
pub use session::{Session, SessionState};
