//! Packet-id dispatch
//!
//! Maps each packet id to exactly one async handler. Registration of two
//! handlers for the same id is a startup configuration error and panics.
//! At runtime every failure is scoped to the offending frame: unknown ids
//! and decode errors drop the frame, handler errors are logged with the
//! session context, and the connection stays open in all three cases.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::AppState;
use crate::net::session::Session;

use super::codec::{BufferReader, CodecError};
use super::packets::{split_frame, ClientPacket};

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type DecodeAndRun =
    Box<dyn Fn(Arc<Session>, AppState, &[u8]) -> Result<HandlerFuture, CodecError> + Send + Sync>;

struct Entry {
    name: &'static str,
    decode_and_run: DecodeAndRun,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<i32, Entry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for packet type `P`. Panics on a duplicate id.
    pub fn register<P, F, Fut>(&mut self, handler: F)
    where
        P: ClientPacket,
        F: Fn(Arc<Session>, AppState, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let entry = Entry {
            name: P::NAME,
            decode_and_run: Box::new(move |session, state, payload| {
                let mut reader = BufferReader::new(payload);
                let packet = P::read(&mut reader)?;
                Ok(Box::pin(handler(session, state, packet)))
            }),
        };

        if let Some(previous) = self.handlers.insert(P::ID, entry) {
            panic!(
                "duplicate packet id {}: {} clashes with {}",
                P::ID,
                P::NAME,
                previous.name
            );
        }
    }

    pub fn handles(&self, id: i32) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one inbound frame. Never propagates an error to the caller.
    pub async fn dispatch(&self, session: &Arc<Session>, state: &AppState, frame: &[u8]) {
        let (id, payload) = match split_frame(frame) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(peer = %session.addr, error = %e, "malformed frame header, dropped");
                return;
            }
        };

        let Some(entry) = self.handlers.get(&id) else {
            debug!(peer = %session.addr, packet_id = id, "unknown packet id, frame dropped");
            return;
        };

        match (entry.decode_and_run)(session.clone(), state.clone(), payload) {
            Err(e) => {
                warn!(
                    peer = %session.addr,
                    packet = entry.name,
                    error = %e,
                    "frame decode failed, dropped"
                );
            }
            Ok(future) => {
                if let Err(e) = future.await {
                    warn!(
                        peer = %session.addr,
                        packet = entry.name,
                        user = session.username().as_deref().unwrap_or("-"),
                        error = %e,
                        "packet handler failed"
                    );
                }
            }
        }
    }
}
