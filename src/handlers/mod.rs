//! Packet handlers
//!
//! Each submodule registers its handlers into the dispatcher; the full
//! table is assembled once at startup.

pub mod auth;
pub mod battle;
pub mod lobby;

use crate::protocol::dispatch::Dispatcher;

/// Build the complete id -> handler table. Panics on duplicate ids.
pub fn build_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    auth::register(&mut dispatcher);
    lobby::register(&mut dispatcher);
    battle::register(&mut dispatcher);
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::battle::{MoveCommand, ReadyToPlace, ReadyToSpawn, SelfDestruct};
    use crate::protocol::packets::lobby::CreateBattleRequest;
    use crate::protocol::packets::{auth::LoginRequest, ClientPacket};

    #[test]
    fn full_table_builds_and_covers_the_catalog() {
        let dispatcher = build_dispatcher();
        for id in [
            LoginRequest::ID,
            CreateBattleRequest::ID,
            ReadyToSpawn::ID,
            ReadyToPlace::ID,
            MoveCommand::ID,
            SelfDestruct::ID,
        ] {
            assert!(dispatcher.handles(id), "missing handler for id {id}");
        }
    }
}
