//! Application state shared across the transport and the handlers

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::game::maps::MapCatalog;
use crate::game::BattleService;
use crate::handlers;
use crate::net::ClientRegistry;
use crate::protocol::dispatch::Dispatcher;
use crate::store::AccountStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: AccountStore,
    pub clients: Arc<ClientRegistry>,
    pub battles: Arc<BattleService>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Map catalog: builtin stock maps, or an asset-pipeline export
        let maps = match &config.maps_file {
            Some(path) => match MapCatalog::from_file(path) {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load maps file, using builtin catalog");
                    MapCatalog::builtin()
                }
            },
            None => MapCatalog::builtin(),
        };

        let battles = Arc::new(BattleService::new(maps));
        let clients = Arc::new(ClientRegistry::new());
        let accounts = AccountStore::new();

        // Register every packet handler; duplicate ids panic here, at
        // startup, not mid-game.
        let dispatcher = Arc::new(handlers::build_dispatcher());

        Self {
            config,
            accounts,
            clients,
            battles,
            dispatcher,
        }
    }
}

#[cfg(test)]
pub fn test_state() -> AppState {
    AppState::new(Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "info".into(),
        client_origin: "*".into(),
        maps_file: None,
        self_destruct_delay_secs: 10,
    })
}
