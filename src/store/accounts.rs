//! Account store boundary
//!
//! Real credential storage lives outside this server. This store keeps the
//! async surface a persistence backend would have, backed by an in-memory
//! map; the login handler awaits it, which makes it the canonical
//! suspension point of the dispatch layer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The slice of an account the engine needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub rank: i32,
}

#[derive(Clone, Default)]
pub struct AccountStore {
    accounts: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, username: &str) -> Option<UserProfile> {
        self.accounts
            .read()
            .await
            .get(&username.to_ascii_lowercase())
            .cloned()
    }

    /// Fetch the profile, creating a fresh rank-1 account for first-time
    /// names.
    pub async fn ensure(&self, username: &str) -> UserProfile {
        let key = username.to_ascii_lowercase();
        if let Some(profile) = self.accounts.read().await.get(&key) {
            return profile.clone();
        }

        let profile = UserProfile {
            username: username.to_owned(),
            rank: 1,
        };
        self.accounts
            .write()
            .await
            .entry(key)
            .or_insert_with(|| profile.clone())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_creates_then_reuses() {
        let store = AccountStore::new();
        assert!(store.get("driver").await.is_none());

        let created = store.ensure("Driver").await;
        assert_eq!(created.username, "Driver");
        assert_eq!(created.rank, 1);

        // Case-insensitive identity: the same account comes back.
        let again = store.ensure("driver").await;
        assert_eq!(again.username, "Driver");
        assert!(store.get("DRIVER").await.is_some());
    }
}
