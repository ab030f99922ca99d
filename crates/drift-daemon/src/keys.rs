//! Mutable-name key provisioning, backed by `ipns_keys.json`.

use crate::cas::CasClient;
use anyhow::Context;
use drift_core::state::{read_json, write_json_atomic};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct KeyStore {
    path: PathBuf,
    keys: HashMap<String, String>,
}

impl KeyStore {
    /// Unreadable key maps are discarded: keys can always be rediscovered
    /// from the node.
    pub fn load(path: PathBuf) -> Self {
        let keys = match read_json(&path) {
            Ok(Some(keys)) => keys,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("failed to load key map: {e:#}");
                HashMap::new()
            }
        };
        Self { path, keys }
    }

    /// Resolve `name` to a key id: local map first, then the node's key
    /// list, then a fresh ed25519 key.
    pub async fn ensure(&mut self, cas: &CasClient, name: &str) -> anyhow::Result<String> {
        if let Some(id) = self.keys.get(name) {
            return Ok(id.clone());
        }

        let existing = cas
            .key_list()
            .await
            .context("listing keys on the store node")?;
        if let Some(key) = existing.into_iter().find(|k| k.name == name) {
            info!("found existing key: {} -> {}", key.name, key.id);
            self.remember(name, key.id.clone()).await;
            return Ok(key.id);
        }

        let id = cas
            .key_gen(name)
            .await
            .with_context(|| format!("generating key {name}"))?;
        info!("created key: {name} -> {id}");
        self.remember(name, id.clone()).await;
        Ok(id)
    }

    async fn remember(&mut self, name: &str, id: String) {
        self.keys.insert(name.to_string(), id);
        if let Err(e) = write_json_atomic(&self.path, &self.keys).await {
            warn!("failed to save key map: {e:#}");
        }
    }
}
