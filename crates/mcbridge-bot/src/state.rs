//! Persisted bot state: bound channel, permission tree and server list.
//!
//! Stored as one JSON document with a `discord` section and a `servers`
//! section. The file is rewritten after every mutation by writing a sibling
//! temp file and renaming it over the old one.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mcbridge_core::{EndpointRecord, PermissionTree};

/// Chat-side section of the state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSection {
    /// Channel that plain chat is relayed from and to. Empty when unbound.
    #[serde(rename = "channelId", default)]
    pub channel_id: String,
    #[serde(rename = "controlChar", default)]
    pub control_char: String,
    #[serde(default)]
    pub perms: PermissionTree,
}

/// The whole state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(rename = "discord", default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub servers: Vec<EndpointRecord>,
}

impl StateFile {
    /// Read the state file. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "state file not found, starting empty");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read state at {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let state: StateFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state at {}", path.display()))?;
        debug!(path = %path.display(), servers = state.servers.len(), "loaded state");
        Ok(state)
    }

    /// Write the state file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("failed to serialize state")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}
