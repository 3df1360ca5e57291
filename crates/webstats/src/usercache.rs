//! Offline host built from the server's `usercache.json`
//!
//! Without a running server there is no live placeholder engine: every token
//! evaluates to itself, so stats come from the cache alone.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;
use webstats_core::MemoryHost;

#[derive(Debug, Deserialize)]
struct UserCacheEntry {
    name: String,
    uuid: Uuid,
}

/// Offline host knowing every player in `path`; a missing file means no players
pub async fn load_offline_host(path: &Path) -> Result<MemoryHost> {
    let host = MemoryHost::new();
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "No user cache found, player names are unknown");
            return Ok(host);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read user cache {}", path.display()))
        }
    };
    let entries: Vec<UserCacheEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse user cache {}", path.display()))?;

    for entry in &entries {
        host.add_player(entry.uuid, Some(&entry.name), false);
    }
    tracing::debug!(players = entries.len(), "Loaded user cache");
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use webstats_core::Host;

    #[tokio::test]
    async fn test_loads_players_offline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usercache.json");
        let id = Uuid::new_v4();
        std::fs::write(
            &path,
            format!(
                r#"[{{"name":"Alice","uuid":"{}","expiresOn":"2026-11-01 10:00:00 +0000"}}]"#,
                id
            ),
        )
        .unwrap();

        let host = load_offline_host(&path).await.unwrap();
        assert_eq!(host.known_players(), vec![id]);
        assert!(host.online_players().is_empty());
        assert_eq!(host.display_name(id).as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let host = load_offline_host(&dir.path().join("usercache.json")).await.unwrap();
        assert!(host.known_players().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usercache.json");
        std::fs::write(&path, "{").unwrap();
        assert!(load_offline_host(&path).await.is_err());
    }
}
