//! Mapping file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::mapping::MappingTable;

/// Watches the mapping file and yields freshly parsed tables
pub struct MappingWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Arc<MappingTable>>,
}

impl MappingWatcher {
    /// Start watching `path`. Must be called from inside a Tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(10);

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();
        let watched = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        debug!("Mapping file changed: {:?}", event.paths);

                        let path = watched.clone();
                        let tx = tx.clone();

                        runtime_handle.spawn(async move {
                            // Debounce: wait a bit for file writes to complete
                            tokio::time::sleep(Duration::from_millis(100)).await;

                            match reload(&path).await {
                                Ok(table) => {
                                    info!("Mapping reloaded: {} entries", table.len());
                                    if let Err(e) = tx.send(Arc::new(table)).await {
                                        error!("Failed to send mapping update: {}", e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to reload mapping (keeping old table): {:#}", e);
                                }
                            }
                        });
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch mapping file: {}", path.display()))?;

        info!("Mapping file watcher started for: {}", path.display());

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next successfully parsed table.
    /// Returns None if the watcher has been closed
    pub async fn next_table(&mut self) -> Option<Arc<MappingTable>> {
        self.rx.recv().await
    }
}

async fn reload(path: &Path) -> Result<MappingTable> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;
    Ok(MappingTable::from_csv_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mapping_watcher_reloads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let map_path = temp_dir.path().join("map.csv");
        fs::write(&map_path, "1,74\n")?;

        let mut watcher = MappingWatcher::new(&map_path)?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&map_path, "1,75\n2,71\n")?;

        let table = tokio::time::timeout(Duration::from_secs(5), watcher.next_table())
            .await?
            .expect("watcher closed without a reload");

        assert_eq!(table.lookup(1), Some(75));
        assert_eq!(table.lookup(2), Some(71));
        Ok(())
    }

    #[tokio::test]
    async fn test_reload_rejects_malformed_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let map_path = temp_dir.path().join("map.csv");
        fs::write(&map_path, "1,x\n")?;

        assert!(reload(&map_path).await.is_err());
        Ok(())
    }
}
