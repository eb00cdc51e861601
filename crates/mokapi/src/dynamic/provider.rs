//! Configuration providers.

use super::Config;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Output of a provider.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A document was read for the first time or its content changed.
    Changed(Config),
    /// A previously emitted document disappeared.
    Removed { key: String },
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Emit documents until `shutdown` fires.
    async fn run(
        &self,
        tx: mpsc::Sender<ProviderEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct FileProviderConfig {
    pub filenames: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    pub skip_prefix: Vec<String>,
    pub include: Vec<String>,
}

/// Reads files and directories and polls them for changes.
pub struct FileProvider {
    config: FileProviderConfig,
}

impl FileProvider {
    pub fn new(config: FileProviderConfig) -> Self {
        Self { config }
    }

    fn skipped(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        self.config.skip_prefix.iter().any(|p| name.starts_with(p.as_str()))
    }

    fn included(&self, path: &Path) -> bool {
        if self.config.include.is_empty() {
            return true;
        }
        let name = path.to_string_lossy();
        self.config
            .include
            .iter()
            .any(|pattern| name.ends_with(pattern.trim_start_matches('*')))
    }

    /// Current files with their modification time.
    fn scan(&self) -> HashMap<PathBuf, SystemTime> {
        let mut found = HashMap::new();
        for file in &self.config.filenames {
            if let Some(mtime) = modified(file) {
                found.insert(file.clone(), mtime);
            }
        }
        for dir in &self.config.directories {
            self.walk(dir, &mut found);
        }
        found
    }

    fn walk(&self, dir: &Path, found: &mut HashMap<PathBuf, SystemTime>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("unable to read directory {}: {}", dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if self.skipped(&path) {
                continue;
            }
            if path.is_dir() {
                self.walk(&path, found);
            } else if self.included(&path) {
                if let Some(mtime) = modified(&path) {
                    found.insert(path, mtime);
                }
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn file_url(path: &Path) -> String {
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn run(
        &self,
        tx: mpsc::Sender<ProviderEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let mut known: HashMap<PathBuf, SystemTime> = HashMap::new();
        let mut urls: HashMap<PathBuf, String> = HashMap::new();
        let mut interval = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.recv() => {
                    debug!("file provider stopped");
                    return Ok(());
                }
            }

            let current = self.scan();

            for (path, mtime) in &current {
                if known.get(path) == Some(mtime) {
                    continue;
                }
                let raw = match tokio::fs::read(path).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        error!("unable to read file {}: {}", path.display(), e);
                        continue;
                    }
                };
                let url = urls.entry(path.clone()).or_insert_with(|| file_url(path));
                let mut config = Config::new(self.name(), url, raw);
                config.last_modified = (*mtime).into();
                if tx.send(ProviderEvent::Changed(config)).await.is_err() {
                    return Ok(());
                }
            }

            for path in known.keys().filter(|p| !current.contains_key(*p)) {
                let Some(key) = urls.remove(path) else { continue };
                if tx.send(ProviderEvent::Removed { key }).await.is_err() {
                    return Ok(());
                }
            }

            known = current;
        }
    }
}
