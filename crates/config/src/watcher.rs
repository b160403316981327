use crate::schema::Config;
use arc_swap::ArcSwap;
use qingyan_types::{AgentCredentials, CredentialSource};
use std::{path::PathBuf, sync::Arc};

/// Watches a configuration file for changes and hot-reloads on modification.
///
/// Implements [`CredentialSource`], so a token fetcher built over a watcher
/// picks up rotated keys at its next refresh.
pub struct ConfigWatcher {
    /// Current configuration, atomically swappable.
    current: Arc<ArcSwap<Config>>,
    /// Path to the configuration file.
    path: PathBuf,
}

impl ConfigWatcher {
    /// Creates a new watcher from a file path, loading the initial configuration immediately.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the configuration file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn new(path: PathBuf) -> Result<Self, figment::Error> {
        let config = Config::from_file(&path)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path,
        })
    }

    /// Returns a snapshot of the current configuration.
    #[must_use]
    pub fn load(&self) -> arc_swap::Guard<Arc<Config>> {
        self.current.load()
    }

    /// Manually reloads the configuration from disk.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the configuration file cannot be read or parsed.
    /// The previous configuration stays active in that case.
    #[allow(clippy::result_large_err)]
    pub fn reload(&self) -> Result<(), figment::Error> {
        let new_config = Config::from_file(&self.path)?;
        self.current.store(Arc::new(new_config));
        Ok(())
    }

    /// Starts background file watching on the blocking pool; the
    /// configuration is reloaded whenever the file changes.
    ///
    /// # Errors
    ///
    /// Returns a [`notify::Error`] if the OS file watcher cannot be created or
    /// the path cannot be registered.
    pub fn watch(self: Arc<Self>) -> Result<(), notify::Error> {
        use notify::{RecursiveMode, Watcher as _};

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tokio::task::spawn_blocking(move || {
            // The watcher must live as long as the receive loop.
            let _watcher = watcher;
            for () in rx {
                match self.reload() {
                    Ok(()) => tracing::info!(path = %self.path.display(), "configuration reloaded"),
                    Err(e) => tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "configuration reload failed, keeping previous"
                    ),
                }
            }
        });
        Ok(())
    }
}

impl CredentialSource for ConfigWatcher {
    fn credentials(&self) -> AgentCredentials {
        self.current.load().agent.credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(path: &std::path::Path, content: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_watcher_initial_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "timeouts:\n  bootstrap_secs: 9\n");
        let watcher = ConfigWatcher::new(path).unwrap();
        assert_eq!(watcher.load().timeouts.bootstrap_secs, 9);
    }

    #[test]
    fn test_watcher_reload_rotates_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "agent:\n  api_key: old\n  api_secret: s\n");
        let watcher = ConfigWatcher::new(path.clone()).unwrap();
        assert_eq!(watcher.credentials().key_pair().unwrap().0, "old");

        write_config(&path, "agent:\n  api_key: new\n  api_secret: s\n");
        watcher.reload().unwrap();
        assert_eq!(watcher.credentials().key_pair().unwrap().0, "new");
    }

    #[test]
    fn test_reload_failure_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path, "timeouts:\n  stream_secs: 60\n");
        let watcher = ConfigWatcher::new(path.clone()).unwrap();

        write_config(&path, "timeouts: [not, a, map\n");
        assert!(watcher.reload().is_err());
        assert_eq!(watcher.load().timeouts.stream_secs, 60);
    }
}
