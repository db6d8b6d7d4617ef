use crate::config::{
    Config, CoreConfig, NotificationConfig, RulesConfig, SignalsConfig, TradingConfig,
};
use crate::EngineError;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use smol_str::ToSmolStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONFIG_FILES: [&str; 5] = [
    "core.json",
    "trading.json",
    "signals.json",
    "rules.json",
    "notification.json",
];

/// Broadcast to subscribers after an atomic config swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    Reloaded,
}

/// Copy-on-write configuration store.
///
/// A reload parses & validates into a fresh immutable [`Config`], atomically
/// swaps the shared handle and broadcasts [`ConfigEvent::Reloaded`].
/// Subscribers observe either the old or the new config, never a torn mix.
/// An invalid reload keeps the old config active.
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    current: RwLock<Arc<Config>>,
    fingerprint: Mutex<Option<SystemTime>>,
    tx: broadcast::Sender<ConfigEvent>,
}

impl ConfigStore {
    /// Load & validate the config directory. Missing section files fall back
    /// to their defaults; present-but-invalid files are an error.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        let config = read_config_dir(&dir)?;

        config.validate().map_err(|violations| {
            EngineError::Configuration(violations.join("; ").to_smolstr())
        })?;

        let (tx, _) = broadcast::channel(16);
        let fingerprint = directory_fingerprint(&dir);

        info!(dir = %dir.display(), "configuration loaded");

        Ok(Self {
            dir,
            current: RwLock::new(Arc::new(config)),
            fingerprint: Mutex::new(fingerprint),
            tx,
        })
    }

    /// Cheap handle to the current immutable config.
    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.tx.subscribe()
    }

    /// Re-read the directory if its fingerprint changed. Returns `true` when
    /// a new config was swapped in.
    pub fn try_reload(&self) -> Result<bool, EngineError> {
        let fingerprint = directory_fingerprint(&self.dir);
        {
            let mut last = self.fingerprint.lock();
            if *last == fingerprint {
                return Ok(false);
            }
            *last = fingerprint;
        }

        let config = read_config_dir(&self.dir)?;
        config.validate().map_err(|violations| {
            EngineError::Configuration(violations.join("; ").to_smolstr())
        })?;

        *self.current.write() = Arc::new(config);
        let _ = self.tx.send(ConfigEvent::Reloaded);
        info!(dir = %self.dir.display(), "configuration reloaded");

        Ok(true)
    }
}

fn read_section<T>(dir: &Path, file: &str) -> Result<T, EngineError>
where
    T: DeserializeOwned + Default,
{
    let path = dir.join(file);
    if !path.exists() {
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|error| {
        EngineError::Configuration(format!("reading {}: {error}", path.display()).to_smolstr())
    })?;

    serde_json::from_str(&contents).map_err(|error| {
        EngineError::Configuration(format!("parsing {}: {error}", path.display()).to_smolstr())
    })
}

fn read_config_dir(dir: &Path) -> Result<Config, EngineError> {
    Ok(Config {
        core: read_section::<CoreConfig>(dir, "core.json")?,
        trading: read_section::<TradingConfig>(dir, "trading.json")?,
        signals: read_section::<SignalsConfig>(dir, "signals.json")?,
        rules: read_section::<RulesConfig>(dir, "rules.json")?,
        notification: read_section::<NotificationConfig>(dir, "notification.json")?,
    })
}

/// Most recent mtime across the section files, as the change fingerprint.
fn directory_fingerprint(dir: &Path) -> Option<SystemTime> {
    CONFIG_FILES
        .iter()
        .filter_map(|file| std::fs::metadata(dir.join(file)).ok())
        .filter_map(|metadata| metadata.modified().ok())
        .max()
}

/// Poll the config directory, hot-swapping on change until cancelled.
///
/// Reload failures keep the previous config & are surfaced through the
/// notifier by the caller observing the returned error log.
pub async fn run_config_watcher(
    store: Arc<ConfigStore>,
    poll_interval: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                match store.try_reload() {
                    Ok(true) => {}
                    Ok(false) => {}
                    Err(reload_error) => {
                        error!(%reload_error, "config reload failed, keeping previous config");
                    }
                }
            }
        }
    }

    warn!("config watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tiller-config-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_empty_dir_yields_defaults() {
        let dir = temp_dir("defaults");

        let store = ConfigStore::load(&dir).unwrap();

        assert_eq!(*store.current(), Config::default());
    }

    #[test]
    fn test_load_rejects_invalid_section() {
        let dir = temp_dir("invalid");
        std::fs::write(dir.join("trading.json"), "{\"max_positions\": 0}").unwrap();

        let result = ConfigStore::load(&dir);

        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_reload_swaps_and_broadcasts() {
        let dir = temp_dir("reload");
        let store = ConfigStore::load(&dir).unwrap();
        let mut rx = store.subscribe();

        std::fs::write(
            dir.join("trading.json"),
            "{\"market\": \"BUSD\", \"buy_max_cost\": \"500\"}",
        )
        .unwrap();

        assert!(store.try_reload().unwrap());
        assert_eq!(store.current().trading.market, "BUSD");
        assert_eq!(rx.try_recv().unwrap(), ConfigEvent::Reloaded);
    }

    #[test]
    fn test_failed_reload_keeps_previous_config() {
        let dir = temp_dir("bad-reload");
        let store = ConfigStore::load(&dir).unwrap();
        let before = store.current();

        std::fs::write(dir.join("rules.json"), "not json at all").unwrap();

        assert!(store.try_reload().is_err());
        assert_eq!(*store.current(), *before);
    }
}
