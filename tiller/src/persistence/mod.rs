use crate::portfolio::Account;
use crate::EngineError;
use smol_str::ToSmolStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Legacy account file import (one-shot migrator format contract).
pub mod legacy;

/// Append-only JSON-line trade log.
pub mod trade_log;

/// Durable on-disk form of the portfolio + positions.
///
/// One JSON document per run: `data/exchange-account.json` for live trading,
/// `data/virtual-account.json` for virtual. Saved after every reconciled
/// fill; memory plus the order log remain the source of truth when a save
/// fails.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    path: PathBuf,
}

impl AccountRepository {
    pub fn new(data_dir: impl AsRef<Path>, virtual_trading: bool) -> Self {
        let file = if virtual_trading {
            "virtual-account.json"
        } else {
            "exchange-account.json"
        };
        Self {
            path: data_dir.as_ref().join(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, account: &Account) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(account).map_err(|error| {
            EngineError::TransientIo(format!("serialising account: {error}").to_smolstr())
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                EngineError::TransientIo(
                    format!("creating {}: {error}", parent.display()).to_smolstr(),
                )
            })?;
        }

        std::fs::write(&self.path, json).map_err(|error| {
            EngineError::TransientIo(
                format!("writing {}: {error}", self.path.display()).to_smolstr(),
            )
        })?;

        debug!(path = %self.path.display(), "account persisted");
        Ok(())
    }

    /// Load a previously saved account; `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<Account>, EngineError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|error| {
            EngineError::TransientIo(
                format!("reading {}: {error}", self.path.display()).to_smolstr(),
            )
        })?;

        let account = serde_json::from_str(&contents).map_err(|error| {
            EngineError::TransientIo(
                format!("parsing {}: {error}", self.path.display()).to_smolstr(),
            )
        })?;

        info!(path = %self.path.display(), "account restored from disk");
        Ok(Some(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::Portfolio;
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;
    use tiller_instrument::Currency;

    #[test]
    fn test_save_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("tiller-repo-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let repository = AccountRepository::new(&dir, true);

        let account = Account::new(Portfolio::new(
            SmolStr::new("test"),
            Currency::new("USDT").unwrap(),
            dec!(10_000),
            5,
            dec!(100),
        ));

        repository.save(&account).unwrap();
        let restored = repository.load().unwrap().unwrap();

        assert_eq!(restored, account);
        assert!(repository.path().ends_with("virtual-account.json"));
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = std::env::temp_dir().join("tiller-repo-never-created");
        let repository = AccountRepository::new(&dir, false);

        assert_eq!(repository.load().unwrap(), None);
    }
}
