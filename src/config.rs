//! Persistence of [`crate::account::Account`] configuration as TOML,
//! following the load/save/permissions pattern used by desktop-CLI
//! mail clients in this ecosystem.

use anyhow::{Context, Result, anyhow};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::account::Account;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Read every configured [`Account`] from the per-user config file.
///
/// Returns an empty list (not an error) when the file does not yet
/// exist, matching a first-run experience.
pub fn load_accounts() -> Result<Vec<Account>> {
    let path = accounts_path()?;
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("reading account config at {}", path.display()))?;
    let file: AccountsFile = toml::from_str(&content)
        .with_context(|| format!("parsing account config at {}", path.display()))?;
    Ok(file.accounts)
}

/// Persist the full account list, replacing any prior content.
pub fn save_accounts(accounts: &[Account]) -> Result<()> {
    let path = accounts_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = AccountsFile {
        accounts: accounts.to_vec(),
    };
    let content = toml::to_string_pretty(&file)?;
    fs::write(&path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&path, perms)?;
    }

    Ok(())
}

fn accounts_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("accounts.toml"))
}

fn config_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("cannot determine config directory"))?;
    Ok(base_dirs.config_dir().join("corkboard"))
}

/// The per-user data directory layout: `index.db`, `ics/`, and
/// `sync.log` all live under this root.
pub fn data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(base_dirs.data_dir().join("corkboard"))
}

pub fn index_db_path(dir: &Path) -> PathBuf {
    dir.join("index.db")
}

pub fn ics_blob_dir(dir: &Path) -> PathBuf {
    dir.join("ics")
}

pub fn sync_log_path(dir: &Path) -> PathBuf {
    dir.join("sync.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Collection, SourceKind};

    #[test]
    fn roundtrips_through_toml() {
        let account = Account {
            id: "acct-1".into(),
            name: "Work".into(),
            server_url: "https://cal.example.com/".into(),
            username: "jdoe".into(),
            password: "hunter2".into(),
            enabled: true,
            collections: vec![Collection::new(
                "https://cal.example.com/dav/jdoe/personal/",
                "Personal",
                SourceKind::Caldav,
            )],
            home_url: Some("https://cal.example.com/dav/jdoe/".into()),
        };
        let file = AccountsFile {
            accounts: vec![account],
        };
        let toml_text = toml::to_string_pretty(&file).unwrap();
        let parsed: AccountsFile = toml::from_str(&toml_text).unwrap();
        assert_eq!(parsed.accounts.len(), 1);
        assert_eq!(parsed.accounts[0].username, "jdoe");
    }
}
