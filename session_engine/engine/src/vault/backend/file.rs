use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

use crate::config::DevConfig;
use crate::error::SessionError;
use crate::vault::Vault;
use crate::vault::backend::{VaultStore, matches_prefix};

const LOCK_FILE: &str = ".operation.lock";

/// One JSON file per vault under a directory (`~/.vultisig/vaults` by default).
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    dir: PathBuf,
}

impl FileVaultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileVaultStore { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        DevConfig::home_dir().join("vaults")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, vault: &Vault) -> PathBuf {
        self.dir.join(vault.file_name())
    }

    fn ensure_dir(&self) -> Result<(), SessionError> {
        fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Takes the single-operation lock for this vault directory. Held until
    /// the returned guard is dropped.
    pub fn lock(&self) -> Result<OperationLock, SessionError> {
        self.ensure_dir()?;
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| SessionError::LockHeld(self.dir.display().to_string()))?;

        debug!(path = %path.display(), "Acquired vault operation lock");
        Ok(OperationLock { _file: file })
    }

    fn read_vault(path: &Path) -> Result<Vault, SessionError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn json_files(&self) -> Result<Vec<PathBuf>, SessionError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if is_json && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl VaultStore for FileVaultStore {
    /// Writes to a temporary sibling and renames it over the old record, so a
    /// reader sees either the previous vault or the new one.
    fn save(&self, vault: &Vault) -> Result<(), SessionError> {
        vault.validate()?;
        self.ensure_dir()?;

        let path = self.path_of(vault);
        let tmp = self.dir.join(format!(".{}.tmp", vault.file_name()));
        write_private(&tmp, &serde_json::to_vec_pretty(vault)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "Saved vault");
        Ok(())
    }

    fn load(&self, prefix: &str) -> Result<Vault, SessionError> {
        for path in self.json_files()? {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if matches_prefix(name, prefix) {
                return Self::read_vault(&path);
            }
        }
        Err(SessionError::VaultError(format!("vault not found: {prefix}")))
    }

    /// Unreadable files are skipped with a warning.
    fn list(&self) -> Result<Vec<Vault>, SessionError> {
        let mut vaults = Vec::new();
        for path in self.json_files()? {
            match Self::read_vault(&path) {
                Ok(vault) => vaults.push(vault),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable vault file"),
            }
        }
        Ok(vaults)
    }

    /// Removes the vault files; the lock file and directory stay.
    fn clear(&self) -> Result<(), SessionError> {
        for path in self.json_files()? {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "Removed vault");
        }
        Ok(())
    }
}

/// Writes `data` to `path` readable by the owner only (0600 on unix).
pub(crate) fn write_private(path: &Path, data: &[u8]) -> Result<(), SessionError> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // mode only applies on create
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Guard for the single-operation lock; released when dropped.
#[derive(Debug)]
pub struct OperationLock {
    _file: File,
}
