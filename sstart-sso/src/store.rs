//! Token persistence: keyring first, file fallback.

use std::path::{Path, PathBuf};

use sstart_types::Tokens;

use crate::error::AuthError;

/// Keyring service name for the token record.
const SERVICE: &str = "sstart";

/// Keyring account name for the token record.
const ACCOUNT: &str = "sso-tokens";

/// Persists the token record across process restarts.
///
/// Writes try the OS keyring first; on success any stale file copy is
/// removed. When the keyring refuses, the record lands in
/// `$XDG_CONFIG_HOME/sstart/tokens.json` with mode 0600 (directory 0700).
/// Loads reverse the order; a corrupt keyring record is deleted and the
/// file consulted instead.
pub struct TokenStore {
    file_path: PathBuf,
    use_keyring: bool,
}

impl TokenStore {
    /// The default store: keyring plus the XDG fallback file.
    pub fn new() -> Self {
        Self {
            file_path: default_token_path(),
            use_keyring: true,
        }
    }

    /// A file-only store at an explicit path. Used by tests and by
    /// deployments that opt out of the keyring.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: path.into(),
            use_keyring: false,
        }
    }

    /// Where the fallback file lives.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Persist the record, preferring the keyring.
    pub fn save(&self, tokens: &Tokens) -> Result<(), AuthError> {
        let json = serde_json::to_string(tokens).map_err(|e| AuthError::Storage(e.to_string()))?;

        if self.use_keyring && keyring_set(&json) {
            // The keyring copy is now authoritative; a stale file would
            // shadow future deletes.
            let _ = std::fs::remove_file(&self.file_path);
            return Ok(());
        }

        self.write_file(&json)
    }

    /// Load the record. `Ok(None)` means neither store has one.
    pub fn load(&self) -> Result<Option<Tokens>, AuthError> {
        if self.use_keyring {
            if let Some(json) = keyring_get() {
                match serde_json::from_str::<Tokens>(&json) {
                    Ok(tokens) => return Ok(Some(tokens)),
                    Err(err) => {
                        tracing::warn!(error = %err, "deleting unparseable keyring token record");
                        keyring_delete();
                    }
                }
            }
        }

        match std::fs::read_to_string(&self.file_path) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AuthError::Storage(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }

    /// Remove the record from both stores.
    pub fn clear(&self) -> Result<(), AuthError> {
        if self.use_keyring {
            keyring_delete();
        }
        match std::fs::remove_file(&self.file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }

    fn write_file(&self, json: &str) -> Result<(), AuthError> {
        if let Some(dir) = self.file_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| AuthError::Storage(e.to_string()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
            }
        }
        std::fs::write(&self.file_path, json).map_err(|e| AuthError::Storage(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.file_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

fn default_token_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sstart")
        .join("tokens.json")
}

fn keyring_set(json: &str) -> bool {
    let Ok(entry) = keyring::Entry::new(SERVICE, ACCOUNT) else {
        return false;
    };
    match entry.set_password(json) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(error = %err, "keyring write failed; falling back to file");
            false
        }
    }
}

fn keyring_get() -> Option<String> {
    let entry = keyring::Entry::new(SERVICE, ACCOUNT).ok()?;
    entry.get_password().ok()
}

fn keyring_delete() {
    if let Ok(entry) = keyring::Entry::new(SERVICE, ACCOUNT) {
        let _ = entry.delete_credential();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Tokens {
        Tokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            id_token: None,
            token_type: Some("Bearer".into()),
            expiry: None,
        }
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_file(dir.path().join("tokens.json"));

        assert!(store.load().unwrap().is_none());
        store.save(&tokens()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "at");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn clear_removes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_file(dir.path().join("tokens.json"));
        store.save(&tokens()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn clear_on_empty_store_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_file(dir.path().join("tokens.json"));
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_file(dir.path().join("sub").join("tokens.json"));
        store.save(&tokens()).unwrap();

        let mode = std::fs::metadata(store.file_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(store.file_path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();
        let store = TokenStore::with_file(&path);
        assert!(matches!(store.load(), Err(AuthError::Storage(_))));
    }
}
