use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::{PipelineError, Result};

/// Bearer access token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Key/value credential storage injected into the pipeline
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<BearerToken>>;

    fn set(&self, key: &str, token: BearerToken) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Fetch a token that must be present
    fn require(&self, key: &str) -> Result<BearerToken> {
        self.get(key)?.ok_or_else(|| {
            PipelineError::MissingCredential(format!("no token stored under '{}'", key))
        })
    }
}

/// In-process token store
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, BearerToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(key: &str, token: BearerToken) -> Self {
        let store = Self::new();
        store
            .tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), token);
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<BearerToken>> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        Ok(tokens.get(key).cloned())
    }

    fn set(&self, key: &str, token: BearerToken) -> Result<()> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(key.to_string(), token);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(key);
        Ok(())
    }
}

/// Token store persisted as a JSON object on disk
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, BearerToken>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs_err::read_to_string(&self.path)
            .map_err(|e| PipelineError::TokenStore(e.to_string()))?;

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            PipelineError::TokenStore(format!("corrupt token file {}: {}", self.path.display(), e))
        })
    }

    fn write_all(&self, tokens: &HashMap<String, BearerToken>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|e| PipelineError::TokenStore(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(tokens)
            .map_err(|e| PipelineError::TokenStore(e.to_string()))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(|e| {
            PipelineError::TokenStore(format!("failed to open {}: {}", self.path.display(), e))
        })?;

        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| PipelineError::TokenStore(e.to_string()))?;
        }

        file.write_all(content.as_bytes())
            .map_err(|e| PipelineError::TokenStore(e.to_string()))
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<BearerToken>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, token: BearerToken) -> Result<()> {
        let mut tokens = self.read_all()?;
        tokens.insert(key.to_string(), token);
        self.write_all(&tokens)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut tokens = self.read_all()?;
        if tokens.remove(key).is_some() {
            self.write_all(&tokens)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_debug_redacts_secret() {
        let token = BearerToken::new("act.secret-value");
        assert_eq!(format!("{:?}", token), "BearerToken(***)");
        assert_eq!(token.secret(), "act.secret-value");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert!(store.get("access_token").unwrap().is_none());

        store.set("access_token", BearerToken::new("abc")).unwrap();
        assert_eq!(store.require("access_token").unwrap().secret(), "abc");

        store.remove("access_token").unwrap();
        let err = store.require("access_token").unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredential(_)));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tokens.json");

        let store = FileTokenStore::new(&path);
        assert!(store.get("access_token").unwrap().is_none());
        store.set("access_token", BearerToken::new("abc")).unwrap();
        store.set("other", BearerToken::new("xyz")).unwrap();

        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.get("access_token").unwrap(), Some(BearerToken::new("abc")));

        reopened.remove("access_token").unwrap();
        assert!(store.get("access_token").unwrap().is_none());
        assert_eq!(store.get("other").unwrap(), Some(BearerToken::new("xyz")));
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        fs_err::write(&path, "{not json").unwrap();

        let err = FileTokenStore::new(&path).get("access_token").unwrap_err();
        assert!(matches!(err, PipelineError::TokenStore(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        fs_err::write(&path, "{}").unwrap();
        fs_err::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileTokenStore::new(&path);
        store.set("access_token", BearerToken::new("abc")).unwrap();
        let mode = fs_err::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let fresh = dir.path().join("fresh").join("tokens.json");
        FileTokenStore::new(&fresh)
            .set("access_token", BearerToken::new("abc"))
            .unwrap();
        let mode = fs_err::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
