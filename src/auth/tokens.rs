//! Token storage and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::SessionUser;

/// Access/refresh token pair. Stored together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Everything the store persists for one signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub tokens: TokenPair,
    pub user: SessionUser,
}

/// Token store trait for different storage backends.
///
/// Each call observes or replaces the whole session: there is no way to read
/// or write one key on its own.
pub trait TokenStore: Send + Sync {
    fn save(&self, tokens: &TokenPair, user: &SessionUser) -> Result<()>;
    fn load(&self) -> Option<StoredSession>;
    fn clear(&self) -> Result<()>;

    fn access_token(&self) -> Option<String> {
        self.load().map(|s| s.tokens.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.load().map(|s| s.tokens.refresh_token)
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<StoredSession>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, tokens: &TokenPair, user: &SessionUser) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(StoredSession {
            tokens: tokens.clone(),
            user: user.clone(),
        });
        Ok(())
    }

    fn load(&self) -> Option<StoredSession> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// On-disk layout of `session.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<SessionUser>,
}

/// TOML-file store in the user's config directory.
pub struct FileTokenStore {
    path: PathBuf,
    // Serialises writers within this process; rename keeps readers consistent.
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at the default location (`<config dir>/session.toml`).
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::Config::session_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<Option<SessionFile>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read session file")?;
        let file = toml::from_str(&content).context("Failed to parse session file")?;
        Ok(Some(file))
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, tokens: &TokenPair, user: &SessionUser) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let file = SessionFile {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
            user: Some(user.clone()),
        };
        let content = toml::to_string_pretty(&file).context("Failed to serialize session")?;

        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).context("Failed to write session file")?;

        // Set restrictive permissions before the file becomes visible (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&tmp, perms).context("Failed to set session permissions")?;
        }

        fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }

    fn load(&self) -> Option<StoredSession> {
        let file = match self.read_file() {
            Ok(Some(file)) => file,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Ignoring unreadable session file: {:#}", e);
                return None;
            }
        };

        match file {
            SessionFile {
                access_token: Some(access_token),
                refresh_token: Some(refresh_token),
                user: Some(user),
            } if !access_token.is_empty() && !refresh_token.is_empty() => Some(StoredSession {
                tokens: TokenPair {
                    access_token,
                    refresh_token,
                },
                user,
            }),
            _ => {
                tracing::warn!(
                    "Ignoring incomplete session file at {}",
                    self.path.display()
                );
                None
            }
        }
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}
