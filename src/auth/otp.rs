//! OTP resend cooldowns
//!
//! One entry per normalised e-mail holding the unix-ms instant the cooldown
//! ends. The file-backed variant keeps them across CLI invocations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Minimum spacing between two OTP e-mails to the same address.
pub const OTP_COOLDOWN: Duration = Duration::from_secs(60);

/// On-disk layout of `otp.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CooldownFile {
    #[serde(default)]
    cooldowns: BTreeMap<String, i64>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct OtpCooldowns {
    path: Option<PathBuf>,
    // Memory copy for the in-process variant; also serialises file updates.
    entries: Mutex<BTreeMap<String, i64>>,
}

impl OtpCooldowns {
    /// Cooldowns that live as long as this process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Cooldown file at the default location (`<config dir>/otp.toml`).
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(crate::config::Config::otp_path()?))
    }

    /// Time left before another code may go to `email`.
    pub fn remaining(&self, email: &str) -> Duration {
        self.remaining_at(email, now_ms())
    }

    fn remaining_at(&self, email: &str, now: i64) -> Duration {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ends_at = match &self.path {
            Some(_) => self.read_file().cooldowns.get(&normalize_email(email)).copied(),
            None => entries.get(&normalize_email(email)).copied(),
        };
        ends_at
            .map(|end| Duration::from_millis(end.saturating_sub(now).max(0) as u64))
            .unwrap_or(Duration::ZERO)
    }

    /// Start the cooldown for `email`, dropping entries that already ran out.
    pub fn start(&self, email: &str) -> Result<()> {
        self.start_at(email, now_ms())
    }

    fn start_at(&self, email: &str, now: i64) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut current = match &self.path {
            Some(_) => self.read_file().cooldowns,
            None => std::mem::take(&mut *entries),
        };

        current.retain(|_, end| *end > now);
        current.insert(
            normalize_email(email),
            now + OTP_COOLDOWN.as_millis() as i64,
        );

        if self.path.is_some() {
            self.write_file(&CooldownFile { cooldowns: current })?;
        } else {
            *entries = current;
        }
        Ok(())
    }

    fn read_file(&self) -> CooldownFile {
        let Some(path) = &self.path else {
            return CooldownFile::default();
        };
        if !path.exists() {
            return CooldownFile::default();
        }
        match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|c| toml::from_str(&c).map_err(anyhow::Error::from))
        {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Ignoring unreadable OTP cooldown file: {:#}", e);
                CooldownFile::default()
            }
        }
    }

    fn write_file(&self, file: &CooldownFile) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(file).context("Failed to serialize OTP cooldowns")?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content).context("Failed to write OTP cooldown file")?;
        fs::rename(&tmp, path).context("Failed to replace OTP cooldown file")?;
        Ok(())
    }
}
