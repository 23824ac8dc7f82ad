//! Process Identity Classifier.
//!
//! A process is a *restart of self* only when the application relaunched
//! itself on purpose (see [`crate::restart`]). The relauncher leaves a random
//! token in the data directory and passes the same token to the child in
//! [`RESTART_ENV`]. Both must match. Cold starts, crash relaunches and system
//! restarts have no token and classify as ordinary launches.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const RESTART_ENV: &str = "FOREVER_RESTART_TOKEN";
pub const TOKEN_FILE: &str = "restart.token";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub is_restart_of_self: bool,
}

pub trait ProcessClassifier {
    /// Side-effect free.
    fn classify(&self) -> ProcessIdentity;

    /// Invalidate whatever made this process a restart, so it is honoured once.
    fn consume(&self) {}
}

#[derive(Debug, Clone)]
pub struct RestartSignal {
    token_path: PathBuf,
    env_key: String,
}

impl RestartSignal {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            token_path: data_dir.join(TOKEN_FILE),
            env_key: RESTART_ENV.to_string(),
        }
    }

    pub fn with_env_key(mut self, key: &str) -> Self {
        self.env_key = key.to_string();
        self
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn env_key(&self) -> &str {
        &self.env_key
    }

    /// Classify against an explicit environment value.
    pub fn classify_token(&self, env_value: Option<&str>) -> ProcessIdentity {
        let is_restart_of_self = match env_value.map(str::trim) {
            Some(token) if !token.is_empty() => std::fs::read_to_string(&self.token_path)
                .map(|stored| stored.trim() == token)
                .unwrap_or(false),
            _ => false,
        };
        ProcessIdentity { is_restart_of_self }
    }

    /// Write a fresh token and return it.
    pub fn issue(&self) -> io::Result<String> {
        if let Some(parent) = self.token_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let token = hex::encode(rand::random::<[u8; 16]>());
        std::fs::write(&self.token_path, &token)?;
        Ok(token)
    }

    /// Remove the token file. Missing is fine.
    pub fn revoke(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.token_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl ProcessClassifier for RestartSignal {
    fn classify(&self) -> ProcessIdentity {
        let env = std::env::var(&self.env_key).ok();
        self.classify_token(env.as_deref())
    }

    fn consume(&self) {
        if let Err(e) = self.revoke() {
            tracing::warn!(path = %self.token_path.display(), "Failed to remove restart token: {e}");
        }
    }
}
