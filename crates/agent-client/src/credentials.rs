use agent_protocol::CredentialVariant;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait CredentialProvider: Send + Sync {
    /// Returns the secret for `variant`, or `None` when it cannot be read.
    fn credential(&self, variant: CredentialVariant) -> Option<String>;
}

/// Reads `pw.txt` / `pw_change.txt` from the agent's data directory. A secret
/// that was read once is served from memory for the rest of the process.
pub struct FileCredentials {
    dir: PathBuf,
    cache: Mutex<HashMap<CredentialVariant, String>>,
}

impl FileCredentials {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn read_secret(&self, variant: CredentialVariant) -> Option<String> {
        let path = self.dir.join(variant.file_name());
        match std::fs::read_to_string(&path) {
            Ok(secret) if !secret.is_empty() => Some(secret),
            Ok(_) => {
                tracing::warn!(
                    event = "credentials.empty",
                    variant = %variant,
                    path = %path.display(),
                    "password file is empty"
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    event = "credentials.missing",
                    variant = %variant,
                    path = %path.display(),
                    error = %err,
                    "could not load password file"
                );
                None
            }
        }
    }
}

impl CredentialProvider for FileCredentials {
    fn credential(&self, variant: CredentialVariant) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(secret) = cache.get(&variant) {
            return Some(secret.clone());
        }
        let secret = self.read_secret(variant)?;
        cache.insert(variant, secret.clone());
        Some(secret)
    }
}
