use crate::error::AccountError;
use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

/// Keyring service name all credentials are filed under
pub const KEYRING_SERVICE: &str = "gwcli";

/// OAuth2 token material for one account
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// True once `now + margin` reaches the expiry
    pub fn is_expired(&self, margin: Duration) -> bool {
        let margin = time::Duration::try_from(margin).unwrap_or(time::Duration::ZERO);
        OffsetDateTime::now_utc() + margin >= self.expires_at
    }
}

/// Narrow capability over a platform secret facility: opaque strings by key.
pub trait SecretBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>, AccountError>;

    fn put(&self, key: &str, secret: &str) -> Result<(), AccountError>;

    /// Remove the secret; absent keys are not an error
    fn delete(&self, key: &str) -> Result<(), AccountError>;
}

/// OS keychain / secret service backend
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, AccountError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| keyring_error("open keyring entry", e))
    }
}

/// Keyring failures usually mean no secret service on this host; name the fallback
fn keyring_error(action: &str, e: keyring::Error) -> AccountError {
    AccountError::Storage(format!(
        "failed to {}: {}. If no keyring is available, set 'credential_backend: file' in config.yaml",
        action, e
    ))
}

impl SecretBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn get(&self, key: &str) -> Result<Option<String>, AccountError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error("read from keyring", e)),
        }
    }

    fn put(&self, key: &str, secret: &str) -> Result<(), AccountError> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|e| keyring_error("write to keyring", e))
    }

    fn delete(&self, key: &str) -> Result<(), AccountError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error("delete from keyring", e)),
        }
    }
}

/// Owner-only YAML file of key -> secret, for hosts without a secret service
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, AccountError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| AccountError::Storage(format!("corrupt credential file: {}", e)))
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<(), AccountError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(secrets)
            .map_err(|e| AccountError::Storage(e.to_string()))?;

        let tmp = self.path.with_extension("yaml.tmp");
        write_private(&tmp, content.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &std::path::Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(content)
}

#[cfg(not(unix))]
fn write_private(path: &std::path::Path, content: &[u8]) -> std::io::Result<()> {
    fs::write(path, content)
}

impl SecretBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>, AccountError> {
        Ok(self.read_all()?.remove(key))
    }

    fn put(&self, key: &str, secret: &str) -> Result<(), AccountError> {
        let mut secrets = self.read_all()?;
        secrets.insert(key.to_string(), secret.to_string());
        self.write_all(&secrets)
    }

    fn delete(&self, key: &str) -> Result<(), AccountError> {
        let mut secrets = self.read_all()?;
        if secrets.remove(key).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }
}

/// In-memory backend for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackend {
    secrets: std::sync::Mutex<BTreeMap<String, String>>,
}

#[cfg(test)]
impl MemoryBackend {
    pub fn keys(&self) -> Vec<String> {
        self.secrets.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, AccountError> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, secret: &str) -> Result<(), AccountError> {
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AccountError> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Credential persistence keyed by account alias.
///
/// The only component allowed to write token material.
pub struct CredentialStore {
    backend: Box<dyn SecretBackend>,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn get(&self, alias: &str) -> Result<Credential, AccountError> {
        let blob = self
            .backend
            .get(alias)?
            .ok_or_else(|| AccountError::CredentialNotFound(alias.to_string()))?;
        serde_json::from_str(&blob).map_err(|e| {
            AccountError::Storage(format!("stored credential for '{}' is unreadable: {}", alias, e))
        })
    }

    pub fn put(&self, alias: &str, credential: &Credential) -> Result<(), AccountError> {
        let blob = serde_json::to_string(credential)
            .map_err(|e| AccountError::Storage(e.to_string()))?;
        self.backend.put(alias, &blob)?;
        debug!(alias, backend = self.backend.name(), "stored credential");
        Ok(())
    }

    pub fn delete(&self, alias: &str) -> Result<(), AccountError> {
        self.backend.delete(alias)?;
        debug!(alias, backend = self.backend.name(), "deleted credential");
        Ok(())
    }

    pub fn contains(&self, alias: &str) -> Result<bool, AccountError> {
        Ok(self.backend.get(alias)?.is_some())
    }
}
