use crate::output::OutputFormat;
use anyhow::{Context as _, Result};
use oauth2::ClientSecret;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_PREFIX: &str = "gwcli";

/// Overrides the XDG config directory
pub const CONFIG_DIR_ENV: &str = "GWCLI_CONFIG_DIR";

pub const SETTINGS_FILE: &str = "config.yaml";
pub const ACCOUNTS_FILE: &str = "accounts.yaml";
pub const CREDENTIALS_FILE: &str = "credentials.yaml";
pub const CLIENT_SECRET_FILE: &str = "client_secret.json";

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Get the application config directory path
pub fn get_app_config_dir() -> Result<PathBuf> {
    let app_config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_PREFIX).map_err(|e| {
                anyhow::anyhow!("Failed to initialize XDG base directories: {}", e)
            })?;
            xdg_dirs.get_config_home()
        }
    };

    // Ensure directory exists
    if !app_config_dir.exists() {
        fs::create_dir_all(&app_config_dir)?;
    }

    Ok(app_config_dir)
}

/// Where refreshed and newly issued credentials are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackendKind {
    #[default]
    Keyring,
    File,
}

/// User settings from `config.yaml`; every field is optional
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub credential_backend: CredentialBackendKind,
    pub default_output: OutputFormat,
    pub refresh_margin_secs: u64,
    pub http_timeout_secs: u64,
    pub callback_timeout_secs: u64,
    pub client_secret_file: Option<PathBuf>,
    pub client_id: Option<String>,
    pub client_secret: Option<ClientSecret>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credential_backend: CredentialBackendKind::Keyring,
            default_output: OutputFormat::Table,
            refresh_margin_secs: 30,
            http_timeout_secs: 30,
            callback_timeout_secs: 300,
            client_secret_file: None,
            client_id: None,
            client_secret: None,
        }
    }
}

impl Settings {
    /// Load settings from the config directory, falling back to defaults
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Self::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs.max(1))
    }

    /// OAuth client registration: inline settings win over `client_secret.json`
    pub fn client_config(&self, config_dir: &Path) -> Result<Option<ClientConfig>> {
        if let Some(client_id) = &self.client_id {
            return Ok(Some(ClientConfig {
                client_id: client_id.clone(),
                client_secret: self.client_secret.clone(),
                auth_uri: GOOGLE_AUTH_URI.to_string(),
                token_uri: GOOGLE_TOKEN_URI.to_string(),
            }));
        }

        let path = self
            .client_secret_file
            .clone()
            .unwrap_or_else(|| config_dir.join(CLIENT_SECRET_FILE));
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let config = ClientConfig::from_google_json(&content)
            .with_context(|| format!("Invalid OAuth client file {}", path.display()))?;
        Ok(Some(config))
    }
}

/// OAuth client registration for an installed (desktop) application
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: Option<ClientSecret>,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct GoogleClientFile {
    installed: Option<GoogleClientEntry>,
    web: Option<GoogleClientEntry>,
}

#[derive(Deserialize)]
struct GoogleClientEntry {
    client_id: String,
    client_secret: Option<ClientSecret>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientConfig {
    /// Parse the JSON downloaded from the Google Cloud console
    pub fn from_google_json(content: &str) -> Result<Self> {
        let file: GoogleClientFile = serde_json::from_str(content)?;
        let entry = file
            .installed
            .or(file.web)
            .ok_or_else(|| anyhow::anyhow!("expected an \"installed\" or \"web\" client entry"))?;

        Ok(Self {
            client_id: entry.client_id,
            client_secret: entry.client_secret,
            auth_uri: entry.auth_uri.unwrap_or_else(|| GOOGLE_AUTH_URI.to_string()),
            token_uri: entry.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.credential_backend, CredentialBackendKind::Keyring);
        assert_eq!(settings.default_output, OutputFormat::Table);
        assert_eq!(settings.refresh_margin(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_settings() {
        let settings = Settings::parse(
            "credential_backend: file\ndefault_output: json\nrefresh_margin_secs: 120\n",
        )
        .unwrap();
        assert_eq!(settings.credential_backend, CredentialBackendKind::File);
        assert_eq!(settings.default_output, OutputFormat::Json);
        assert_eq!(settings.refresh_margin(), Duration::from_secs(120));
        assert_eq!(settings.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Settings::parse("credential_backend: floppy\n").is_err());
    }

    #[test]
    fn test_google_client_file() {
        let json = r#"{"installed":{"client_id":"abc.apps.googleusercontent.com","client_secret":"shh","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token","redirect_uris":["http://localhost"]}}"#;
        let config = ClientConfig::from_google_json(json).unwrap();
        assert_eq!(config.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.client_secret.unwrap().secret(), "shh");
        assert_eq!(config.token_uri, "https://oauth2.googleapis.com/token");

        assert!(ClientConfig::from_google_json(r#"{"other":{}}"#).is_err());
    }

    #[test]
    fn test_client_config_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        assert!(settings.client_config(dir.path()).unwrap().is_none());

        fs::write(
            dir.path().join(CLIENT_SECRET_FILE),
            r#"{"web":{"client_id":"from-file"}}"#,
        )
        .unwrap();
        let config = settings.client_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.client_id, "from-file");
        assert_eq!(config.auth_uri, GOOGLE_AUTH_URI);

        let inline = Settings::parse("client_id: inline\nclient_secret: s\n").unwrap();
        let config = inline.client_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.client_id, "inline");
    }

    #[test]
    fn test_debug_hides_client_secret() {
        let settings = Settings::parse("client_id: id\nclient_secret: hunter2\n").unwrap();
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }
}
