use crate::accounts::{
    AccountManager, AccountRegistry, CredentialStore, FileBackend, KeyringBackend, SecretBackend,
    TokenExchange, TokenManager,
};
use crate::auth::{GoogleAuth, UnconfiguredExchange};
use crate::config::{
    ACCOUNTS_FILE, CLIENT_SECRET_FILE, CREDENTIALS_FILE, CredentialBackendKind, Settings,
};
use crate::google::GoogleClient;
use crate::output::OutputFormat;
use anyhow::{Result, anyhow};
use std::path::PathBuf;
use tracing::debug;

/// Everything a command handler needs: parsed global flags plus loaded settings
pub struct Context {
    /// Account selector from `--account`; empty means the default account
    pub selector: String,
    pub output: OutputFormat,
    pub settings: Settings,
    pub config_dir: PathBuf,
}

impl Context {
    pub fn new(
        config_dir: PathBuf,
        settings: Settings,
        account: Option<String>,
        output: Option<OutputFormat>,
    ) -> Self {
        Self {
            selector: account.unwrap_or_default(),
            output: output.unwrap_or(settings.default_output),
            settings,
            config_dir,
        }
    }

    /// Build the account manager from the on-disk registry and the configured
    /// secret backend
    pub fn account_manager(&self) -> Result<AccountManager> {
        let registry = AccountRegistry::load(self.config_dir.join(ACCOUNTS_FILE))?;

        let backend: Box<dyn SecretBackend> = match self.settings.credential_backend {
            CredentialBackendKind::Keyring => Box::new(KeyringBackend::new()),
            CredentialBackendKind::File => {
                Box::new(FileBackend::new(self.config_dir.join(CREDENTIALS_FILE)))
            }
        };
        debug!(backend = backend.name(), "credential backend selected");

        let exchange: Box<dyn TokenExchange> =
            match self.settings.client_config(&self.config_dir)? {
                Some(config) => Box::new(GoogleAuth::new(&config, &self.settings)?),
                None => Box::new(UnconfiguredExchange {
                    hint: self.client_hint(),
                }),
            };

        let tokens = TokenManager::new(CredentialStore::new(backend), exchange)
            .with_margin(self.settings.refresh_margin());
        Ok(AccountManager::new(registry, tokens))
    }

    /// OAuth client for consent and revocation; required for login
    pub fn google_auth(&self) -> Result<GoogleAuth> {
        let config = self
            .settings
            .client_config(&self.config_dir)?
            .ok_or_else(|| anyhow!("No OAuth client configured: {}", self.client_hint()))?;
        GoogleAuth::new(&config, &self.settings)
    }

    /// API client for the account selected by `--account`
    pub fn google_client<'m>(&self, manager: &'m AccountManager) -> Result<GoogleClient<'m>> {
        let (account, source) = manager.token_source(&self.selector)?;
        debug!(alias = %account.alias, email = %account.email, "using account");
        GoogleClient::new(source, self.settings.http_timeout())
    }

    fn client_hint(&self) -> String {
        format!(
            "download an OAuth client (Desktop app) from the Google Cloud console and save it as {}",
            self.config_dir.join(CLIENT_SECRET_FILE).display()
        )
    }
}
