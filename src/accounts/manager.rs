use super::registry::{Account, AccountRegistry, validate_alias};
use super::store::Credential;
use super::token::{TokenManager, TokenSource, TokenState};
use crate::error::AccountError;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Account registry plus credential lifecycle, injected into command handlers.
///
/// Token sources are only handed out for accounts that resolve through the
/// registry, so a credential left behind without a record is never used.
pub struct AccountManager {
    registry: AccountRegistry,
    tokens: TokenManager,
}

impl AccountManager {
    pub fn new(registry: AccountRegistry, tokens: TokenManager) -> Self {
        Self { registry, tokens }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn resolve(&self, selector: &str) -> Result<Account, AccountError> {
        self.registry.resolve(selector)
    }

    /// Resolve the account, then get a token source for it
    pub fn token_source(&self, selector: &str) -> Result<(Account, TokenSource<'_>), AccountError> {
        let account = self.registry.resolve(selector)?;
        let source = self.tokens.token_source(&account.alias)?;
        Ok((account, source))
    }

    pub fn token_state(&self, alias: &str) -> Result<TokenState, AccountError> {
        self.tokens.token_state(alias)
    }

    /// Fail early when `alias` cannot be added, before running a consent flow
    pub fn check_new_alias(&self, alias: &str) -> Result<(), AccountError> {
        validate_alias(alias)?;
        if self.registry.get(alias).is_some() {
            return Err(AccountError::DuplicateAlias(alias.to_string()));
        }
        Ok(())
    }

    /// Record a freshly consented account together with its credential
    pub fn add(
        &mut self,
        alias: &str,
        email: &str,
        scopes: BTreeSet<String>,
        credential: &Credential,
    ) -> Result<Account, AccountError> {
        self.check_new_alias(alias)?;
        self.tokens.store().put(alias, credential)?;

        match self.registry.add(alias, email, scopes) {
            Ok(account) => Ok(account),
            Err(e) => {
                if let Err(cleanup) = self.tokens.store().delete(alias) {
                    warn!(alias, "failed to clean up credential after add failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Replace the credential of an existing account after a fresh login
    pub fn relogin(
        &mut self,
        alias: &str,
        scopes: BTreeSet<String>,
        credential: &Credential,
    ) -> Result<(), AccountError> {
        if self.registry.get(alias).is_none() {
            return Err(AccountError::AccountNotFound(alias.to_string()));
        }
        self.tokens.store().put(alias, credential)?;
        self.registry.set_scopes(alias, scopes)?;
        info!(alias, "credential replaced after login");
        Ok(())
    }

    /// Drop the credential but keep the account record
    pub fn logout(&self, alias: &str) -> Result<bool, AccountError> {
        if self.registry.get(alias).is_none() {
            return Err(AccountError::AccountNotFound(alias.to_string()));
        }
        let had_credential = self.tokens.store().contains(alias)?;
        self.tokens.store().delete(alias)?;
        Ok(had_credential)
    }

    /// Delete the credential first, then the record, so a retry after a
    /// partial failure still completes.
    pub fn remove(&mut self, alias: &str) -> Result<Account, AccountError> {
        if self.registry.get(alias).is_none() {
            return Err(AccountError::AccountNotFound(alias.to_string()));
        }
        self.tokens.store().delete(alias)?;
        self.registry.remove(alias)
    }

    pub fn switch(&mut self, alias: &str) -> Result<(), AccountError> {
        self.registry.switch(alias)
    }

    /// Rename the record and move its credential to the new key
    pub fn rename(&mut self, old_alias: &str, new_alias: &str) -> Result<(), AccountError> {
        if self.registry.get(old_alias).is_none() {
            return Err(AccountError::AccountNotFound(old_alias.to_string()));
        }
        if old_alias == new_alias {
            return Ok(());
        }
        self.check_new_alias(new_alias)?;

        let credential = match self.tokens.store().get(old_alias) {
            Ok(credential) => Some(credential),
            Err(AccountError::CredentialNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(credential) = &credential {
            self.tokens.store().put(new_alias, credential)?;
        }

        if let Err(e) = self.registry.rename(old_alias, new_alias) {
            if credential.is_some() {
                if let Err(cleanup) = self.tokens.store().delete(new_alias) {
                    warn!(
                        alias = new_alias,
                        "failed to clean up credential after rename failed: {}", cleanup
                    );
                }
            }
            return Err(e);
        }

        if credential.is_some() {
            self.tokens.store().delete(old_alias)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::store::{CredentialStore, MemoryBackend};
    use crate::accounts::token::tests::{FakeExchange, credential};
    use std::sync::atomic::Ordering;

    fn manager() -> AccountManager {
        let (exchange, _) = FakeExchange::ok();
        AccountManager::new(
            AccountRegistry::in_memory(),
            TokenManager::new(
                CredentialStore::new(Box::new(MemoryBackend::default())),
                Box::new(exchange),
            ),
        )
    }

    #[test]
    fn test_add_stores_credential_and_record() {
        let mut accounts = manager();
        let account = accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();
        assert!(account.default);
        assert!(accounts.tokens().store().contains("work").unwrap());
    }

    #[test]
    fn test_duplicate_add_keeps_existing_credential() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("first", "r1", 3600))
            .unwrap();

        let err = accounts
            .add("work", "x@example.com", BTreeSet::new(), &credential("second", "r2", 3600))
            .unwrap_err();
        assert!(matches!(err, AccountError::DuplicateAlias(_)));
        let stored = accounts.tokens().store().get("work").unwrap();
        assert_eq!(stored.access_token.secret(), "first");
    }

    #[test]
    fn test_remove_cascades_to_credential() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();
        accounts
            .add("home", "h@example.com", BTreeSet::new(), &credential("b", "r", 3600))
            .unwrap();

        accounts.remove("work").unwrap();
        assert!(!accounts.tokens().store().contains("work").unwrap());
        assert!(accounts.tokens().store().contains("home").unwrap());
        assert!(matches!(
            accounts.remove("work"),
            Err(AccountError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_remove_after_partial_failure_completes() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();
        // Simulate a prior run that deleted the credential but not the record
        accounts.tokens().store().delete("work").unwrap();

        accounts.remove("work").unwrap();
        assert!(accounts.registry().is_empty());
    }

    #[test]
    fn test_orphaned_credential_is_never_used() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();
        accounts
            .tokens()
            .store()
            .put("ghost", &credential("orphan", "r", 3600))
            .unwrap();

        assert!(matches!(
            accounts.token_source("ghost"),
            Err(AccountError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_rename_moves_credential() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();

        accounts.rename("work", "office").unwrap();
        assert!(!accounts.tokens().store().contains("work").unwrap());
        assert_eq!(
            accounts.tokens().store().get("office").unwrap().access_token.secret(),
            "a"
        );
        assert_eq!(accounts.resolve("").unwrap().alias, "office");
    }

    #[test]
    fn test_rename_to_taken_alias_touches_nothing() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();
        accounts
            .add("home", "h@example.com", BTreeSet::new(), &credential("b", "r", 3600))
            .unwrap();

        assert!(matches!(
            accounts.rename("work", "home"),
            Err(AccountError::DuplicateAlias(_))
        ));
        assert_eq!(
            accounts.tokens().store().get("home").unwrap().access_token.secret(),
            "b"
        );
        assert!(accounts.tokens().store().contains("work").unwrap());
    }

    #[test]
    fn test_failed_rename_rolls_back_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.yaml");
        let (exchange, _) = FakeExchange::ok();
        let mut accounts = AccountManager::new(
            AccountRegistry::load(path.clone()).unwrap(),
            TokenManager::new(
                CredentialStore::new(Box::new(MemoryBackend::default())),
                Box::new(exchange),
            ),
        );
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();

        // A directory where the registry writes its temp file makes the save fail
        std::fs::create_dir(dir.path().join("accounts.yaml.tmp")).unwrap();

        assert!(accounts.rename("work", "office").is_err());
        assert_eq!(accounts.resolve("").unwrap().alias, "work");
        assert!(!accounts.tokens().store().contains("office").unwrap());
        assert_eq!(
            accounts.tokens().store().get("work").unwrap().access_token.secret(),
            "a"
        );
    }

    #[test]
    fn test_logout_keeps_record() {
        let mut accounts = manager();
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r", 3600))
            .unwrap();

        assert!(accounts.logout("work").unwrap());
        assert!(!accounts.logout("work").unwrap());
        assert_eq!(accounts.resolve("").unwrap().alias, "work");
        assert!(matches!(
            accounts.token_source(""),
            Err(AccountError::NoCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_token_source_for_default_account() {
        let (exchange, calls) = FakeExchange::ok();
        let mut accounts = AccountManager::new(
            AccountRegistry::in_memory(),
            TokenManager::new(
                CredentialStore::new(Box::new(MemoryBackend::default())),
                Box::new(exchange),
            ),
        );
        accounts
            .add("work", "w@example.com", BTreeSet::new(), &credential("a", "r1", -1))
            .unwrap();
        accounts
            .add("home", "h@example.com", BTreeSet::new(), &credential("b", "r2", 3600))
            .unwrap();

        let (account, source) = accounts.token_source("").unwrap();
        assert_eq!(account.alias, "work");
        assert_eq!(source.token().await.unwrap().secret(), "fresh-1-from-r1");

        let (_, home) = accounts.token_source("home").unwrap();
        assert_eq!(home.token().await.unwrap().secret(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
