use crate::error::{AccountError, NoAccountReason};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, info};

const MAX_ALIAS_LEN: usize = 64;

/// One configured account. Never holds token material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub alias: String,
    pub email: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub default: bool,
    pub added: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Ordered alias -> account mapping with at most one default.
///
/// When backed by a file, every mutating call writes the whole list back
/// before returning.
#[derive(Debug)]
pub struct AccountRegistry {
    path: Option<PathBuf>,
    accounts: Vec<Account>,
}

fn alias_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("alias pattern is valid")
    })
}

/// Check that an alias is usable as a registry key and keyring user name
pub fn validate_alias(alias: &str) -> Result<(), AccountError> {
    if alias.len() > MAX_ALIAS_LEN || !alias_pattern().is_match(alias) {
        return Err(AccountError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}

impl AccountRegistry {
    /// Registry that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            accounts: Vec::new(),
        }
    }

    /// Load the registry from disk; a missing or empty file is an empty registry
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AccountError> {
        let path = path.into();
        let accounts = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_yaml::from_str::<AccountFile>(&content)?.accounts
            }
        } else {
            Vec::new()
        };

        debug!(path = %path.display(), count = accounts.len(), "loaded account registry");
        Ok(Self {
            path: Some(path),
            accounts,
        })
    }

    /// All accounts in insertion order
    pub fn list(&self) -> &[Account] {
        &self.accounts
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.alias == alias)
    }

    pub fn default_account(&self) -> Option<&Account> {
        self.accounts.iter().find(|a| a.default)
    }

    /// Resolve a selector to an account.
    ///
    /// An empty selector means the default account. A selector containing
    /// `@` also matches on email.
    pub fn resolve(&self, selector: &str) -> Result<Account, AccountError> {
        if self.accounts.is_empty() {
            return Err(AccountError::NoAccount(NoAccountReason::NoneConfigured));
        }

        let selector = selector.trim();
        if selector.is_empty() {
            return self
                .default_account()
                .cloned()
                .ok_or(AccountError::NoAccount(NoAccountReason::NoDefault));
        }

        self.get(selector)
            .or_else(|| {
                if selector.contains('@') {
                    self.accounts
                        .iter()
                        .find(|a| a.email.eq_ignore_ascii_case(selector))
                } else {
                    None
                }
            })
            .cloned()
            .ok_or_else(|| AccountError::AccountNotFound(selector.to_string()))
    }

    /// Insert a new account; the first account added becomes the default
    pub fn add(
        &mut self,
        alias: &str,
        email: &str,
        scopes: BTreeSet<String>,
    ) -> Result<Account, AccountError> {
        validate_alias(alias)?;
        if self.get(alias).is_some() {
            return Err(AccountError::DuplicateAlias(alias.to_string()));
        }

        let account = Account {
            alias: alias.to_string(),
            email: email.to_string(),
            scopes,
            default: self.accounts.is_empty(),
            added: Utc::now(),
        };
        self.accounts.push(account.clone());
        self.persist()?;

        info!(alias, default = account.default, "account added");
        Ok(account)
    }

    /// Delete an account record. The default flag is not moved to another account.
    pub fn remove(&mut self, alias: &str) -> Result<Account, AccountError> {
        let index = self.index_of(alias)?;
        let removed = self.accounts.remove(index);
        self.persist()?;

        info!(alias, was_default = removed.default, "account removed");
        Ok(removed)
    }

    /// Make `alias` the only default account
    pub fn switch(&mut self, alias: &str) -> Result<(), AccountError> {
        let index = self.index_of(alias)?;
        for (i, account) in self.accounts.iter_mut().enumerate() {
            account.default = i == index;
        }
        self.persist()?;

        info!(alias, "default account switched");
        Ok(())
    }

    pub fn rename(&mut self, old_alias: &str, new_alias: &str) -> Result<(), AccountError> {
        let index = self.index_of(old_alias)?;
        if old_alias == new_alias {
            return Ok(());
        }
        validate_alias(new_alias)?;
        if self.get(new_alias).is_some() {
            return Err(AccountError::DuplicateAlias(new_alias.to_string()));
        }

        self.accounts[index].alias = new_alias.to_string();
        if let Err(e) = self.persist() {
            self.accounts[index].alias = old_alias.to_string();
            return Err(e);
        }

        info!(old_alias, new_alias, "account renamed");
        Ok(())
    }

    /// Replace the granted scopes after a fresh consent
    pub fn set_scopes(&mut self, alias: &str, scopes: BTreeSet<String>) -> Result<(), AccountError> {
        let index = self.index_of(alias)?;
        if self.accounts[index].scopes == scopes {
            return Ok(());
        }
        self.accounts[index].scopes = scopes;
        self.persist()
    }

    /// Derive a free alias from the local part of an email address
    pub fn derive_alias(&self, email: &str) -> String {
        let local = email.split('@').next().unwrap_or_default().to_lowercase();
        let mut base: String = local
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        base = base
            .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_string();
        base.truncate(MAX_ALIAS_LEN - 4);
        if base.is_empty() {
            base = "account".to_string();
        }

        if self.get(&base).is_none() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if self.get(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    fn index_of(&self, alias: &str) -> Result<usize, AccountError> {
        self.accounts
            .iter()
            .position(|a| a.alias == alias)
            .ok_or_else(|| AccountError::AccountNotFound(alias.to_string()))
    }

    fn persist(&self) -> Result<(), AccountError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = AccountFile {
            accounts: self.accounts.clone(),
        };
        let mut content = String::from("# Managed by gwcli. Tokens are not stored here.\n");
        content.push_str(&serde_yaml::to_string(&file)?);

        // Write then rename so an interrupted save never truncates the registry
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), "saved account registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn aliases(registry: &AccountRegistry) -> Vec<&str> {
        registry.list().iter().map(|a| a.alias.as_str()).collect()
    }

    #[test]
    fn test_add_keeps_insertion_order_and_first_default() {
        let mut registry = AccountRegistry::in_memory();
        for alias in ["zeta", "alpha", "mid"] {
            registry
                .add(alias, &format!("{}@example.com", alias), scopes(&["mail"]))
                .unwrap();
        }

        assert_eq!(aliases(&registry), vec!["zeta", "alpha", "mid"]);
        let defaults: Vec<_> = registry.list().iter().filter(|a| a.default).collect();
        assert_eq!(defaults.len(), 1, "exactly one default account");
        assert_eq!(defaults[0].alias, "zeta");
    }

    #[test]
    fn test_duplicate_add_leaves_registry_unchanged() {
        let mut registry = AccountRegistry::in_memory();
        registry.add("work", "w@example.com", scopes(&["mail"])).unwrap();
        let before = registry.list().to_vec();

        let err = registry
            .add("work", "other@example.com", scopes(&["calendar"]))
            .unwrap_err();
        assert!(matches!(err, AccountError::DuplicateAlias(ref a) if a == "work"));
        assert_eq!(registry.list(), before.as_slice());
    }

    #[test]
    fn test_resolve_errors() {
        let mut registry = AccountRegistry::in_memory();
        assert!(matches!(
            registry.resolve(""),
            Err(AccountError::NoAccount(NoAccountReason::NoneConfigured))
        ));

        registry.add("work", "w@example.com", BTreeSet::new()).unwrap();
        assert!(matches!(
            registry.resolve("nope"),
            Err(AccountError::AccountNotFound(ref a)) if a == "nope"
        ));
    }

    #[test]
    fn test_resolve_by_email() {
        let mut registry = AccountRegistry::in_memory();
        registry.add("work", "W@Example.com", BTreeSet::new()).unwrap();
        assert_eq!(registry.resolve("w@example.com").unwrap().alias, "work");
    }

    #[test]
    fn test_switch_then_resolve_default() {
        let mut registry = AccountRegistry::in_memory();
        registry.add("work", "w@example.com", BTreeSet::new()).unwrap();
        registry.add("home", "h@example.com", BTreeSet::new()).unwrap();

        registry.switch("home").unwrap();
        assert_eq!(registry.resolve("").unwrap().alias, "home");
        assert!(!registry.get("work").unwrap().default);

        assert!(matches!(
            registry.switch("missing"),
            Err(AccountError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_remove_default_does_not_promote() {
        let mut registry = AccountRegistry::in_memory();
        registry.add("work", "w@example.com", BTreeSet::new()).unwrap();
        registry.add("home", "h@example.com", BTreeSet::new()).unwrap();

        registry.remove("work").unwrap();
        assert!(registry.list().iter().all(|a| !a.default));
        assert!(matches!(
            registry.resolve(""),
            Err(AccountError::NoAccount(NoAccountReason::NoDefault))
        ));
        assert_eq!(registry.resolve("home").unwrap().alias, "home");

        registry.remove("home").unwrap();
        assert!(matches!(
            registry.resolve(""),
            Err(AccountError::NoAccount(NoAccountReason::NoneConfigured))
        ));
        assert!(matches!(
            registry.remove("home"),
            Err(AccountError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_work_home_scenario() {
        let mut registry = AccountRegistry::in_memory();
        registry.add("work", "w@example.com", BTreeSet::new()).unwrap();
        let resolved = registry.resolve("").unwrap();
        assert_eq!(resolved.alias, "work");
        assert!(resolved.default);

        registry.add("home", "h@example.com", BTreeSet::new()).unwrap();
        assert_eq!(registry.resolve("").unwrap().alias, "work");

        registry.switch("home").unwrap();
        assert_eq!(registry.resolve("").unwrap().alias, "home");

        registry.remove("work").unwrap();
        assert_eq!(aliases(&registry), vec!["home"]);
    }

    #[test]
    fn test_rename_preserves_other_fields() {
        let mut registry = AccountRegistry::in_memory();
        let original = registry
            .add("work", "w@example.com", scopes(&["mail", "calendar"]))
            .unwrap();
        registry.add("home", "h@example.com", BTreeSet::new()).unwrap();

        assert!(matches!(
            registry.rename("work", "home"),
            Err(AccountError::DuplicateAlias(_))
        ));
        assert!(matches!(
            registry.rename("missing", "x"),
            Err(AccountError::AccountNotFound(_))
        ));
        registry.rename("work", "work").unwrap();

        registry.rename("work", "office").unwrap();
        let renamed = registry.get("office").unwrap();
        assert_eq!(renamed.email, original.email);
        assert_eq!(renamed.scopes, original.scopes);
        assert_eq!(renamed.added, original.added);
        assert!(renamed.default);
        assert_eq!(aliases(&registry), vec!["office", "home"]);
    }

    #[test]
    fn test_invalid_alias_rejected() {
        let mut registry = AccountRegistry::in_memory();
        let too_long = "x".repeat(65);
        for bad in ["", "-lead", "has space", "semi;colon", too_long.as_str()] {
            assert!(
                matches!(
                    registry.add(bad, "a@example.com", BTreeSet::new()),
                    Err(AccountError::InvalidAlias(_))
                ),
                "alias {:?} should be rejected",
                bad
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_derive_alias() {
        let mut registry = AccountRegistry::in_memory();
        assert_eq!(registry.derive_alias("John.Doe+news@example.com"), "john.doe-news");
        assert_eq!(registry.derive_alias("@example.com"), "account");

        registry.add("jane", "jane@example.com", BTreeSet::new()).unwrap();
        registry.add("jane-2", "jane@other.com", BTreeSet::new()).unwrap();
        assert_eq!(registry.derive_alias("jane@third.com"), "jane-3");
    }

    #[test]
    fn test_order_and_default_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.yaml");

        let mut registry = AccountRegistry::load(&path).unwrap();
        assert!(registry.is_empty());
        registry.add("work", "w@example.com", scopes(&["mail"])).unwrap();
        registry.add("home", "h@example.com", BTreeSet::new()).unwrap();
        registry.add("club", "c@example.com", BTreeSet::new()).unwrap();
        registry.switch("club").unwrap();

        let reloaded = AccountRegistry::load(&path).unwrap();
        assert_eq!(aliases(&reloaded), vec!["work", "home", "club"]);
        assert_eq!(reloaded.resolve("").unwrap().alias, "club");
        assert_eq!(reloaded.get("work").unwrap().scopes, scopes(&["mail"]));

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("access_token"), "registry must not hold tokens");
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.yaml");
        fs::write(&path, "  \n").unwrap();
        assert!(AccountRegistry::load(&path).unwrap().is_empty());
    }
}
