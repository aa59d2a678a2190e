use std::fmt;
use thiserror::Error;

/// Why no account could be selected when the caller gave no alias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoAccountReason {
    /// The registry holds no accounts at all
    NoneConfigured,
    /// Accounts exist but none is marked default
    NoDefault,
}

impl fmt::Display for NoAccountReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoAccountReason::NoneConfigured => {
                write!(f, "no accounts configured. Run 'gwcli account add' first.")
            }
            NoAccountReason::NoDefault => write!(
                f,
                "no default account set. Pass --account <ALIAS> or run 'gwcli account switch <ALIAS>'."
            ),
        }
    }
}

/// Errors raised by the account registry, credential store and token lifecycle.
///
/// Every variant is terminal for the current command; none is retried.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account '{0}' not found. Run 'gwcli account list' to see configured accounts.")]
    AccountNotFound(String),

    #[error("an account with alias '{0}' already exists")]
    DuplicateAlias(String),

    #[error("{0}")]
    NoAccount(NoAccountReason),

    #[error("no stored credential for account '{0}'")]
    CredentialNotFound(String),

    #[error("account '{0}' is not logged in. Run 'gwcli auth login --account {0}' to authenticate.")]
    NoCredential(String),

    #[error(
        "failed to refresh the access token for '{alias}': {reason}. Run 'gwcli auth login --account {alias}' to re-authenticate."
    )]
    TokenRefresh { alias: String, reason: String },

    #[error(
        "invalid alias '{0}': use letters, digits, '.', '_' or '-' (max 64 characters, must start with a letter or digit)"
    )]
    InvalidAlias(String),

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse account file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AccountError {
    /// Collapse "credential missing" into the user-facing "not logged in" form
    pub fn into_not_authenticated(self) -> Self {
        match self {
            AccountError::CredentialNotFound(alias) => AccountError::NoCredential(alias),
            other => other,
        }
    }
}
