use super::store::{Credential, CredentialStore};
use crate::error::AccountError;
use async_trait::async_trait;
use oauth2::{AccessToken, RefreshToken};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Default safety margin before expiry at which a token counts as expired
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Result of a successful refresh-token exchange
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<RefreshToken>,
    pub expires_in: Option<Duration>,
}

impl TokenGrant {
    /// Build the credential that replaces `previous` after this grant
    pub fn into_credential(self, previous: &Credential) -> Credential {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let lifetime = time::Duration::try_from(lifetime).unwrap_or(time::Duration::HOUR);
        Credential {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            expires_at: OffsetDateTime::now_utc() + lifetime,
        }
    }
}

/// The OAuth2 refresh-token exchange, injected so tests can count calls
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn refresh(&self, refresh_token: &RefreshToken) -> anyhow::Result<TokenGrant>;
}

/// Offline view of an account's credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoCredential,
    Valid { expires_at: OffsetDateTime },
    Expired { expires_at: OffsetDateTime },
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenState::NoCredential => write!(f, "not logged in"),
            TokenState::Valid { expires_at } => {
                let left = Duration::try_from(*expires_at - OffsetDateTime::now_utc())
                    .unwrap_or(Duration::ZERO);
                // Whole seconds only
                let left = Duration::from_secs(left.as_secs());
                write!(f, "valid (expires in {})", humantime::format_duration(left))
            }
            TokenState::Expired { .. } => write!(
                f,
                "expired (refreshes on next use, or run 'gwcli auth login' if refresh fails)"
            ),
        }
    }
}

/// Hands out token sources backed by the credential store.
pub struct TokenManager {
    store: CredentialStore,
    exchange: Box<dyn TokenExchange>,
    margin: Duration,
}

impl TokenManager {
    pub fn new(store: CredentialStore, exchange: Box<dyn TokenExchange>) -> Self {
        Self {
            store,
            exchange,
            margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Token source for `alias`; fails with `NoCredential` when never logged in
    pub fn token_source(&self, alias: &str) -> Result<TokenSource<'_>, AccountError> {
        let credential = self
            .store
            .get(alias)
            .map_err(AccountError::into_not_authenticated)?;
        Ok(TokenSource {
            alias: alias.to_string(),
            store: &self.store,
            exchange: self.exchange.as_ref(),
            margin: self.margin,
            current: Mutex::new(credential),
        })
    }

    /// Classify the stored credential without touching the network
    pub fn token_state(&self, alias: &str) -> Result<TokenState, AccountError> {
        match self.store.get(alias) {
            Ok(credential) if credential.is_expired(self.margin) => Ok(TokenState::Expired {
                expires_at: credential.expires_at,
            }),
            Ok(credential) => Ok(TokenState::Valid {
                expires_at: credential.expires_at,
            }),
            Err(AccountError::CredentialNotFound(_)) => Ok(TokenState::NoCredential),
            Err(e) => Err(e),
        }
    }
}

/// Yields a currently valid access token for one account, refreshing when needed
pub struct TokenSource<'a> {
    alias: String,
    store: &'a CredentialStore,
    exchange: &'a dyn TokenExchange,
    margin: Duration,
    current: Mutex<Credential>,
}

impl TokenSource<'_> {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.snapshot().expires_at
    }

    /// Access token for the next request. Refreshes (and persists) when the
    /// stored token is within the safety margin of its expiry.
    pub async fn token(&self) -> Result<AccessToken, AccountError> {
        let current = self.snapshot();
        if !current.is_expired(self.margin) {
            debug!(alias = %self.alias, "using stored access token");
            return Ok(current.access_token);
        }

        info!(alias = %self.alias, "access token expired; refreshing");
        self.refresh_from(current).await
    }

    /// Refresh regardless of the current expiry
    pub async fn refresh(&self) -> Result<AccessToken, AccountError> {
        let current = self.snapshot();
        self.refresh_from(current).await
    }

    async fn refresh_from(&self, current: Credential) -> Result<AccessToken, AccountError> {
        let grant = self
            .exchange
            .refresh(&current.refresh_token)
            .await
            .map_err(|e| {
                warn!(alias = %self.alias, "token refresh failed");
                AccountError::TokenRefresh {
                    alias: self.alias.clone(),
                    reason: format!("{:#}", e),
                }
            })?;

        let rotated = grant.refresh_token.is_some();
        let refreshed = grant.into_credential(&current);
        // Persist before handing the token out
        self.store.put(&self.alias, &refreshed)?;
        info!(alias = %self.alias, rotated, "access token refreshed");

        let token = refreshed.access_token.clone();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = refreshed;
        Ok(token)
    }

    fn snapshot(&self) -> Credential {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accounts::store::MemoryBackend;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Exchange double that counts calls and can fail or rotate refresh tokens
    pub(crate) struct FakeExchange {
        pub calls: Arc<AtomicUsize>,
        pub fail: bool,
        pub rotate_to: Option<&'static str>,
    }

    impl FakeExchange {
        pub(crate) fn ok() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    fail: false,
                    rotate_to: None,
                },
                calls,
            )
        }

        pub(crate) fn failing() -> (Self, Arc<AtomicUsize>) {
            let (mut fake, calls) = Self::ok();
            fake.fail = true;
            (fake, calls)
        }
    }

    #[async_trait]
    impl TokenExchange for FakeExchange {
        async fn refresh(&self, refresh_token: &RefreshToken) -> anyhow::Result<TokenGrant> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                anyhow::bail!("invalid_grant: Token has been expired or revoked.");
            }
            Ok(TokenGrant {
                access_token: AccessToken::new(format!(
                    "fresh-{}-from-{}",
                    n,
                    refresh_token.secret()
                )),
                refresh_token: self.rotate_to.map(|r| RefreshToken::new(r.to_string())),
                expires_in: Some(Duration::from_secs(3599)),
            })
        }
    }

    pub(crate) fn credential(access: &str, refresh: &str, expires_in_secs: i64) -> Credential {
        Credential {
            access_token: AccessToken::new(access.to_string()),
            refresh_token: RefreshToken::new(refresh.to_string()),
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(expires_in_secs),
        }
    }

    fn manager(exchange: FakeExchange) -> TokenManager {
        TokenManager::new(
            CredentialStore::new(Box::new(MemoryBackend::default())),
            Box::new(exchange),
        )
    }

    #[tokio::test]
    async fn test_unexpired_token_skips_refresh() {
        let (exchange, calls) = FakeExchange::ok();
        let tokens = manager(exchange);
        tokens.store().put("work", &credential("stored", "r1", 3600)).unwrap();

        let source = tokens.token_source("work").unwrap();
        assert_eq!(source.token().await.unwrap().secret(), "stored");
        assert_eq!(source.token().await.unwrap().secret(), "stored");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_once_and_persists() {
        let (exchange, calls) = FakeExchange::ok();
        let tokens = manager(exchange);
        tokens.store().put("work", &credential("old", "r1", -60)).unwrap();

        let source = tokens.token_source("work").unwrap();
        let token = source.token().await.unwrap();
        assert_eq!(token.secret(), "fresh-1-from-r1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = tokens.store().get("work").unwrap();
        assert_eq!(stored.access_token.secret(), "fresh-1-from-r1");
        assert_eq!(stored.refresh_token.secret(), "r1", "refresh token carried over");
        assert!(!stored.is_expired(DEFAULT_REFRESH_MARGIN));

        // The refreshed token is reused by the same source
        assert_eq!(source.token().await.unwrap().secret(), "fresh-1-from-r1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_counts_as_expired() {
        let (exchange, calls) = FakeExchange::ok();
        let tokens = manager(exchange);
        tokens.store().put("work", &credential("old", "r1", 10)).unwrap();

        tokens.token_source("work").unwrap().token().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let (mut exchange, _) = FakeExchange::ok();
        exchange.rotate_to = Some("r2");
        let tokens = manager(exchange);
        tokens.store().put("work", &credential("old", "r1", -60)).unwrap();

        tokens.token_source("work").unwrap().token().await.unwrap();
        assert_eq!(tokens.store().get("work").unwrap().refresh_token.secret(), "r2");
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_credential_unchanged() {
        let (exchange, calls) = FakeExchange::failing();
        let tokens = manager(exchange);
        let expired = credential("old", "r1", -60);
        tokens.store().put("work", &expired).unwrap();

        let err = tokens
            .token_source("work")
            .unwrap()
            .token()
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::TokenRefresh { ref alias, .. } if alias == "work"));
        assert!(err.to_string().contains("gwcli auth login --account work"));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no automatic retry");

        let stored = tokens.store().get("work").unwrap();
        assert_eq!(stored.access_token.secret(), "old");
        assert_eq!(stored.refresh_token.secret(), "r1");
        assert_eq!(stored.expires_at, expired.expires_at);
    }

    #[tokio::test]
    async fn test_forced_refresh_ignores_expiry() {
        let (exchange, calls) = FakeExchange::ok();
        let tokens = manager(exchange);
        tokens.store().put("work", &credential("stored", "r1", 3600)).unwrap();

        let token = tokens.token_source("work").unwrap().refresh().await.unwrap();
        assert_eq!(token.secret(), "fresh-1-from-r1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_credential_is_not_logged_in() {
        let (exchange, _) = FakeExchange::ok();
        let tokens = manager(exchange);
        assert!(matches!(
            tokens.token_source("work"),
            Err(AccountError::NoCredential(ref a)) if a == "work"
        ));
    }

    #[test]
    fn test_token_state() {
        let (exchange, _) = FakeExchange::ok();
        let tokens = manager(exchange);
        assert_eq!(tokens.token_state("work").unwrap(), TokenState::NoCredential);

        tokens.store().put("work", &credential("a", "r", 3600)).unwrap();
        assert!(matches!(
            tokens.token_state("work").unwrap(),
            TokenState::Valid { .. }
        ));
        assert!(tokens.token_state("work").unwrap().to_string().starts_with("valid"));

        tokens.store().put("work", &credential("a", "r", -5)).unwrap();
        assert!(matches!(
            tokens.token_state("work").unwrap(),
            TokenState::Expired { .. }
        ));
        // A revoked grant also looks expired offline, so point at re-login
        assert!(
            tokens
                .token_state("work")
                .unwrap()
                .to_string()
                .contains("gwcli auth login")
        );
    }
}
