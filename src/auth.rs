use crate::accounts::{Credential, TokenExchange, TokenGrant};
use crate::callback::CallbackListener;
use crate::config::{ClientConfig, Settings};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use oauth2::{
    AccessToken, AuthType, AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, RequestTokenError, RevocationUrl, Scope, StandardRevocableToken,
    TokenResponse, TokenUrl,
    basic::{BasicClient, BasicErrorResponse, BasicTokenResponse},
    reqwest::async_http_client,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Always requested so the account email can be discovered after consent
const IDENTITY_SCOPES: [&str; 2] = ["openid", "email"];

/// Scopes requested when the user names none
pub const DEFAULT_SCOPES: [&str; 2] = ["mail", "calendar"];

const SCOPE_SHORTHANDS: [(&str, &str); 5] = [
    ("mail", "https://www.googleapis.com/auth/gmail.modify"),
    ("mail.readonly", "https://www.googleapis.com/auth/gmail.readonly"),
    ("mail.send", "https://www.googleapis.com/auth/gmail.send"),
    ("calendar", "https://www.googleapis.com/auth/calendar"),
    ("calendar.readonly", "https://www.googleapis.com/auth/calendar.readonly"),
];

/// Expand scope shorthands; unknown values pass through unchanged
pub fn expand_scopes(requested: &[String]) -> BTreeSet<String> {
    let requested: Vec<&str> = if requested.is_empty() {
        DEFAULT_SCOPES.to_vec()
    } else {
        requested.iter().map(String::as_str).collect()
    };

    let mut scopes: BTreeSet<String> = requested
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            SCOPE_SHORTHANDS
                .iter()
                .find(|(short, _)| *short == s)
                .map(|(_, full)| full.to_string())
                .unwrap_or_else(|| s.to_string())
        })
        .collect();
    scopes.extend(IDENTITY_SCOPES.iter().map(|s| s.to_string()));
    scopes
}

/// Short name for a full scope URL, for display
pub fn short_scope(scope: &str) -> &str {
    SCOPE_SHORTHANDS
        .iter()
        .find(|(_, full)| *full == scope)
        .map(|(short, _)| *short)
        .unwrap_or(scope)
}

/// Outcome of a completed consent flow
#[derive(Debug)]
pub struct LoginResult {
    pub email: String,
    pub scopes: BTreeSet<String>,
    pub credential: Credential,
}

#[derive(Deserialize)]
struct UserInfo {
    email: String,
}

/// Google OAuth2 client for consent, refresh and revocation
pub struct GoogleAuth {
    client: BasicClient,
    http: reqwest::Client,
    http_timeout: Duration,
    callback_timeout: Duration,
}

impl GoogleAuth {
    pub fn new(config: &ClientConfig, settings: &Settings) -> Result<Self> {
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            config.client_secret.clone(),
            AuthUrl::new(config.auth_uri.clone())?,
            Some(TokenUrl::new(config.token_uri.clone())?),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_revocation_uri(RevocationUrl::new(GOOGLE_REVOKE_URL.to_string())?);

        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .build()?;

        Ok(Self {
            client,
            http,
            http_timeout: settings.http_timeout(),
            callback_timeout: settings.callback_timeout(),
        })
    }

    /// Run the authorization code flow (PKCE, loopback redirect) and return
    /// the new credential together with the signed-in email
    pub async fn login(&self, scopes: &BTreeSet<String>) -> Result<LoginResult> {
        let listener = CallbackListener::bind().await?;
        let client = self
            .client
            .clone()
            .set_redirect_uri(RedirectUrl::new(listener.redirect_uri())?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().map(|s| Scope::new(s.clone())))
            .set_pkce_challenge(pkce_challenge)
            // Offline access plus forced consent guarantees a refresh token
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        println!("Open this URL in your browser to sign in:\n");
        println!("  {}\n", auth_url);
        println!(
            "Waiting for the browser to redirect to {} ...",
            listener.redirect_uri()
        );

        let code = listener
            .wait_for_code(csrf_state.secret(), self.callback_timeout)
            .await?;
        debug!("authorization code received");

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| anyhow!("Token exchange failed: {}", describe_token_error(e)))?;

        let credential = credential_from_response(&token)?;
        let granted = token
            .scopes()
            .map(|granted| granted.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|| scopes.clone());
        let email = self.fetch_email(&credential.access_token).await?;

        info!(%email, "consent completed");
        Ok(LoginResult {
            email,
            scopes: granted,
            credential,
        })
    }

    /// Revoke a refresh token (and the grant behind it) at Google
    pub async fn revoke(&self, refresh_token: &RefreshToken) -> Result<()> {
        self.client
            .revoke_token(StandardRevocableToken::RefreshToken(refresh_token.clone()))?
            .request_async(async_http_client)
            .await
            .map_err(|e| anyhow!("Token revocation failed: {}", e))?;
        info!("refresh token revoked");
        Ok(())
    }

    async fn fetch_email(&self, access_token: &AccessToken) -> Result<String> {
        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token.secret())
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch user info: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not get error details".to_string());
            return Err(anyhow!(
                "Failed to get user info (HTTP {}): {}",
                status,
                error_text
            ));
        }

        let user_info: UserInfo = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse user info response: {}", e))?;
        Ok(user_info.email)
    }
}

#[async_trait]
impl TokenExchange for GoogleAuth {
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant> {
        let request = self
            .client
            .exchange_refresh_token(refresh_token)
            .request_async(async_http_client);

        let token = tokio::time::timeout(self.http_timeout, request)
            .await
            .map_err(|_| anyhow!("token endpoint did not answer within {:?}", self.http_timeout))?
            .map_err(|e| anyhow!(describe_token_error(e)))?;

        Ok(TokenGrant {
            access_token: token.access_token().clone(),
            refresh_token: token.refresh_token().cloned(),
            expires_in: token.expires_in(),
        })
    }
}

/// Stand-in used when no OAuth client is configured; stored tokens that are
/// still valid keep working, refreshes explain what is missing.
pub struct UnconfiguredExchange {
    pub hint: String,
}

#[async_trait]
impl TokenExchange for UnconfiguredExchange {
    async fn refresh(&self, _refresh_token: &RefreshToken) -> Result<TokenGrant> {
        Err(anyhow!("no OAuth client configured ({})", self.hint))
    }
}

fn credential_from_response(token: &BasicTokenResponse) -> Result<Credential> {
    let expires_in = token.expires_in().unwrap_or(Duration::from_secs(3600));
    let expires_at =
        OffsetDateTime::now_utc() + time::Duration::seconds(expires_in.as_secs() as i64);
    let refresh_token = token.refresh_token().cloned().ok_or_else(|| {
        anyhow!("Google did not issue a refresh token; revoke gwcli's access in your Google account settings and sign in again")
    })?;

    Ok(Credential {
        access_token: token.access_token().clone(),
        refresh_token,
        expires_at,
    })
}

/// Human readable reason for a failed token request, without token material
fn describe_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => match response.error_description() {
            Some(description) => format!("{}: {}", response.error(), description),
            None => response.error().to_string(),
        },
        RequestTokenError::Request(e) => format!("request to token endpoint failed: {}", e),
        RequestTokenError::Parse(e, _) => format!("unexpected token endpoint response: {}", e),
        RequestTokenError::Other(e) => e,
    }
}
