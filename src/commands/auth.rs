use super::account::{add_account, describe_state};
use crate::accounts::{Account, AccountManager, TokenState};
use crate::auth::expand_scopes;
use crate::context::Context;
use crate::error::AccountError;
use crate::output::print_rows;
use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthCommands,
}

#[derive(Debug, Subcommand)]
enum AuthCommands {
    /// Sign in again and replace the selected account's credential
    Login {
        /// Scope to request instead of the account's current scopes; repeatable
        #[arg(long = "scope", value_name = "SCOPE")]
        scopes: Vec<String>,
    },

    /// Delete the stored credential; the account stays registered
    Logout {
        /// Also revoke the refresh token at Google
        #[arg(long)]
        revoke: bool,
    },

    /// Show token state without contacting Google
    Status {
        /// Report every account instead of the selected one
        #[arg(long)]
        all: bool,
    },

    /// Refresh the access token now
    Refresh,
}

/// Table row for `auth status`
#[derive(Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(skip)]
    logged_in: bool,
    #[tabled(skip)]
    expires_at: Option<String>,
}

fn status_row(manager: &AccountManager, account: &Account) -> StatusRow {
    let (logged_in, expires_at) = match manager.token_state(&account.alias) {
        Ok(TokenState::Valid { expires_at } | TokenState::Expired { expires_at }) => {
            (true, Some(expires_at.to_string()))
        }
        _ => (false, None),
    };
    StatusRow {
        alias: account.alias.clone(),
        email: account.email.clone(),
        status: describe_state(manager, &account.alias),
        logged_in,
        expires_at,
    }
}

impl AuthCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut manager = ctx.account_manager()?;

        match self.command {
            AuthCommands::Login { scopes } => {
                if manager.registry().is_empty() {
                    println!("No accounts configured yet; adding a new one.");
                    let alias = (!ctx.selector.is_empty()).then(|| ctx.selector.clone());
                    let account = add_account(ctx, &mut manager, alias, &scopes).await?;
                    println!("Added account '{}' ({})", account.alias, account.email);
                    return Ok(());
                }

                let account = manager.resolve(&ctx.selector)?;
                let requested = if scopes.is_empty() && !account.scopes.is_empty() {
                    account.scopes.clone()
                } else {
                    expand_scopes(&scopes)
                };

                let auth = ctx.google_auth()?;
                let login = auth.login(&requested).await?;
                if !login.email.eq_ignore_ascii_case(&account.email) {
                    bail!(
                        "Signed in as {} but account '{}' belongs to {}. Use 'gwcli account add' to register a different account.",
                        login.email,
                        account.alias,
                        account.email
                    );
                }

                manager.relogin(&account.alias, login.scopes, &login.credential)?;
                println!("Logged in to '{}' ({})", account.alias, account.email);
            }
            AuthCommands::Logout { revoke } => {
                let account = manager.resolve(&ctx.selector)?;
                if revoke {
                    match manager.tokens().store().get(&account.alias) {
                        Ok(credential) => {
                            ctx.google_auth()?.revoke(&credential.refresh_token).await?;
                            println!("Revoked access for {}", account.email);
                        }
                        Err(AccountError::CredentialNotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }

                if manager.logout(&account.alias)? {
                    println!("Logged out of '{}'", account.alias);
                } else {
                    println!("'{}' was not logged in", account.alias);
                }
            }
            AuthCommands::Status { all } => {
                let rows: Vec<StatusRow> = if all {
                    manager
                        .registry()
                        .list()
                        .iter()
                        .map(|account| status_row(&manager, account))
                        .collect()
                } else {
                    let account = manager.resolve(&ctx.selector)?;
                    vec![status_row(&manager, &account)]
                };
                print_rows(&rows, ctx.output)?;
            }
            AuthCommands::Refresh => {
                let (account, source) = manager.token_source(&ctx.selector)?;
                source.refresh().await?;
                println!(
                    "Refreshed access token for '{}'; valid until {}",
                    account.alias,
                    source.expires_at()
                );
            }
        }

        Ok(())
    }
}
