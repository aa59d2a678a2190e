use super::confirm;
use crate::accounts::{Account, AccountManager, TokenState};
use crate::auth::{expand_scopes, short_scope};
use crate::context::Context;
use crate::output::{OutputFormat, print_record, print_rows};
use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use tracing::warn;

#[derive(Debug, Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    command: AccountCommands,
}

#[derive(Debug, Subcommand)]
enum AccountCommands {
    /// Sign in to a Google account and register it under an alias
    Add {
        /// Alias for the account; derived from the email when omitted
        alias: Option<String>,

        /// Scope to request (mail, mail.readonly, mail.send, calendar,
        /// calendar.readonly or a full scope URL); repeatable
        #[arg(long = "scope", value_name = "SCOPE")]
        scopes: Vec<String>,
    },

    /// Remove an account and its stored credential
    Remove {
        alias: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List configured accounts
    List,

    /// Make an account the default
    Switch { alias: String },

    /// Change an account's alias
    Rename { old: String, new: String },

    /// Show one account (the selected one when no alias is given)
    Show { alias: Option<String> },
}

/// Table row for `account list`
#[derive(Tabled, Serialize)]
struct AccountRow {
    #[tabled(rename = "", display_with = "default_marker")]
    default: bool,
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Scopes")]
    scopes: String,
    #[tabled(rename = "Added")]
    added: String,
    #[tabled(rename = "Token")]
    token: String,
}

fn default_marker(default: &bool) -> String {
    if *default { "*".to_string() } else { String::new() }
}

/// Short, comma separated scope names without the identity scopes
pub(super) fn display_scopes(account: &Account) -> String {
    account
        .scopes
        .iter()
        .filter(|s| !matches!(s.as_str(), "openid" | "email"))
        .map(|s| short_scope(s))
        .collect::<Vec<_>>()
        .join(",")
}

pub(super) fn describe_state(manager: &AccountManager, alias: &str) -> String {
    match manager.token_state(alias) {
        Ok(state) => state.to_string(),
        Err(e) => format!("unavailable ({})", e),
    }
}

/// Run consent and register the resulting account
pub(super) async fn add_account(
    ctx: &Context,
    manager: &mut AccountManager,
    alias: Option<String>,
    scopes: &[String],
) -> Result<Account> {
    // Fail before the browser opens when the alias is unusable
    if let Some(alias) = &alias {
        manager.check_new_alias(alias)?;
    }

    let auth = ctx.google_auth()?;
    let login = auth.login(&expand_scopes(scopes)).await?;

    if let Some(existing) = manager
        .registry()
        .list()
        .iter()
        .find(|a| a.email.eq_ignore_ascii_case(&login.email))
    {
        warn!(
            "{} is already registered as '{}'; adding a second alias",
            login.email, existing.alias
        );
    }

    let alias = alias.unwrap_or_else(|| manager.registry().derive_alias(&login.email));
    let account = manager.add(&alias, &login.email, login.scopes, &login.credential)?;
    Ok(account)
}

impl AccountCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut manager = ctx.account_manager()?;

        match self.command {
            AccountCommands::Add { alias, scopes } => {
                let account = add_account(ctx, &mut manager, alias, &scopes).await?;
                println!("Added account '{}' ({})", account.alias, account.email);
                if account.default {
                    println!("'{}' is now the default account.", account.alias);
                }
            }
            AccountCommands::Remove { alias, yes } => {
                let account = manager.resolve(&alias)?;
                let proceed = confirm(
                    &format!("Remove account '{}' ({})?", account.alias, account.email),
                    "The stored credential is deleted as well",
                    yes,
                );
                if !proceed {
                    println!("Operation cancelled. No changes made.");
                    return Ok(());
                }

                let removed = manager.remove(&account.alias)?;
                println!("Removed account '{}'", removed.alias);
                if removed.default && !manager.registry().is_empty() {
                    println!("No default account is set. Run 'gwcli account switch <ALIAS>' to choose one.");
                }
            }
            AccountCommands::List => {
                let rows: Vec<AccountRow> = manager
                    .registry()
                    .list()
                    .iter()
                    .map(|account| AccountRow {
                        default: account.default,
                        alias: account.alias.clone(),
                        email: account.email.clone(),
                        scopes: display_scopes(account),
                        added: account.added.format("%Y-%m-%d").to_string(),
                        token: describe_state(&manager, &account.alias),
                    })
                    .collect();
                if rows.is_empty() && ctx.output == OutputFormat::Table {
                    println!("No accounts configured. Run 'gwcli account add' to add one.");
                    return Ok(());
                }
                print_rows(&rows, ctx.output)?;
            }
            AccountCommands::Switch { alias } => {
                let account = manager.resolve(&alias)?;
                manager.switch(&account.alias)?;
                println!("Default account is now '{}' ({})", account.alias, account.email);
            }
            AccountCommands::Rename { old, new } => {
                let account = manager.resolve(&old)?;
                manager.rename(&account.alias, &new)?;
                println!("Renamed '{}' to '{}'", account.alias, new);
            }
            AccountCommands::Show { alias } => {
                let selector = alias.as_deref().unwrap_or(&ctx.selector);
                let account = manager.resolve(selector)?;
                let state = manager.token_state(&account.alias)?;
                let token = match state {
                    TokenState::Valid { expires_at } | TokenState::Expired { expires_at } => {
                        format!("{} at {}", state, expires_at)
                    }
                    TokenState::NoCredential => state.to_string(),
                };
                let fields = [
                    ("Alias", account.alias.clone()),
                    ("Email", account.email.clone()),
                    ("Default", if account.default { "yes" } else { "no" }.to_string()),
                    ("Scopes", account.scopes.iter().cloned().collect::<Vec<_>>().join(" ")),
                    ("Added", account.added.to_rfc3339()),
                    ("Token", token),
                    ("Storage", manager.tokens().store().backend_name().to_string()),
                ];
                print_record(&fields, &account, ctx.output)?;
            }
        }

        Ok(())
    }
}
