mod account;
mod auth;
mod calendar;
mod completions;
mod mail;

pub use account::AccountCommand;
pub use auth::AuthCommand;
pub use calendar::CalendarCommand;
pub use completions::CompletionsCommand;
pub use mail::MailCommand;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add, remove and switch between Google accounts
    Account(AccountCommand),

    /// Sign in, sign out and inspect access tokens
    Auth(AuthCommand),

    /// Gmail messages, threads and labels
    Mail(MailCommand),

    /// Google Calendar events, sharing and availability
    Calendar(CalendarCommand),

    /// Generate shell completion scripts
    Completions(CompletionsCommand),
}

/// Ask before a destructive action unless `--yes` was given
fn confirm(prompt: &str, help: &str, yes: bool) -> bool {
    if yes {
        return true;
    }
    inquire::Confirm::new(prompt)
        .with_default(false)
        .with_help_message(help)
        .prompt()
        .unwrap_or(false)
}
