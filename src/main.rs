mod accounts;
mod auth;
mod callback;
mod commands;
mod config;
mod context;
mod error;
mod google;
mod output;

use clap::{ArgAction, Parser};
use commands::Commands;
use context::Context;
use output::OutputFormat;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "gwcli",
    about = "Gmail and Google Calendar from the command line, across multiple accounts",
    author,
    version
)]
struct Cli {
    /// Account alias (or @email) to act as; defaults to the default account
    #[arg(short, long, global = true, env = "GWCLI_ACCOUNT")]
    account: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, env = "GWCLI_OUTPUT")]
    output: Option<OutputFormat>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    // Completions need neither config nor accounts
    if let Commands::Completions(cmd) = &cli.command {
        return cmd.execute();
    }

    let config_dir = config::get_app_config_dir()?;
    let settings = config::Settings::load(&config_dir)?;
    let ctx = Context::new(config_dir, settings, cli.account, cli.output);

    // Execute the specified command
    match cli.command {
        Commands::Account(cmd) => cmd.execute(&ctx).await,
        Commands::Auth(cmd) => cmd.execute(&ctx).await,
        Commands::Mail(cmd) => cmd.execute(&ctx).await,
        Commands::Calendar(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gwcli", "mail", "list", "-a", "work", "-o", "json", "-vv"])
            .unwrap();
        assert_eq!(cli.account.as_deref(), Some("work"));
        assert_eq!(cli.output, Some(OutputFormat::Json));
        assert_eq!(log_level(cli.verbose), Level::DEBUG);
    }
}
