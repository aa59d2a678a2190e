use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{Generator, generate, shells};
use std::io;

use crate::Cli;

const BIN_NAME: &str = "gwcli";

#[derive(Args, Debug)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    file: Option<String>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Posh, // PowerShell
    Elvish,
}

impl CompletionsCommand {
    pub fn execute(&self) -> Result<()> {
        match &self.file {
            Some(path) => {
                let mut file = std::fs::File::create(path)?;
                self.write_to(&mut file);
                println!("Completions written to {}", path);
            }
            None => self.write_to(&mut io::stdout()),
        }
        Ok(())
    }

    fn write_to(&self, out: &mut dyn io::Write) {
        match self.shell {
            Shell::Bash => emit(shells::Bash, out),
            Shell::Zsh => emit(shells::Zsh, out),
            Shell::Fish => emit(shells::Fish, out),
            Shell::Posh => emit(shells::PowerShell, out),
            Shell::Elvish => emit(shells::Elvish, out),
        }
    }
}

fn emit<G: Generator>(shell: G, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completions_mention_subcommands() {
        let command = CompletionsCommand {
            shell: Shell::Bash,
            file: None,
        };
        let mut buffer = Vec::new();
        command.write_to(&mut buffer);
        let script = String::from_utf8(buffer).unwrap();
        assert!(script.contains("gwcli"));
        assert!(script.contains("freebusy"));
    }
}
