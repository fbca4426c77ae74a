use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "keyward",
    about = "Per-label encryption keys kept in secure storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Provision the key for a label (created on first use).
    Key {
        label: String,
        /// Print the key as base64 instead of a confirmation.
        #[arg(long)]
        reveal: bool,
    },
    /// Encrypt stdin (or --input) and print the payload as base64.
    Encrypt(CryptArgs),
    /// Decrypt a base64 payload from stdin (or --input).
    Decrypt(CryptArgs),
    /// Remove every key from the configured store.
    Clear {
        /// Required confirmation; keys cannot be recovered.
        #[arg(long)]
        yes: bool,
    },
    /// Round-trip a throwaway key through the configured store.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct CryptArgs {
    /// Label of the key to use.
    #[arg(short, long)]
    pub label: String,
    /// Read from this file instead of stdin.
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// Write to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_subcommand() {
        let cli = Cli::try_parse_from(["keyward", "key", "test1"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Key {
                label: "test1".into(),
                reveal: false
            }
        );
    }

    #[test]
    fn parses_encrypt_with_files() {
        let cli = Cli::try_parse_from([
            "keyward", "encrypt", "-l", "test1", "--input", "in.txt", "-o", "out.b64",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Encrypt(CryptArgs {
                label: "test1".into(),
                input: Some(PathBuf::from("in.txt")),
                output: Some(PathBuf::from("out.b64")),
            })
        );
    }

    #[test]
    fn decrypt_requires_label() {
        assert!(Cli::try_parse_from(["keyward", "decrypt"]).is_err());
    }

    #[test]
    fn requires_subcommand() {
        assert!(Cli::try_parse_from(["keyward"]).is_err());
    }

    #[test]
    fn parses_clear_confirmation() {
        let cli = Cli::try_parse_from(["keyward", "clear", "--yes"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Clear { yes: true });
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["keyward", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }
}
