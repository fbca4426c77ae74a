mod cli;
mod config;
mod storage;

use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use keyward_core::{decrypt, encrypt, KeyGenerator, SecureStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, CryptArgs};

const HEALTH_LABEL: &str = "keyward.health-check";

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Key { label, reveal } => {
            let generator = storage::generator_from_config(&config)?;
            println!("{}", describe_key(&generator, &label, reveal)?);
        }
        Command::Encrypt(args) => {
            let generator = storage::generator_from_config(&config)?;
            let plaintext = read_input(args.input.as_deref())?;
            let encoded = encrypt_to_base64(&generator, &args.label, &plaintext)?;
            write_output(args.output.as_deref(), format!("{encoded}\n").as_bytes())?;
        }
        Command::Decrypt(CryptArgs {
            label,
            input,
            output,
        }) => {
            let generator = storage::generator_from_config(&config)?;
            let encoded = read_input(input.as_deref())?;
            let plaintext = decrypt_from_base64(&generator, &label, &encoded)?;
            write_output(output.as_deref(), &plaintext)?;
        }
        Command::Clear { yes } => {
            if !yes {
                color_eyre::eyre::bail!("refusing to remove all keys without --yes");
            }
            let generator = storage::generator_from_config(&config)?;
            generator.clear_all()?;
            println!("All keys removed");
        }
        Command::Health => {
            let generator = storage::generator_from_config(&config)?;
            run_health(&generator)?;
            println!("Storage: ok");
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; stderr keeps stdout for payloads.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keyward {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn describe_key<S: SecureStore>(
    generator: &KeyGenerator<S>,
    label: &str,
    reveal: bool,
) -> Result<String> {
    let key = generator.encryption_key(label)?;
    if reveal {
        Ok(STANDARD.encode(key.as_bytes()))
    } else {
        Ok(format!("Key ready for label `{label}`"))
    }
}

fn encrypt_to_base64<S: SecureStore>(
    generator: &KeyGenerator<S>,
    label: &str,
    plaintext: &[u8],
) -> Result<String> {
    let key = generator.encryption_key(label)?;
    let payload = encrypt(plaintext, &key)?;
    Ok(STANDARD.encode(payload.as_bytes()))
}

fn decrypt_from_base64<S: SecureStore>(
    generator: &KeyGenerator<S>,
    label: &str,
    encoded: &[u8],
) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(encoded).map_err(|e| eyre!("payload is not text: {e}"))?;
    let payload = STANDARD
        .decode(text.trim())
        .map_err(|e| eyre!("payload is not base64: {e}"))?;
    let key = generator.encryption_key(label)?;
    Ok(decrypt(payload, &key)?)
}

/// Provision a throwaway key, round-trip a payload through it, then drop the entry.
fn run_health<S: SecureStore>(generator: &KeyGenerator<S>) -> Result<()> {
    let payload = b"ok";
    let sealed = encrypt_to_base64(generator, HEALTH_LABEL, payload)?;
    let round_trip = decrypt_from_base64(generator, HEALTH_LABEL, sealed.as_bytes())?;
    generator.store().delete(HEALTH_LABEL)?;

    if round_trip != payload {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    info!("health check passed");
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => Ok(fs::read(path)?),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => fs::write(path, bytes)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
