//! `fieldcrypt` CLI tool for batch encryption runs and key generation.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fieldcrypt::batch::{
    AssumeYes, BatchOptions, BatchProcessor, Confirmation, RunOutcome, SkipReason, Transform,
    TypeStatus,
};
use fieldcrypt::config::CryptConfig;
use fieldcrypt::engine::CryptEngine;
use fieldcrypt::kdf::KdfParams;
use fieldcrypt::key_pair::generate_key_files;
use fieldcrypt::reencrypt::ReEncryption;
use fieldcrypt_json_store::JsonLinesStore;
use secrecy::ExposeSecret;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fieldcrypt")]
#[command(about = "Encrypt, decrypt and re-encrypt configured record attributes")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file holding the [fieldcrypt] table
    #[arg(short, long, global = true, env = "FIELDCRYPT_CONFIG", default_value = "fieldcrypt.toml")]
    config: PathBuf,

    /// Directory of the JSON-Lines record store
    #[arg(short, long, global = true, env = "FIELDCRYPT_STORE", default_value = "data")]
    store: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Suppress output except errors")]
    quiet: bool,

    #[arg(short = 'y', long = "yes", global = true, help = "Do not ask for confirmation")]
    yes: bool,
}

#[derive(Args, Debug, Clone, Copy)]
struct RunArgs {
    /// Perform a test run, don't save to the store
    #[arg(long)]
    dry_run: bool,

    /// Records processed between store buffer releases
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt the configured attributes of every stored record
    Encrypt(RunArgs),

    /// Decrypt the configured attributes of every stored record
    Decrypt(RunArgs),

    /// Change encryption from one method to the other
    ReEncrypt {
        #[command(flatten)]
        run: RunArgs,

        /// Decryption method; defaults to the method not configured
        source: Option<String>,

        /// Encryption method; defaults to the configured method
        target: Option<String>,
    },

    /// Generate a key pair for the rsa method
    Keygen {
        /// Public key output; defaults to rsaPublicKeyFile
        #[arg(long)]
        public_key: Option<PathBuf>,

        /// Private key output; defaults to rsaPrivateKeyFile
        #[arg(long)]
        private_key: Option<PathBuf>,

        /// Overwrite existing key files
        #[arg(long)]
        force: bool,
    },
}

/// Console output honouring `--quiet`.
#[derive(Clone, Copy)]
struct Output {
    quiet: bool,
}

impl Output {
    fn line(self, message: impl Display) {
        if !self.quiet {
            println!("{message}");
        }
    }
}

/// Asks on stdin; anything but "y" or "yes" declines.
struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&mut self, message: &str) -> io::Result<bool> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{message} [y/N] ")?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Cannot initialise logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = execute_command(&cli) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

fn setup_logging(cli: &Cli) -> Result<()> {
    let log_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("fieldcrypt={log_level}").parse()?)
        .add_directive(format!("fieldcrypt_cli={log_level}").parse()?)
        .add_directive(format!("fieldcrypt_json_store={log_level}").parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    Ok(())
}

fn execute_command(cli: &Cli) -> Result<()> {
    let output = Output { quiet: cli.quiet };
    let mut confirmation: Box<dyn Confirmation> =
        if cli.yes { Box::new(AssumeYes) } else { Box::new(StdinConfirmation) };

    match &cli.command {
        Commands::Encrypt(args) => {
            let config = load_config(&cli.config)?;
            let engine = CryptEngine::from_config(&config)?;
            output.line(format_args!(
                "Encrypting stored records using {} encryption",
                engine.display_name()
            ));

            let mut store = open_store(&cli.store)?;
            let outcome = BatchProcessor::new(&mut store, options(&config, *args))
                .run(&Transform::Encrypt(&engine), confirmation.as_mut())
                .context("There was a problem encrypting your entities")?;
            print_outcome(output, &outcome);
            output.line("Finished encrypting your entities.");
        }
        Commands::Decrypt(args) => {
            let config = load_config(&cli.config)?;
            let engine = CryptEngine::from_config(&config)?;
            output.line(format_args!(
                "Decrypting stored records using {} decryption",
                engine.display_name()
            ));

            let mut store = open_store(&cli.store)?;
            let outcome = BatchProcessor::new(&mut store, options(&config, *args))
                .run(&Transform::Decrypt(&engine), confirmation.as_mut())
                .context("There was a problem decrypting your entities")?;
            print_outcome(output, &outcome);
            output.line("Finished decrypting your entities.");
        }
        Commands::ReEncrypt { run, source, target } => {
            let config = load_config(&cli.config)?;
            let reencryption =
                ReEncryption::from_config(&config, source.as_deref(), target.as_deref())?;
            output.line(format_args!(
                "Re-encrypting stored records using {} decryption and {} encryption",
                reencryption.source().display_name(),
                reencryption.target().display_name()
            ));

            let mut store = open_store(&cli.store)?;
            let outcome = reencryption
                .run(&mut store, options(&config, *run), confirmation.as_mut())
                .context("There was a problem re-encrypting your entities")?;
            print_outcome(output, &outcome);
            output.line("Finished re-encrypting your entities.");
        }
        Commands::Keygen { public_key, private_key, force } => {
            let config = if cli.config.exists() {
                load_config(&cli.config)?
            } else {
                let mut config = CryptConfig::default();
                config.apply_overrides(|name| std::env::var(name).ok());
                config
            };

            let public = public_key
                .clone()
                .or_else(|| config.rsa_public_key_file.clone())
                .context("no public key path, pass --public-key or set rsaPublicKeyFile")?;
            let private = private_key
                .clone()
                .or_else(|| config.rsa_private_key_file.clone())
                .context("no private key path, pass --private-key or set rsaPrivateKeyFile")?;
            let passphrase = config
                .rsa_key_passphrase
                .as_ref()
                .filter(|p| !p.expose_secret().is_empty())
                .context("rsaKeyPassphrase not set in config or FIELDCRYPT_RSA_KEY_PASSPHRASE")?;

            if !force {
                for path in [&public, &private] {
                    if path.exists() {
                        bail!("{} already exists, pass --force to overwrite", path.display());
                    }
                }
            }

            generate_key_files(&public, &private, passphrase, KdfParams::default())?;
            output.line(format_args!("Wrote public key to {}", public.display()));
            output.line(format_args!("Wrote private key to {}", private.display()));
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<CryptConfig> {
    CryptConfig::load(path).with_context(|| format!("cannot load config {}", path.display()))
}

fn open_store(dir: &Path) -> Result<JsonLinesStore> {
    JsonLinesStore::open(dir).with_context(|| format!("cannot open store {}", dir.display()))
}

fn options(config: &CryptConfig, args: RunArgs) -> BatchOptions {
    BatchOptions::from_config(config)
        .with_dry_run(args.dry_run)
        .with_chunk_size(args.batch_size.unwrap_or_else(|| config.batch_size()))
}

fn print_outcome(output: Output, outcome: &RunOutcome) {
    let report = match outcome {
        RunOutcome::Declined => {
            output.line("Aborted, no records were changed.");
            return;
        }
        RunOutcome::Completed(report) => report,
    };

    for entry in &report.types {
        let record_type = &entry.record_type;
        match entry.status {
            TypeStatus::Processed { processed, total } => {
                if report.dry_run {
                    output.line("Dry run, records not updated in store");
                }
                output.line(format_args!(
                    "Processed {processed} of {total} records for record type {record_type}"
                ));
            }
            TypeStatus::Skipped(SkipReason::NoAttributes) => {
                output.line(format_args!(
                    "No properties specified for record type {record_type} in config"
                ));
            }
            TypeStatus::Skipped(SkipReason::UnknownRecordType) => {
                output.line(format_args!("Record type {record_type} not found in store"));
            }
        }
    }
}
