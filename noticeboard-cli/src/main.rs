use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use noticeboard_core::config::Config;
use noticeboard_core::keys::KeyManager;
use noticeboard_core::logging::{init_logging_with_config, LogConfig};
use noticeboard_core::replication::{self, GitBackend, ReplicationManager};
use noticeboard_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use noticeboard_core::store::{sanitize_bytes, MessageStore, Record, StoreError, ValidationError};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Exit status for rejected input
const EXIT_INVALID_INPUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "noticeboard")]
#[command(author, version, about = "Signed bulletin board", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for keys and messages
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    /// Do not push new messages to the git mirror
    #[arg(long, global = true)]
    no_replication: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign and store a message, printing its identifier
    Post {
        /// Message text; read from stdin when omitted
        content: Option<String>,

        /// Message type (message, system, error)
        #[arg(short = 't', long = "type", default_value = "message")]
        kind: String,
    },

    /// Print all messages, oldest first
    List {
        /// Print a JSON array instead of text
        #[arg(long)]
        json: bool,

        /// Check each signature against the local key
        #[arg(long)]
        verify: bool,
    },

    /// Check every stored signature; fails if any does not verify
    Verify,

    /// Print the fingerprint of the signing key
    Fingerprint,

    /// Make sure a signing keypair exists
    Keygen {
        /// Replace the existing keypair
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;

    let log_config = LogConfig::try_from(&config.logging)?;
    init_logging_with_config(log_config)?;
    debug!(data_dir = %config.storage.data_dir.display(), "Configuration loaded");

    match args.command {
        Command::Post { content, kind } => post(&config, content, &kind).await,
        Command::List { json, verify } => list(&config, json, verify),
        Command::Verify => verify(&config),
        Command::Fingerprint => {
            let keys = open_keys(&config)?;
            println!("{}", keys.fingerprint());
            Ok(ExitCode::SUCCESS)
        }
        Command::Keygen { force } => keygen(&config, force),
    }
}

/// Defaults (or `--config`), then `NOTICEBOARD_*` variables, then flags
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;

    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if args.no_replication {
        config.replication.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn open_keys(config: &Config) -> Result<KeyManager> {
    let keys_dir = config.storage.keys_dir();
    KeyManager::open(&keys_dir, config.keys.rsa_bits)
        .with_context(|| format!("Failed to open signing key in {}", keys_dir.display()))
}

fn open_store(config: &Config) -> Result<MessageStore> {
    let keys = Arc::new(open_keys(config)?);
    let messages_dir = config.storage.messages_dir();
    MessageStore::new(&messages_dir, keys)
        .with_context(|| format!("Failed to open {}", messages_dir.display()))
}

async fn post(config: &Config, content: Option<String>, kind: &str) -> Result<ExitCode> {
    let content = match content {
        Some(content) => content,
        None => match sanitize_bytes(&read_stdin()?) {
            Ok(content) => content,
            Err(e) => return Ok(invalid_input(&e)),
        },
    };

    let coordinator = Arc::new(ShutdownCoordinator::new(
        config.replication.shutdown_timeout,
    ));
    install_signal_handlers(coordinator.clone());

    let mut store = open_store(config)?;
    let mut manager: Option<ReplicationManager> = None;
    if config.replication.enabled {
        let repo = config.repo_path();
        let backend = Arc::new(GitBackend::from_config(&config.replication, &repo));
        manager = replication::start_if_available(
            &config.replication,
            backend,
            &repo,
            coordinator.subscribe(),
        )
        .await;
        if let Some(manager) = &manager {
            store = store.with_replication(manager.handle());
        }
    }

    let result = store.save(&content, kind);

    coordinator.shutdown().await;
    if let Some(manager) = manager {
        manager.wait(coordinator.timeout()).await;
    }
    coordinator.complete().await;

    match result {
        Ok(identifier) => {
            println!("{}", identifier);
            Ok(ExitCode::SUCCESS)
        }
        Err(StoreError::Validation(e)) => Ok(invalid_input(&e)),
        Err(e) => Err(e).context("Failed to save message"),
    }
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("Failed to read stdin")?;
    Ok(raw)
}

fn invalid_input(error: &ValidationError) -> ExitCode {
    eprintln!("Error: {}", error);
    ExitCode::from(EXIT_INVALID_INPUT)
}

fn list(config: &Config, json: bool, verify: bool) -> Result<ExitCode> {
    let store = open_store(config)?;
    let records = store.list();

    if json {
        let mut out = Vec::with_capacity(records.len());
        for record in &records {
            let mut value = serde_json::to_value(record)?;
            if verify {
                value["verified"] = serde_json::Value::Bool(store.verify_record(record));
            }
            out.push(value);
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(ExitCode::SUCCESS);
    }

    for record in &records {
        let status = verify.then(|| store.verify_record(record));
        print!("{}", render_text(record, status));
    }
    Ok(ExitCode::SUCCESS)
}

fn render_text(record: &Record, verified: Option<bool>) -> String {
    let mark = match verified {
        Some(true) => " [verified]",
        Some(false) => " [INVALID SIGNATURE]",
        None => "",
    };
    format!(
        "{} {} ({}) by {}{}\n{}\n\n",
        record.date, record.identifier, record.kind, record.fingerprint, mark, record.content
    )
}

fn verify(config: &Config) -> Result<ExitCode> {
    let store = open_store(config)?;
    let records = store.list();

    let mut failed = 0;
    for record in &records {
        if store.verify_record(record) {
            println!("OK   {}", record.identifier);
        } else {
            println!("FAIL {}", record.identifier);
            failed += 1;
        }
    }
    info!(total = records.len(), failed, "Verification finished");

    if failed > 0 {
        eprintln!("{} of {} records failed verification", failed, records.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn keygen(config: &Config, force: bool) -> Result<ExitCode> {
    let keys_dir = config.storage.keys_dir();
    let created = KeyManager::ensure_key_pair(&keys_dir, config.keys.rsa_bits)
        .with_context(|| format!("Failed to create keypair in {}", keys_dir.display()))?;

    let mut keys = open_keys(config)?;
    if force && !created {
        keys.regenerate().context("Failed to regenerate keypair")?;
    }

    println!("{}", keys.fingerprint());
    Ok(ExitCode::SUCCESS)
}
