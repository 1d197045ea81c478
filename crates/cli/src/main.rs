//! WinInspect CLI
//!
//! Sends one command to the inspection daemon and prints the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use protocol::{registry, ProtocolError, RequestOptions};
use tracing_subscriber::EnvFilter;
use wininspect_cli::config::{default_config_path, Config, EnvOverride};
use wininspect_cli::identity::{generate_identity, CredentialSource};
use wininspect_cli::{run_request, ClientOptions, RemoteClient};

/// Exit status for invocation errors (unknown command, missing arguments).
const EXIT_USAGE: i32 = 2;

/// Exit status for every other failure.
const EXIT_FAILURE: i32 = 1;

/// WinInspect - query and control a remote desktop through the inspection daemon.
#[derive(Parser, Debug)]
#[command(name = "wininspect")]
#[command(version, about, long_about = None)]
#[command(after_help = "Run `wininspect commands` to list the remote commands.")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted before or after any command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Daemon address
    #[arg(long, global = true, value_name = "HOST:PORT")]
    pub tcp: Option<String>,

    /// Private key for challenge-response authentication
    #[arg(long, global = true, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Identity name sent with the signature
    #[arg(long, global = true, value_name = "NAME")]
    pub identity: Option<String>,

    /// Read timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl GlobalArgs {
    /// Combines flags given before the command with those given after it;
    /// the later ones win.
    fn overridden_by(&self, later: &GlobalArgs) -> GlobalArgs {
        GlobalArgs {
            config: later.config.clone().or_else(|| self.config.clone()),
            verbose: self.verbose || later.verbose,
            tcp: later.tcp.clone().or_else(|| self.tcp.clone()),
            key: later.key.clone().or_else(|| self.key.clone()),
            identity: later.identity.clone().or_else(|| self.identity.clone()),
            timeout: later.timeout.or(self.timeout),
        }
    }
}

/// Local commands; anything else is sent to the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Save settings to the configuration file (use with --key)
    Config,

    /// Generate a new private key for authentication
    Keygen {
        /// Where to write the private key
        #[arg(long, short, value_name = "PATH")]
        output: PathBuf,

        /// Comment for the authorized_keys line
        #[arg(long)]
        comment: Option<String>,
    },

    /// List the remote commands
    Commands,

    /// Print window events as they happen (Ctrl+C to stop)
    Watch {
        /// Seconds between polls
        #[arg(long, default_value_t = 1, value_name = "SECS")]
        interval: u64,

        /// Stop after this many polls
        #[arg(long, value_name = "N")]
        count: Option<u64>,
    },

    /// Remote command, e.g. `info 0x1234`
    #[command(external_subcommand)]
    Remote(Vec<String>),
}

/// A remote command line: the command, its arguments and any flags mixed in.
#[derive(Parser, Debug)]
#[command(name = "wininspect", no_binary_name = true)]
struct RemoteInvocation {
    #[command(flatten)]
    global: GlobalArgs,

    /// Query a stored snapshot instead of the live desktop
    #[arg(long, value_name = "ID")]
    snapshot: Option<String>,

    /// Command name followed by its arguments
    #[arg(required = true, allow_negative_numbers = true, value_name = "COMMAND")]
    words: Vec<String>,
}

impl RemoteInvocation {
    fn parse_argv(argv: &[String]) -> Self {
        Self::try_parse_from(argv).unwrap_or_else(|e| e.exit())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            match err.downcast_ref::<ProtocolError>() {
                Some(protocol_err) if protocol_err.is_usage() => {
                    eprintln!();
                    eprintln!("Run `wininspect commands` to list the remote commands.");
                    EXIT_USAGE
                }
                _ => EXIT_FAILURE,
            }
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let invocation = match &cli.command {
        Commands::Remote(argv) => Some(RemoteInvocation::parse_argv(argv)),
        _ => None,
    };
    let global = match &invocation {
        Some(invocation) => cli.global.overridden_by(&invocation.global),
        None => cli.global.clone(),
    };

    let config_path = global.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    let overrides = config.apply_env_overrides();

    init_tracing(global.verbose, &config.logging.level);
    tracing::debug!(
        exists = config_path.exists(),
        "Using config file: {:?}",
        config_path
    );
    for EnvOverride { variable, value } in &overrides {
        tracing::info!("Overriding {} from environment: {}", variable, value);
    }

    match cli.command {
        Commands::Config => save_settings(&global, config, &config_path),
        Commands::Keygen { output, comment } => keygen(&output, comment.as_deref()),
        Commands::Commands => {
            print!("{}", registry::usage());
            Ok(())
        }
        Commands::Watch { interval, count } => watch(&global, config, interval, count).await,
        Commands::Remote(argv) => {
            let invocation = invocation.unwrap_or_else(|| RemoteInvocation::parse_argv(&argv));
            remote(&global, config, invocation).await
        }
    }
}

/// Initialize tracing on stderr: `-v`, then `RUST_LOG`, then the config level.
fn init_tracing(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn save_settings(global: &GlobalArgs, mut config: Config, config_path: &Path) -> Result<()> {
    let Some(key) = &global.key else {
        print!("{}", config.to_toml()?);
        return Ok(());
    };

    let key = std::path::absolute(key)
        .with_context(|| format!("Failed to resolve key path: {}", key.display()))?;
    config.client.key_path = Some(key.clone());
    if let Some(identity) = &global.identity {
        config.client.identity = identity.clone();
    }
    if let Some(address) = &global.tcp {
        config.client.address = address.clone();
    }
    config.validate()?;
    config.save(config_path)?;

    println!("Key path saved: {}", key.display());
    Ok(())
}

fn keygen(output: &Path, comment: Option<&str>) -> Result<()> {
    let identity = generate_identity(output)?;

    println!("Private key written to {}", output.display());
    println!();
    println!("Add this line to the daemon's authorized_keys file:");
    println!("{}", identity.authorized_key(comment).to_line());
    println!();
    println!("Fingerprint: {}", identity.fingerprint());
    Ok(())
}

/// Applies command-line flags over the loaded configuration.
///
/// The key file is not read here; the handshake reads it only if the daemon
/// issues a challenge.
fn client_options(global: &GlobalArgs, mut config: Config) -> Result<ClientOptions> {
    if let Some(address) = &global.tcp {
        config.client.address = address.clone();
    }
    if let Some(key) = &global.key {
        config.client.key_path = Some(key.clone());
    }
    if let Some(identity) = &global.identity {
        config.client.identity = identity.clone();
    }
    if let Some(timeout) = global.timeout {
        config.client.read_timeout_secs = timeout;
    }
    config.validate()?;

    let credentials = match &config.client.key_path {
        Some(path) => CredentialSource::KeyFile {
            identity: config.client.identity.clone(),
            path: path.clone(),
        },
        None => CredentialSource::Anonymous,
    };

    Ok(ClientOptions {
        address: config.client.address.clone(),
        credentials,
        connect_timeout: config.client.connect_timeout(),
        read_timeout: config.client.read_timeout(),
    })
}

async fn remote(global: &GlobalArgs, config: Config, invocation: RemoteInvocation) -> Result<()> {
    let Some((command, args)) = invocation.words.split_first() else {
        return Err(ProtocolError::UnknownCommand(String::new()).into());
    };
    let request_options = RequestOptions {
        snapshot_id: invocation.snapshot.clone(),
    };

    // Reject bad invocations before touching the network.
    let request = registry::build_request_with(String::new(), command, args, &request_options)?;

    let options = client_options(global, config)?;
    let result = run_request(&options, request).await?;
    println!("{}", result.get());
    Ok(())
}

async fn watch(
    global: &GlobalArgs,
    config: Config,
    interval: u64,
    count: Option<u64>,
) -> Result<()> {
    anyhow::ensure!(interval > 0, "--interval must be greater than 0");

    let options = client_options(global, config)?;
    let mut client = RemoteClient::connect(&options).await?;
    eprintln!("Watching for window events... (Ctrl+C to stop)");

    tokio::select! {
        result = client.watch(Duration::from_secs(interval), count, |events| {
            println!("{}", events.get());
        }) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, stopping watch");
        }
    }

    if let Err(e) = client.shutdown().await {
        tracing::debug!(error = %e, "failed to close connection cleanly");
    }
    Ok(())
}
