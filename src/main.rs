//! pingcli -- PingOne command line credential management.
//!
//! Entry point. Parses arguments, loads configuration, initializes logging
//! and dispatches to the requested command:
//!   - `login` / `logout` / `status` manage cached credentials
//!   - `token` prints a valid access token, logging in when needed
//!   - `api` performs an authenticated GET against the PingOne API
//!   - `config get` / `config set` read and write settings

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;

use pingcli_auth::client::ApiClient;
use pingcli_auth::config::{Config, ConfigSource, option_for};
use pingcli_auth::oauth::{AuthSession, GrantMethod};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Auth(AuthCommand),
    ConfigGet { key: String },
    ConfigSet { key: String, value: String },
}

/// Commands that need an authentication session.
#[derive(Debug, PartialEq, Eq)]
enum AuthCommand {
    Login { method: Option<GrantMethod> },
    Logout { method: Option<GrantMethod> },
    Status,
    Token,
    Api { path: String },
}

#[derive(Debug)]
struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut method = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .context("--config requires a path argument")?;
                config_path = Some(PathBuf::from(path));
            }
            "--method" | "-m" => {
                let value = args
                    .next()
                    .context("--method requires a value")?;
                method = Some(value.parse::<GrantMethod>()?);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("pingcli {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                bail!("Unknown argument: {other}\nRun with --help for usage information.");
            }
            _ => positional.push(arg),
        }
    }

    let positional: Vec<&str> = positional.iter().map(String::as_str).collect();
    let command = match positional.as_slice() {
        ["login"] => Command::Auth(AuthCommand::Login { method }),
        ["logout"] => Command::Auth(AuthCommand::Logout { method }),
        ["status"] => Command::Auth(AuthCommand::Status),
        ["token"] => Command::Auth(AuthCommand::Token),
        ["api", path] => Command::Auth(AuthCommand::Api {
            path: path.to_string(),
        }),
        ["config", "get", key] => Command::ConfigGet {
            key: key.to_string(),
        },
        ["config", "set", assignment] => {
            let (key, value) = assignment
                .split_once('=')
                .context("config set expects <key>=<value>")?;
            Command::ConfigSet {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            }
        }
        [] => bail!("No command given.\nRun with --help for usage information."),
        other => bail!(
            "Unknown command: {}\nRun with --help for usage information.",
            other.join(" ")
        ),
    };

    if method.is_some()
        && !matches!(
            command,
            Command::Auth(AuthCommand::Login { .. } | AuthCommand::Logout { .. })
        )
    {
        bail!("--method is only valid with login and logout");
    }

    Ok(CliArgs {
        config_path,
        command,
    })
}

fn print_usage() {
    println!(
        "\
pingcli {version} -- PingOne credential management

USAGE:
    pingcli [OPTIONS] <COMMAND>

COMMANDS:
    login [--method <METHOD>]     Authenticate and cache a token
    logout [--method <METHOD>]    Remove cached tokens (all configured methods by default)
    status                        Show the cached token for the configured method
    token                         Print a valid access token, logging in if needed
    api <PATH>                    GET an API path (e.g. /environments) and print the JSON
    config get <KEY>              Print a configuration value
    config set <KEY>=<VALUE>      Store a configuration value

METHODS:
    device_code, auth_code, client_credentials (alias: worker)

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: ~/.pingcli/config.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    PINGCLI_CONFIG         Alternative to --config flag
    PINGCLI_*              Per-setting overrides (see `config get`)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args()?;

    let config_path = match cli.config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;
    init_tracing(&config);
    // The warning from Config::load fires before the subscriber exists.
    if !config_path.exists() {
        tracing::warn!("Config file not found at {}, using defaults", config_path.display());
    }

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting pingcli"
    );

    match cli.command {
        Command::ConfigGet { key } => config_get(&config, &key),
        Command::ConfigSet { key, value } => config_set(config, &config_path, &key, value),
        Command::Auth(command) => run_auth_command(Arc::new(config), command).await,
    }
}

async fn run_auth_command(config: Arc<Config>, command: AuthCommand) -> anyhow::Result<()> {
    let session = AuthSession::from_config(config)?;

    match command {
        AuthCommand::Login { method } => {
            let method = match method {
                Some(method) => method,
                None => session.configured_method()?,
            };
            let outcome = session.login(method).await?;
            if !outcome.new_authentication {
                eprintln!("Already logged in using {method}.");
            }
        }
        AuthCommand::Logout { method } => {
            let cleared = session.logout(method)?;
            if cleared.is_empty() {
                eprintln!("No configured authentication methods to log out of.");
            }
            for method in cleared {
                eprintln!("Logged out of {method}.");
            }
        }
        AuthCommand::Status => println!("{}", session.status()?),
        AuthCommand::Token => {
            let source = session.get_valid_token_source().await?;
            println!("{}", source.token().access_token);
        }
        AuthCommand::Api { path } => {
            let client = ApiClient::from_session(&session).await?;
            let body = client.get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}

fn config_get(config: &Config, key: &str) -> anyhow::Result<()> {
    let option = option_for(key).with_context(|| format!("Unknown configuration key: {key}"))?;
    let value = config.lookup(key).unwrap_or_default();
    let shown = if option.sensitive && !value.is_empty() {
        "********".to_string()
    } else {
        value
    };

    match config.env_overrides().env_var_for(key) {
        Some(env_var) => println!("{key}={shown} (from {env_var})"),
        None => println!("{key}={shown}"),
    }
    Ok(())
}

fn config_set(
    mut config: Config,
    path: &std::path::Path,
    key: &str,
    value: String,
) -> anyhow::Result<()> {
    let option = option_for(key).with_context(|| format!("Unknown configuration key: {key}"))?;
    if let Some(env_var) = config.env_overrides().env_var_for(key) {
        eprintln!("Note: {env_var} is set and overrides this value.");
    }

    config.set(option.key, value);
    config
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Set {key} in {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    let logging = config.logging();
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &logging.level;
        EnvFilter::new(format!("pingcli={level},pingcli_auth={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
