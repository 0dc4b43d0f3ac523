//! clawlink command-line client.
//!
//! # Usage
//!
//! ```bash
//! # Follow a gateway until Ctrl-C
//! clawlink --url wss://gateway.local --token abc watch
//!
//! # One request, JSON result on stdout
//! clawlink --setup-code "$CODE" call health
//!
//! # Show (or create) this device's identity
//! clawlink identity
//! ```

use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use clawlink_client::{ClientError, ClientEvent, GatewayClient, SystemEnv};
use clawlink_core::{
    ConnectionConfig, ConnectionState, FileStorage, IdentityStore,
    endpoint::GatewayEndpoint,
    params::{ClientProfile, Role},
    setup_code::SetupCode,
};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Identity file name inside the config directory.
const IDENTITY_FILE: &str = "device-identity.json";

/// OpenClaw gateway client
#[derive(Parser, Debug)]
#[command(name = "clawlink")]
#[command(about = "Connect to an OpenClaw gateway")]
#[command(version)]
struct Args {
    #[command(flatten)]
    gateway: GatewayArgs,

    /// Connection role
    #[arg(long, value_enum, default_value_t = RoleArg::Operator)]
    role: RoleArg,

    /// Device identity file (defaults to the platform config directory)
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Reconnect after abnormal closes
    #[arg(long)]
    auto_reconnect: bool,

    /// Connection establishment timeout in milliseconds
    #[arg(long, default_value = "10000")]
    connect_timeout_ms: u64,

    /// Default request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    request_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct GatewayArgs {
    /// Gateway URL (http, https, ws or wss)
    #[arg(long, env = "CLAWLINK_GATEWAY_URL")]
    url: Option<String>,

    /// Gateway token
    #[arg(long, env = "CLAWLINK_GATEWAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Gateway password
    #[arg(long, env = "CLAWLINK_GATEWAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Setup code carrying URL and token; explicit flags win
    #[arg(long, env = "CLAWLINK_SETUP_CODE", hide_env_values = true)]
    setup_code: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum RoleArg {
    Operator,
    Node,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Operator => Role::Operator,
            RoleArg::Node => Role::Node,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and log state changes and events until Ctrl-C
    Watch,

    /// Issue one request and print the response payload
    Call {
        /// Method name
        method: String,

        /// Params as JSON
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Decode or encode setup codes
    SetupCode {
        #[command(subcommand)]
        action: SetupCodeAction,
    },

    /// Print the device id and public key, creating the identity if missing
    Identity,
}

#[derive(Subcommand, Debug)]
enum SetupCodeAction {
    /// Show the URL and token inside a setup code
    Decode {
        /// The code
        code: String,
    },

    /// Build a setup code
    Encode {
        /// Gateway URL
        #[arg(long)]
        url: String,

        /// Gateway token
        #[arg(long, default_value = "")]
        token: String,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("no gateway URL: pass --url or --setup-code")]
    MissingUrl,

    #[error("no config directory for the identity file: pass --identity")]
    NoConfigDir,

    #[error("--params is not valid JSON: {0}")]
    InvalidParams(#[from] serde_json::Error),

    #[error(transparent)]
    SetupCode(#[from] clawlink_core::SetupCodeError),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();
    clawlink_client::transport::install_crypto_provider();

    match &args.command {
        Command::Watch => watch(&args).await?,
        Command::Call { method, params } => call(&args, method, params).await?,
        Command::SetupCode { action } => setup_code(action)?,
        Command::Identity => identity(&args)?,
    }

    Ok(())
}

async fn watch(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let client = GatewayClient::spawn(connection_config(args)?, identity_storage(args)?);
    let mut events = client.subscribe();
    client.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, disconnecting");
                client.disconnect().await?;
                break;
            },
            event = events.recv() => match event {
                Ok(ClientEvent::StateChanged(state)) => {
                    tracing::info!(%state, "state changed");
                    if state == ConnectionState::Error {
                        report_failure(&client);
                    }
                },
                Ok(ClientEvent::Gateway(event)) => {
                    tracing::info!(event = event.name(), "gateway event");
                },
                Ok(ClientEvent::ChatUpdated(update)) => {
                    tracing::info!(
                        session = %update.session_key,
                        role = ?update.message.role,
                        content = %update.message.content,
                        "chat"
                    );
                },
                Ok(ClientEvent::SessionsRefreshed(sessions)) => {
                    tracing::info!(count = sessions.len(), "sessions refreshed");
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged");
                },
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

async fn call(args: &Args, method: &str, params: &str) -> Result<(), Box<dyn std::error::Error>> {
    let params: serde_json::Value = serde_json::from_str(params).map_err(CliError::from)?;
    let config = connection_config(args)?;
    let wait = config.connect_timeout;
    let client = GatewayClient::spawn(config, identity_storage(args)?);

    client.connect().await?;
    if let Err(e) = client.wait_connected(wait).await {
        print_remediation(&e);
        return Err(e.into());
    }

    let payload = client.call(method, params).await?;
    client.disconnect().await?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

fn setup_code(action: &SetupCodeAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout().lock();
    match action {
        SetupCodeAction::Decode { code } => {
            let decoded = SetupCode::decode(code).map_err(CliError::from)?;
            writeln!(stdout, "url:   {}", decoded.url)?;
            writeln!(stdout, "token: {}", decoded.token)?;
        },
        SetupCodeAction::Encode { url, token } => {
            let code = SetupCode { url: url.clone(), token: token.clone() };
            writeln!(stdout, "{}", code.encode())?;
        },
    }
    Ok(())
}

fn identity(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = identity_storage(args)?;
    let path = storage.path().to_path_buf();
    let mut store = IdentityStore::new(storage, SystemEnv::new());
    let identity = store.get_identity()?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "id:         {}", identity.id())?;
    writeln!(stdout, "public key: {}", identity.public_key_base64())?;
    writeln!(stdout, "file:       {}", path.display())?;
    Ok(())
}

fn connection_config(args: &Args) -> Result<ConnectionConfig, CliError> {
    Ok(ConnectionConfig {
        endpoint: resolve_endpoint(&args.gateway)?,
        profile: ClientProfile::for_role(args.role.into()),
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        auto_reconnect: args.auto_reconnect,
        ..ConnectionConfig::default()
    })
}

/// Setup code first, then explicit flags on top.
fn resolve_endpoint(gateway: &GatewayArgs) -> Result<GatewayEndpoint, CliError> {
    let mut endpoint = match &gateway.setup_code {
        Some(code) => SetupCode::decode(code)?.into_endpoint(),
        None => GatewayEndpoint::default(),
    };

    if let Some(url) = &gateway.url {
        endpoint.url.clone_from(url);
    }
    if let Some(token) = &gateway.token {
        endpoint.token.clone_from(token);
    }
    if gateway.password.is_some() {
        endpoint.password.clone_from(&gateway.password);
    }

    if endpoint.url.trim().is_empty() {
        return Err(CliError::MissingUrl);
    }
    Ok(endpoint)
}

fn identity_storage(args: &Args) -> Result<FileStorage, CliError> {
    Ok(FileStorage::new(identity_path(args)?))
}

/// `--identity`, else `<config dir>/clawlink/device-identity.json`.
fn identity_path(args: &Args) -> Result<PathBuf, CliError> {
    match &args.identity {
        Some(path) => Ok(path.clone()),
        None => Ok(directories::ProjectDirs::from("ai", "openclaw", "clawlink")
            .ok_or(CliError::NoConfigDir)?
            .config_dir()
            .join(IDENTITY_FILE)),
    }
}

fn report_failure(client: &GatewayClient) {
    if let Some(error) = client.status().last_error {
        tracing::error!(%error, "connection failed");
        print_remediation(&ClientError::Connection(error));
    }
}

fn print_remediation(error: &ClientError) {
    if let Some(remediation) = error.remediation() {
        // Nothing useful to do if stderr is gone.
        let _ = writeln!(io::stderr().lock(), "{remediation}");
    }
}
