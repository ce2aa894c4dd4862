//! Gilgamesh, a high-performance forward web proxy.
//!
//! Subcommands:
//! - `serve` (default): run the proxy from the discovered or explicit
//!   configuration file.
//! - `auth set` / `auth delete`: manage the `username:bcrypthash` passwords
//!   file consumed by the proxy at startup.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::{TcpListener, UnixListener};

use gilgamesh::admin::{LoadCertificate, Manager, ManagerConfig};
use gilgamesh::auth::{Credentials, CredentialsError, Password};
use gilgamesh::config;
use gilgamesh::lifecycle::signals;
use gilgamesh::net::{tls, Server, ServerConfig};
use gilgamesh::net::tls::TlsError;
use gilgamesh::observability::logging;
use gilgamesh::worker::WorkerConfig;

#[derive(Parser)]
#[command(name = "gilgamesh", version, about = "Gilgamesh is a high-performance web proxy")]
struct Cli {
    /// Explicit configuration file path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy (the default when no subcommand is given).
    Serve,
    /// Authorization management.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Create or update a user in the passwords file.
    Set {
        /// Passwords file; `-` or absent writes to stdout.
        file: Option<String>,
        username: Option<String>,
        password: Option<String>,
    },
    /// Delete a user from the passwords file.
    Delete { file: String, username: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.config.as_deref()),
        Command::Auth { action } => match action {
            AuthAction::Set {
                file,
                username,
                password,
            } => auth_set(file.as_deref(), username, password),
            AuthAction::Delete { file, username } => auth_delete(&file, &username),
        },
    }
}

#[tokio::main]
async fn serve(config_path: Option<&Path>) -> Result<()> {
    logging::init();

    let cfg = config::load(config_path).context("config load")?;

    let mut credentials = Credentials::new();
    if let Some(path) = &cfg.proxy.passwords_file {
        credentials = Credentials::load(path)
            .with_context(|| format!("passwords file {}", path.display()))?;
        tracing::info!(users = credentials.len(), "credentials loaded");
    }

    // TLS listeners cannot come up without a certificate; refuse to start.
    let mut tls_config = None;
    if !cfg.proxy.server.tls_ports.is_empty() {
        let files = cfg
            .proxy
            .tls
            .as_ref()
            .context("tls_ports configured without [proxy.tls]")?;
        let identity = tls::load_identity(&files.certificate, &files.certificate_key)
            .context("certificate load")?;
        tls_config = Some(tls::server_config(identity).context("TLS config init")?);
    }

    let server = Arc::new(Server::new(ServerConfig {
        pool_size: cfg.proxy.worker.pool_count,
        worker: WorkerConfig {
            read_buffer_size: cfg.proxy.worker.read_buffer,
            write_buffer_size: cfg.proxy.worker.write_buffer,
            credentials: Arc::new(credentials),
            ..WorkerConfig::default()
        },
        tls: tls_config,
    }));

    let mut handles = Vec::new();
    for &port in &cfg.proxy.server.ports {
        handles.push(spawn_listener(Arc::clone(&server), port, false).await?);
    }
    for &port in &cfg.proxy.server.tls_ports {
        handles.push(spawn_listener(Arc::clone(&server), port, true).await?);
    }

    if let Some(socket_path) = &cfg.management.unix_socket {
        // A stale socket file from a previous run would fail the bind.
        match std::fs::remove_file(socket_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("management socket cleanup {}", socket_path.display())
                })
            }
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("management socket {}", socket_path.display()))?;

        let loader: LoadCertificate = match cfg.proxy.tls.clone() {
            Some(files) => Box::new(tls::certificate_loader(
                files.certificate,
                files.certificate_key,
            )),
            None => Box::new(|| Err(TlsError::NotConfigured)),
        };
        let manager = Manager::new(ManagerConfig {
            server: Arc::clone(&server),
            load_certificate: loader,
        });
        handles.push(tokio::spawn(async move {
            if let Err(err) = manager.serve(listener).await {
                tracing::error!(error = %err, "management listener terminated");
            }
        }));
    }

    signals::shutdown_signal().await;
    tracing::info!("shutdown signal received");
    server.close();
    for handle in &handles {
        handle.abort();
    }
    Ok(())
}

async fn spawn_listener(
    server: Arc<Server>,
    port: u16,
    is_tls: bool,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("listener init on port {port}"))?;
    Ok(tokio::spawn(async move {
        let result = if is_tls {
            server.serve_tls(listener).await
        } else {
            server.serve(listener).await
        };
        if let Err(err) = result {
            tracing::error!(error = %err, port, "proxy listener terminated");
        }
    }))
}

fn auth_set(file: Option<&str>, username: Option<String>, password: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt_username()?,
    };
    if !is_valid_username(&username) {
        bail!("username must be alphanumeric");
    }
    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };

    let mut credentials = read_credentials(file)?;
    credentials.set(username, Password::create(&password)?);
    write_credentials(file, &credentials)
}

fn auth_delete(file: &str, username: &str) -> Result<()> {
    let mut credentials = read_credentials(Some(file))?;
    credentials.remove(username);
    write_credentials(Some(file), &credentials)
}

/// `-` or no file at all reads as an empty store; so does a file that does
/// not exist yet.
fn read_credentials(file: Option<&str>) -> Result<Credentials> {
    let Some(path) = file.filter(|file| !file.is_empty() && *file != "-") else {
        return Ok(Credentials::new());
    };
    match Credentials::load(Path::new(path)) {
        Ok(credentials) => Ok(credentials),
        Err(CredentialsError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            Ok(Credentials::new())
        }
        Err(err) => Err(err).with_context(|| format!("passwords file {path}")),
    }
}

fn write_credentials(file: Option<&str>, credentials: &Credentials) -> Result<()> {
    match file.filter(|file| !file.is_empty() && *file != "-") {
        Some(path) => credentials
            .store(Path::new(path))
            .with_context(|| format!("passwords file {path}"))?,
        None => credentials.write(io::stdout().lock())?,
    }
    Ok(())
}

fn prompt_username() -> Result<String> {
    dialoguer::Input::new()
        .with_prompt("Username")
        .validate_with(|input: &String| -> Result<(), &str> {
            if is_valid_username(input) {
                Ok(())
            } else {
                Err("username must be alphanumeric")
            }
        })
        .interact_text()
        .context("username prompt")
}

fn prompt_password() -> Result<String> {
    dialoguer::Password::new()
        .with_prompt("Password")
        .interact()
        .context("password prompt")
}

fn is_valid_username(username: &str) -> bool {
    !username.is_empty() && username.bytes().all(|byte| byte.is_ascii_alphanumeric())
}
