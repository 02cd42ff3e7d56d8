//! Building a [`Session`] from command-line arguments.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use sessionkit::{FileStorage, MemoryStorage, Session, SessionCapabilities, SystemClock};
use sessionkit_core::{ClientConfig, Credentials, HostEnvironment, Location, Navigator, ServiceUrl};
use sessionkit_net::ReqwestTransport;

use crate::cli::ConnectArgs;
use crate::output;

/// A terminal has no pages: "navigating" to the login page means telling
/// the user to log in again.
struct TerminalNavigator {
    origin: String,
    path: Mutex<String>,
}

impl TerminalNavigator {
    fn new(origin: String) -> Self {
        Self {
            origin,
            path: Mutex::new("/".to_string()),
        }
    }
}

impl Navigator for TerminalNavigator {
    fn location(&self) -> Location {
        let path = self
            .path
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|_| "/".to_string());
        Location::new(self.origin.clone(), path)
    }

    fn navigate(&self, path: &str) {
        if let Ok(mut current) = self.path.lock() {
            *current = path.to_string();
        }
        output::error("Session expired. Log in again with --username and --password.");
    }
}

/// Init data supplied on the command line.
struct StaticHost(String);

impl HostEnvironment for StaticHost {
    fn init_data(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Default location of the session file written by older clients.
fn default_legacy_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "sessionkit").context("Could not determine data directory")?;
    Ok(dirs.data_dir().join("session.json"))
}

fn load_config(args: &ConnectArgs) -> Result<ClientConfig> {
    let config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mut config: ClientConfig =
                serde_json::from_str(&json).context("Invalid client configuration")?;
            if let Some(url) = &args.url {
                config.base_url = ServiceUrl::new(url).context("Invalid service URL")?;
            }
            config
        }
        None => {
            let url = args
                .url
                .as_deref()
                .context("No service URL. Pass --url or set SESSIONKIT_URL.")?;
            ClientConfig::new(ServiceUrl::new(url).context("Invalid service URL")?)
        }
    };
    Ok(config)
}

/// Open a session: log in with the given credentials, or import a legacy
/// session file. Without either the session stays anonymous.
pub async fn open(args: &ConnectArgs) -> Result<Session> {
    let config = load_config(args)?;

    let transport =
        Arc::new(ReqwestTransport::from_config(&config).context("Failed to build HTTP client")?);
    let navigator = Arc::new(TerminalNavigator::new(config.base_url.origin()));
    let mut capabilities = SessionCapabilities::new(
        Arc::new(SystemClock),
        Arc::new(MemoryStorage::new()),
        transport,
        navigator,
    );
    if let Some(data) = &args.init_data {
        capabilities = capabilities.with_host(Arc::new(StaticHost(data.clone())));
    }

    let session = Session::new(config, capabilities);

    match (&args.username, &args.password) {
        (Some(username), Some(password)) => {
            output::note("Logging in...");
            session
                .login(Credentials::new(username, password))
                .await
                .context("Failed to login")?;
            output::success(&format!("Logged in as {}", username));
        }
        (None, None) => {
            let path = match &args.legacy_session {
                Some(path) => path.clone(),
                None => default_legacy_path()?,
            };
            let durable = FileStorage::new(&path);
            if session
                .restore_legacy(&durable)
                .with_context(|| format!("Failed to import {}", path.display()))?
            {
                output::success(&format!("Imported session from {}", path.display()));
            }
        }
        _ => bail!("--username and --password must be given together"),
    }

    Ok(session)
}
