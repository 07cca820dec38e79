//! sessionsync - terminal front-end for the session library.
//!
//! Each process is one "tab": it logs in against the backend, keeps its
//! access token in memory, and shares the durable tier with other tabs
//! through a JSON file in the data directory.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionsync_core::auth::{fingerprint, token};
use sessionsync_core::storage::keys;
use sessionsync_core::{
    ApiClient, Config, CrossTabSync, DeviceEnvironment, GoTrueProvider, GraphQlClient,
    LogRedirect, LoginRedirect, LoginRequest, LoginResponse, MemoryStorage, PreferencesUpdate,
    RequestAuthenticator, SessionEvent, SessionStore, SharedStorage, Storage, TabStorage, Theme,
    UserProfile,
};

// ============================================================================
// Constants
// ============================================================================

/// How long the tabs demo waits for the second tab to react
const DEMO_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// File name prefix for the daily rolling log
const LOG_FILE_PREFIX: &str = "sessionsync.log";

#[derive(Parser)]
#[command(name = "sessionsync", version, about = "Session lifecycle and cross-tab sync client")]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and open an interactive session
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when not given
        #[arg(long, env = "SESSIONSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Show the claims and expiry of a token
    Decode { token: String },
    /// Print the device fingerprint of this environment
    Fingerprint,
    /// Print the profile kept from the last login
    Profile,
    /// Two in-process tabs sharing one durable tier
    Tabs,
}

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer and must outlive `main`'s work.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Login { email, password } => run_login(&config, email, password).await,
        Command::Decode { token } => decode(&token),
        Command::Fingerprint => {
            print_fingerprint();
            Ok(())
        }
        Command::Profile => print_profile(&config),
        Command::Tabs => run_tabs_demo(&config).await,
    }
}

// ============================================================================
// Tab wiring
// ============================================================================

struct Tab {
    store: Arc<SessionStore>,
    durable: Arc<TabStorage>,
    redirect: Arc<dyn LoginRedirect>,
}

impl Tab {
    fn open(config: &Config, shared: &SharedStorage, redirect: Arc<dyn LoginRedirect>) -> Result<Self> {
        let durable = Arc::new(shared.tab());
        let identity = Arc::new(GoTrueProvider::new(config, durable.clone())?);
        let store = SessionStore::new(config, Arc::new(MemoryStorage::new()), durable.clone(), identity)?;

        Ok(Self {
            store: Arc::new(store),
            durable,
            redirect,
        })
    }

    fn sync(&self) -> Arc<CrossTabSync> {
        Arc::new(CrossTabSync::new(
            self.store.clone(),
            self.durable.clone(),
            self.redirect.clone(),
        ))
    }

    fn authenticator(&self) -> RequestAuthenticator {
        RequestAuthenticator::new(self.store.clone(), self.redirect.clone())
    }
}

fn open_shared(config: &Config) -> Result<SharedStorage> {
    let path = config.durable_storage_path()?;
    SharedStorage::open(&path)
        .with_context(|| format!("Failed to open durable storage at {}", path.display()))
}

// ============================================================================
// Login + interactive prompt
// ============================================================================

async fn run_login(config: &Config, email: String, password: Option<String>) -> Result<()> {
    let shared = open_shared(config)?;
    let redirect: Arc<dyn LoginRedirect> = Arc::new(LogRedirect::new(config.login_path.clone()));
    let tab = Tab::open(config, &shared, redirect)?;

    let password = match password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };

    println!("\nAuthenticating...");
    if let Err(e) = tab.store.login(&LoginRequest::new(email, password)).await {
        bail!("Login failed: {}", e);
    }
    info!("Interactive session started");
    println!("Login successful! Type `help` for commands.\n");

    let _sync = tab.sync().spawn();
    let api = ApiClient::new(config, tab.authenticator())?;
    let graphql = GraphQlClient::new(config, tab.authenticator())?;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        let (command, arg) = line
            .split_once(' ')
            .map(|(c, a)| (c, a.trim()))
            .unwrap_or((line, ""));

        match command {
            "" => continue,
            "help" => print_help(),
            "status" => print_status(&tab.store),
            "token" => match tab.store.get_valid_token().await {
                Ok(token) => println!("Token valid for {}s", token::time_remaining(&token)),
                Err(e) => println!("Error: {}", e),
            },
            "get" if !arg.is_empty() => match api.get::<Value>(arg).await {
                Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                Err(e) => println!("Error: {}", e),
            },
            "graphql" if !arg.is_empty() => match graphql.execute(arg, None).await {
                Ok(data) => println!("{}", serde_json::to_string_pretty(&data)?),
                Err(e) => println!("Error: {}", e),
            },
            "theme" => match Theme::parse(arg) {
                Some(theme) => {
                    tab.store.update_user_preferences(PreferencesUpdate::theme(theme))?;
                    println!("Theme set to {}", theme.as_str());
                }
                None => println!("Usage: theme <light|dark|auto>"),
            },
            "logout" => {
                tab.store.logout().await;
                println!("Logged out.");
                break;
            }
            "quit" | "exit" => break,
            _ => println!("Unknown command `{}`. Type `help` for commands.", line),
        }

        if !tab.store.is_authenticated() && tab.store.access_token().is_none() {
            println!("Session ended: {}", tab.store.last_error().unwrap_or_else(|| "signed out".to_string()));
            break;
        }
    }

    Ok(())
}

fn print_help() {
    println!("  status            session state and user");
    println!("  token             ensure a valid access token");
    println!("  get <path>        authenticated GET, prints JSON");
    println!("  graphql <query>   run a GraphQL operation");
    println!("  theme <name>      set light, dark or auto");
    println!("  logout            sign out everywhere and exit");
    println!("  quit              exit, keeping the session");
}

fn print_status(store: &SessionStore) {
    println!("State:    {:?}", store.state());
    if let Some(user) = store.user() {
        println!("User:     {} <{}>", user.name, user.email);
    }
    println!("Theme:    {}", store.user_theme().as_str());
    if let Some(session) = store.session() {
        println!("Session:  {} (since {})", session.session_id, session.login_at.to_rfc3339());
        println!("Expires:  in {}s", token::time_remaining(&session.access_token));
    }
    if let Some(error) = store.last_error() {
        println!("Error:    {}", error);
    }
}

// ============================================================================
// One-shot commands
// ============================================================================

fn decode(raw: &str) -> Result<()> {
    let claims = token::decode(raw).context("Not a decodable token")?;
    println!("{}", serde_json::to_string_pretty(claims.as_map())?);

    match claims.exp().and_then(|exp| Utc.timestamp_opt(exp, 0).single()) {
        Some(exp) => {
            println!("\nExpires:   {}", exp.to_rfc3339());
            println!("Expired:   {}", token::is_expired(raw));
            println!("Remaining: {}s", token::time_remaining(raw));
        }
        None => println!("\nNo usable `exp` claim: treated as expired"),
    }
    Ok(())
}

fn print_fingerprint() {
    let env = DeviceEnvironment::detect();
    println!("User agent: {}", env.user_agent);
    println!("Platform:   {}", env.platform);
    println!("Language:   {}", env.language);
    println!("Timezone:   {}", env.timezone);
    println!("Screen:     {}x{} @ {}", env.screen_width, env.screen_height, env.color_depth);
    println!("\nFingerprint: {}", fingerprint::generate());
}

fn print_profile(config: &Config) -> Result<()> {
    let shared = open_shared(config)?;
    let tab = shared.tab();

    let Some(raw) = tab.get_item(keys::USER) else {
        println!("No stored profile.");
        return Ok(());
    };
    let user: UserProfile = serde_json::from_str(&raw).context("Stored profile is unreadable")?;
    println!("{} <{}>", user.name, user.email);
    println!("Theme:    {}", user.preferences.theme.as_str());
    println!("Updated:  {}", user.updated_at.to_rfc3339());
    if let Some(fp) = tab.get_item(keys::DEVICE_FINGERPRINT) {
        println!("Device:   {}", fp);
    }
    if let Some(path) = shared.path() {
        println!("Stored:   {}", path.display());
    }
    Ok(())
}

// ============================================================================
// Tabs demo
// ============================================================================

/// Unsigned token good for an hour; the demo never talks to a server
fn demo_login() -> Result<LoginResponse> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let exp = Utc::now().timestamp() + 3600;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "demo", "exp": exp }).to_string());
    let body = json!({
        "access_token": format!("eyJhbGciOiJub25lIn0.{}.", payload),
        "session_id": "demo-session",
        "expires_in": 3600,
        "user": {
            "id": "demo",
            "email": "demo@example.com",
            "name": "Demo User",
            "preferences": {"theme": "light", "language": "en-US", "notifications_enabled": true},
            "created_at": Utc::now(),
            "updated_at": Utc::now()
        }
    });
    Ok(serde_json::from_value(body)?)
}

async fn wait_for(events: &mut broadcast::Receiver<SessionEvent>, wanted: SessionEvent) -> Result<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event == wanted => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("tab closed"),
            }
        }
    };
    tokio::time::timeout(DEMO_EVENT_TIMEOUT, wait)
        .await
        .with_context(|| format!("tab-2 never saw {:?}", wanted))?
}

async fn run_tabs_demo(config: &Config) -> Result<()> {
    let shared = SharedStorage::in_memory();
    let tab1 = Tab::open(config, &shared, Arc::new(|| println!("tab-1: redirected to login")))?;
    let tab2 = Tab::open(config, &shared, Arc::new(|| println!("tab-2: redirected to login")))?;

    tab1.store.set_session(demo_login()?)?;
    tab2.store.set_session(demo_login()?)?;
    println!("Both tabs signed in as {}", tab2.store.user_email().unwrap_or_default());

    let _sync1 = tab1.sync().spawn();
    let _sync2 = tab2.sync().spawn();
    let mut events = tab2.store.subscribe();

    println!("tab-1: theme -> dark");
    tab1.store.update_user_preferences(PreferencesUpdate::theme(Theme::Dark))?;
    wait_for(&mut events, SessionEvent::PreferencesUpdated).await?;
    println!("tab-2: theme is now {}", tab2.store.user_theme().as_str());

    println!("tab-1: logout");
    tab1.store.logout().await;
    wait_for(&mut events, SessionEvent::Cleared).await?;
    println!(
        "tab-2: authenticated = {}, stored profile kept = {}",
        tab2.store.is_authenticated(),
        tab2.durable.get_item(keys::USER).is_some()
    );
    Ok(())
}
