//! cco-sync - Operations checklist sync engine
//!
//! Runs the operator dashboard, the SQLite-backed list store it syncs
//! against, and the admin commands that manage both.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cco_sync::api::{dashboard, store};
use cco_sync::auth::{LocalAuthenticator, generate_token};
use cco_sync::config::{self, Config};
use cco_sync::models::TaskRecord;
use cco_sync::store::{HttpStore, SqliteStore};

#[derive(Parser)]
#[command(name = "cco-sync")]
#[command(about = "Operations checklist sync engine for logistics control centers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the operator dashboard
    Serve {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// List store URL (overrides config)
        #[arg(long)]
        remote: Option<String>,
    },

    /// Start the list store server
    Store {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Load tasks and location assignments into the list store
    Seed {
        /// JSON file with `tasks` and `locations`
        #[arg(short, long)]
        file: PathBuf,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate a new list store API token
    Token {
        /// Name/label for the token
        #[arg(short, long)]
        name: Option<String>,

        /// List all configured tokens
        #[arg(long)]
        list: bool,

        /// Revoke a token by name
        #[arg(long)]
        revoke: Option<String>,

        /// Config file path (for list/revoke operations)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Add or replace an operator login
    Operator {
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        password: String,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    tasks: Vec<TaskRecord>,
    #[serde(default)]
    locations: Vec<SeedLocation>,
}

#[derive(Debug, Deserialize)]
struct SeedLocation {
    location: String,
    email: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cco_sync=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            bind,
            remote,
        } => {
            let mut cfg = load_config(config)?;
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }
            if let Some(url) = remote {
                cfg.remote.url = url;
            }

            run_dashboard(cfg).await
        }

        Commands::Store { config, port, bind } => {
            let mut cfg = load_config(config)?;
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_store(cfg).await
        }

        Commands::Seed { file, config } => {
            let cfg = load_config(config)?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let seed: SeedFile =
                serde_json::from_str(&content).context("Failed to parse seed file")?;

            let db = SqliteStore::open(&cfg.database.path).context("Failed to open database")?;
            for (order, task) in seed.tasks.iter().enumerate() {
                db.seed_task(task, order as i64)?;
            }
            for (order, entry) in seed.locations.iter().enumerate() {
                db.seed_location(&entry.location, &entry.email, order as i64)?;
            }

            println!(
                "Seeded {} tasks and {} locations into {}",
                seed.tasks.len(),
                seed.locations.len(),
                cfg.database.path.display()
            );
            Ok(())
        }

        Commands::Token {
            name,
            list,
            revoke,
            config,
        } => manage_tokens(name, list, revoke, config),

        Commands::Operator {
            email,
            name,
            password,
            config,
        } => {
            let config_path = match config {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let mut cfg = if config_path.exists() {
                Config::load_from(&config_path)?
            } else {
                Config::default()
            };

            let password_hash = config::hash_secret(&password)?;
            cfg.operators
                .retain(|op| !op.email.trim().eq_ignore_ascii_case(email.trim()));
            cfg.operators.push(config::OperatorConfig {
                email: email.trim().to_string(),
                name: name.clone(),
                password_hash,
            });
            cfg.save_to(&config_path)?;

            println!("Saved operator '{}' <{}> to {}", name, email, config_path.display());
            Ok(())
        }

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            let cfg = Config::default();
            cfg.save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Add an operator: cco-sync operator --email <email> --name <name> --password <password>");
            println!("  2. Load tasks:      cco-sync seed --file tasks.json");
            println!("  3. Start the store: cco-sync store --config {}", path.display());
            println!(
                "  4. Start the dashboard: cco-sync serve --config {} --port 8080",
                path.display()
            );

            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    }
}

fn manage_tokens(
    name: Option<String>,
    list: bool,
    revoke: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config_path = match config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if list {
        if !config_path.exists() {
            println!("No config file found at {}", config_path.display());
            println!("Run 'cco-sync init' to create one.");
            return Ok(());
        }

        let cfg = Config::load_from(&config_path)?;
        if cfg.tokens.is_empty() {
            println!("No tokens configured.");
            println!("Generate one with: cco-sync token --name <label>");
        } else {
            println!("Configured tokens:");
            println!();
            for token in &cfg.tokens {
                let preview: String = token.token_hash.chars().take(20).collect();
                println!("  {} - {}...", token.name, preview);
            }
        }
        return Ok(());
    }

    if let Some(token_name) = revoke {
        if !config_path.exists() {
            println!("No config file found at {}", config_path.display());
            return Ok(());
        }

        let mut cfg = Config::load_from(&config_path)?;
        let original_len = cfg.tokens.len();
        cfg.tokens.retain(|t| t.name != token_name);

        if cfg.tokens.len() == original_len {
            println!("Token '{}' not found.", token_name);
        } else {
            cfg.save_to(&config_path)?;
            println!("Revoked token '{}'.", token_name);
        }
        return Ok(());
    }

    let token = generate_token("cco");
    let label = name.unwrap_or_else(|| "default".to_string());
    let token_hash = config::hash_secret(&token)?;

    if config_path.exists() {
        let mut cfg = Config::load_from(&config_path)?;
        if cfg.tokens.iter().any(|t| t.name == label) {
            println!(
                "Token '{}' already exists. Use --revoke first to replace it.",
                label
            );
            return Ok(());
        }

        cfg.tokens.push(config::TokenConfig {
            name: label.clone(),
            token_hash,
        });
        cfg.save_to(&config_path)?;

        println!("Generated list store token for '{}'\n", label);
        println!("Token: {}\n", token);
    } else {
        println!("Generated list store token for '{}':\n", label);
        println!("Token: {}\n", token);
        println!("Add this to the store's config.toml:\n");
        println!("  [[tokens]]");
        println!("  name = \"{}\"", label);
        println!("  token_hash = \"{}\"\n", token_hash);
    }
    println!("Save this token now - it cannot be retrieved later!");

    Ok(())
}

async fn run_store(config: Config) -> Result<()> {
    let db = SqliteStore::open(&config.database.path).context("Failed to open database")?;
    let addr = format!("{}:{}", config.server.bind, config.server.port);

    let state = store::StoreState::new(db, LocalAuthenticator::new(config))?;
    let app = store::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("cco-sync list store listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_dashboard(config: Config) -> Result<()> {
    let remote = Arc::new(HttpStore::new(
        &config.remote.url,
        Duration::from_secs(config.remote.timeout_secs),
    )?);

    let state = dashboard::DashboardState::new(
        remote.clone(),
        remote,
        config.sync.clone(),
    );
    let app = dashboard::create_router(state.clone());

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        remote = %config.remote.url,
        strategy = ?config.sync.strategy,
        "cco-sync dashboard listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
