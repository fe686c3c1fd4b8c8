//! readshelf server entry point.

use clap::Parser;
use readshelf::{
    auth::AuthService,
    config::{Cli, Command, Config, UserCommand},
    db::Database,
    server,
    storage::Storage,
};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions, links and rate-limit windows are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

/// Initialize config, database and storage directories.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    Storage::from_config(&config).ensure_dirs().await?;
    println!(
        "Created storage: {} (covers: {})",
        config.storage.books_dir.display(),
        config.cache.covers_dir.display()
    );

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: readshelf user add <username> --password <password> --role admin");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(
        db,
        config.auth.session_days,
        config.auth.registration_enabled(),
    );

    match action {
        UserCommand::Add {
            username,
            password,
            role,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &password, &role)?;
            println!(
                "Created user: {} (role: {}, id: {})",
                user.username, user.role, user.id
            );
        }

        UserCommand::Del { username } => match auth.delete_user(&username)? {
            Some(files) => {
                let storage = Storage::from_config(config);
                for (book_id, key) in &files {
                    if let Err(e) = storage.delete_book_files(key, book_id).await {
                        eprintln!("Could not remove files of book {}: {}", book_id, e);
                    }
                }
                println!("Deleted user: {} ({} books)", username, files.len());
            }
            None => println!("User not found: {}", username),
        },

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<20} {:<10} {:<36} LAST LOGIN", "USERNAME", "ROLE", "ID");
                println!("{}", "-".repeat(80));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| {
                            chrono::DateTime::from_timestamp(ts, 0)
                                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_else(|| "unknown".to_string())
                        })
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<20} {:<10} {:<36} {}",
                        user.username, user.role, user.id, last_login
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readshelf=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::open(&config.database.path)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        books = %config.storage.books_dir.display(),
        "Starting readshelf server"
    );

    let state = server::AppState::new(config.clone(), db.clone());
    state.storage.ensure_dirs().await?;

    if !config.auth.registration_enabled() {
        tracing::info!("Registration disabled; add users with: readshelf user add");
    }

    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            match cleanup_state.db.cleanup_expired_sessions() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Removed expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
            cleanup_state.rate_limiter.prune();
        }
    });

    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
