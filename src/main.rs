use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use keymint::config::Config;
use keymint::crypto;
use keymint::db::{create_pool, init_db, queries, AppState, DbPool};
use keymint::email::EmailService;
use keymint::error::msg;
use keymint::models::{CreateActivation, ProductTier};
use keymint::util::{self, SECONDS_PER_DAY};

#[derive(Parser, Debug)]
#[command(name = "keymint")]
#[command(about = "Self-hosted license activation server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (the default when no subcommand is given)
    Serve,
    /// Create the database schema and exit
    InitDb,
    /// Mint an activation code from the command line and print it
    Issue {
        #[arg(long)]
        email: String,
        /// personal | professional | business | enterprise
        #[arg(long, default_value = "personal")]
        product_type: String,
        /// Defaults to the tier's validity window
        #[arg(long)]
        days_valid: Option<i64>,
        /// Defaults to the tier's device quota
        #[arg(long)]
        max_devices: Option<i64>,
        #[arg(long)]
        note: Option<String>,
    },
    /// One-shot release of device bindings not seen for --stale-days
    Cleanup {
        #[arg(long)]
        stale_days: i64,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keymint=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(config: &Config) -> DbPool {
    let pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let conn = pool.get().expect("Failed to get database connection");
    init_db(&conn).expect("Failed to initialize database schema");
    pool
}

/// Periodically releases device slots on machines that stopped
/// heartbeating. Release, never delete: binding history stays behind.
fn spawn_stale_binding_sweep(state: AppState, stale_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60);

        loop {
            tokio::time::sleep(interval).await;

            let cutoff = util::now() - stale_days * SECONDS_PER_DAY;
            match state.db.get() {
                Ok(conn) => match queries::release_stale_bindings(&conn, cutoff) {
                    Ok(count) if count > 0 => {
                        tracing::info!("Released {} stale device bindings", count);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Stale binding sweep failed: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for sweep: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "Stale binding sweep started (hourly, releases after {} days unseen)",
        stale_days
    );
}

async fn serve(config: Config) {
    let pool = open_database(&config);

    if config.admin_api_key.is_none() {
        tracing::warn!("KEYMINT_ADMIN_API_KEY not set: /admin routes will answer 401");
    }
    if config.gumroad_webhook_secret.is_none() {
        tracing::warn!(
            "KEYMINT_GUMROAD_WEBHOOK_SECRET not set: webhook signature verification is skipped"
        );
    }
    let email_mode = if !config.email_enabled {
        "disabled"
    } else if config.email_webhook_url.is_some() {
        "webhook"
    } else if config.resend_api_key.is_some() {
        "resend"
    } else {
        "disabled (no provider configured)"
    };
    tracing::info!("Email delivery mode: {}", email_mode);

    let state = AppState {
        db: pool,
        code_prefix: config.code_prefix.clone(),
        // Only the digest stays in memory; the plaintext key is dropped
        // with the config.
        admin_key_hash: config.admin_api_key.as_deref().map(crypto::hash_secret),
        gumroad_webhook_secret: config.gumroad_webhook_secret.clone(),
        email_service: Arc::new(EmailService::new(&config)),
    };

    if let Some(stale_days) = config.stale_device_days {
        spawn_stale_binding_sweep(state.clone(), stale_days);
    }

    let app = keymint::app(state, &config);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!(
        database = %config.database_path,
        "Keymint listening on {}",
        addr
    );

    // connect_info is required by the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}

fn issue_from_cli(
    config: &Config,
    email: String,
    product_type: String,
    days_valid: Option<i64>,
    max_devices: Option<i64>,
    note: Option<String>,
) {
    let tier: ProductTier = product_type.parse().unwrap_or_else(|_| {
        eprintln!("{}: {}", msg::INVALID_PRODUCT_TYPE, product_type);
        std::process::exit(1);
    });

    let input = CreateActivation {
        email,
        product_type: tier,
        days_valid: days_valid.unwrap_or_else(|| tier.default_days_valid()),
        max_devices: max_devices.unwrap_or_else(|| tier.default_max_devices()),
        purchase_id: None,
        metadata: serde_json::json!({}),
        note,
    };

    let pool = open_database(config);
    let conn = pool.get().expect("Failed to get database connection");
    match queries::issue_activation(&conn, &config.code_prefix, &input) {
        // One line on stdout so scripts can capture the code directly
        Ok(activation) => println!("{}", activation.code),
        Err(e) => {
            eprintln!("Failed to issue activation: {}", e);
            std::process::exit(1);
        }
    }
}

fn cleanup_from_cli(config: &Config, stale_days: i64) {
    if stale_days < 1 {
        eprintln!("--stale-days must be at least 1");
        std::process::exit(1);
    }

    let pool = open_database(config);
    let conn = pool.get().expect("Failed to get database connection");
    let cutoff = util::now() - stale_days * SECONDS_PER_DAY;
    match queries::release_stale_bindings(&conn, cutoff) {
        Ok(count) => println!("Released {} stale device bindings", count),
        Err(e) => {
            eprintln!("Cleanup failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::InitDb => {
            open_database(&config);
            println!("Schema ready at {}", config.database_path);
        }
        Commands::Issue {
            email,
            product_type,
            days_valid,
            max_devices,
            note,
        } => issue_from_cli(&config, email, product_type, days_valid, max_devices, note),
        Commands::Cleanup { stale_days } => cleanup_from_cli(&config, stale_days),
    }
}
