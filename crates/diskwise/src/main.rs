use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use diskwise::api::{self, AppState};
use diskwise::db::Database;
use diskwise::settings::Settings;

#[derive(Parser)]
#[command(name = "diskwise")]
#[command(about = "Local disk intelligence service over HTTP", long_about = None)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Address to bind (overrides settings)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the snapshot database (overrides settings)
    #[arg(short, long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("diskwise=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(config) => {
            let config_path = shellexpand::tilde(config).to_string();
            Settings::load(&config_path).context("Failed to load settings")?
        }
        None => Settings::default(),
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = cli.db {
        settings.server.database_path = db;
    }

    let db_path = shellexpand::tilde(&settings.server.database_path).to_string();
    let db = Database::new(&db_path)
        .await
        .context("Failed to open snapshot database")?;

    let app = api::router(AppState::new(db));
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, db = %db_path, "diskwise listening");

    axum::serve(listener, app).await?;

    Ok(())
}
