use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medidash_server::config::Settings;
use medidash_server::db::Database;
use medidash_server::handlers::{self, AppState};
use medidash_server::storage::SignedUrlIssuer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    let db = Database::new(pool);
    db.run_migrations().await?;

    let signer = SignedUrlIssuer::new(
        settings.storage_base_url.clone(),
        settings.storage_signing_key.as_bytes().to_vec(),
    );

    let state = AppState {
        db: Arc::new(db),
        signer: Arc::new(signer),
    };

    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("medical dashboard API listening on {}", settings.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
