use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use docflow::{
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    email::relay_from_config,
    render::renderer_from_config,
    routes::create_router,
    state::{AppState, Services},
    storage::S3BlobStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        email_relay = config.email_relay_url.is_some(),
        render_service = config.render_service_url.is_some(),
        "loaded docflow configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    if applied > 0 {
        tracing::info!(applied, "database migrations applied");
    }

    let services = Services {
        storage: Arc::new(S3BlobStore::from_config(&config).await?),
        mailer: relay_from_config(&config),
        renderer: renderer_from_config(&config),
    };
    let jwt = JwtService::from_config(&config)?;
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;

    let state = AppState::new(pool, config, services, jwt);
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "docflow listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("server received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
