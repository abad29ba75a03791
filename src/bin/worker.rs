use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use docflow::{
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    default_handlers,
    email::relay_from_config,
    render::renderer_from_config,
    state::{AppState, Services},
    storage::S3BlobStore,
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        email_relay = config.email_relay_url.is_some(),
        poll_interval_seconds = config.worker_poll_interval_seconds,
        "loaded docflow configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let services = Services {
        storage: Arc::new(S3BlobStore::from_config(&config).await?),
        mailer: relay_from_config(&config),
        renderer: renderer_from_config(&config),
    };
    let jwt = JwtService::from_config(&config)?;
    let poll_interval = Duration::from_secs(config.worker_poll_interval_seconds.max(1));

    let state = Arc::new(AppState::new(pool, config, services, jwt));
    let worker = Worker::new(state, default_handlers(), poll_interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
