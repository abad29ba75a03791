use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    email::EmailRelay,
    error::{AppError, AppResult},
    notifications::NotificationHub,
    render::DocumentRenderer,
    storage::BlobStore,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn BlobStore>,
    pub jwt: JwtService,
    pub mailer: Arc<dyn EmailRelay>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub hub: NotificationHub,
}

/// External collaborators behind traits, swapped for fakes in tests.
pub struct Services {
    pub storage: Arc<dyn BlobStore>,
    pub mailer: Arc<dyn EmailRelay>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, services: Services, jwt: JwtService) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage: services.storage,
            jwt,
            mailer: services.mailer,
            renderer: services.renderer,
            hub: NotificationHub::new(),
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
