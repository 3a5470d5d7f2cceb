use crate::config::AppConfig;
use crate::relay::RelayManager;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub manager: Arc<RelayManager>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Arc<AppConfig>, manager: Arc<RelayManager>) -> Self {
        Self {
            pool,
            config,
            manager,
        }
    }
}
