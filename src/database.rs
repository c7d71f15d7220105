use sqlx::migrate::MigrateError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::repository::PgBookingStore;

/// Пул соединений Postgres и схема броней.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("Database pool ready ({} connections max)", config.pool_size.max(1));
        Ok(Database { pool })
    }

    /// Применяет миграции из `src/migrations`, встроенные в бинарник.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        let migrator = sqlx::migrate!("./src/migrations");
        migrator.run(&self.pool).await?;
        info!("Booking schema is up to date ({} migrations)", migrator.iter().count());
        Ok(())
    }

    /// Хранилище броней поверх общего пула.
    pub fn booking_store(&self) -> PgBookingStore {
        PgBookingStore::new(self.pool.clone())
    }
}
