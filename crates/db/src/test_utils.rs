//! Throwaway `PostgreSQL` databases for integration tests.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use tracing::info;

/// Where the test server lives. Read from `TEST_DB_*` variables.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: env_or("TEST_DB_HOST", "localhost"),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: env_or("TEST_DB_USER", "lounge_test"),
            password: env_or("TEST_DB_PASSWORD", "lounge_test"),
            database: env_or("TEST_DB_NAME", "lounge_test"),
        }
    }
}

impl TestDbConfig {
    #[must_use]
    pub fn database_url(&self) -> String {
        self.url_for(&self.database)
    }

    /// URL of the maintenance database used to create and drop test databases.
    #[must_use]
    pub fn postgres_url(&self) -> String {
        self.url_for("postgres")
    }

    fn url_for(&self, database: &str) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{database}",
            self.username, self.password, self.host, self.port
        )
    }

    /// Drop this database, kicking out any connection still attached to it.
    pub async fn drop_database(&self) -> Result<(), DbErr> {
        let admin = Database::connect(&self.postgres_url()).await?;

        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.database
        );
        admin
            .execute(Statement::from_string(DatabaseBackend::Postgres, terminate))
            .await?;
        admin
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                format!("DROP DATABASE IF EXISTS \"{}\"", self.database),
            ))
            .await?;
        admin.close().await?;

        info!(database = %self.database, "Dropped test database");
        Ok(())
    }
}

/// An open connection plus the config it came from.
pub struct TestDatabase {
    conn: DatabaseConnection,
    config: TestDbConfig,
}

impl TestDatabase {
    /// Connect to the database named by `config` as-is.
    pub async fn with_config(config: TestDbConfig) -> Result<Self, DbErr> {
        let conn = Database::connect(&config.database_url()).await?;
        Ok(Self { conn, config })
    }

    /// Create a fresh, uniquely named database and connect to it.
    pub async fn create_unique() -> Result<Self, DbErr> {
        let mut config = TestDbConfig::default();
        config.database = format!("lounge_test_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        let admin = Database::connect(&config.postgres_url()).await?;
        admin
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                format!("CREATE DATABASE \"{}\"", config.database),
            ))
            .await?;
        admin.close().await?;

        info!(database = %config.database, "Created test database");
        Self::with_config(config).await
    }

    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Hand the connection to repositories. Keep the config to drop the database afterwards.
    #[must_use]
    pub fn into_shared(self) -> (Arc<DatabaseConnection>, TestDbConfig) {
        (Arc::new(self.conn), self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_share_credentials() {
        let config = TestDbConfig {
            host: "db".to_string(),
            port: 5433,
            username: "user".to_string(),
            password: "pass".to_string(),
            database: "lounge_test_abc".to_string(),
        };
        assert_eq!(config.database_url(), "postgres://user:pass@db:5433/lounge_test_abc");
        assert_eq!(config.postgres_url(), "postgres://user:pass@db:5433/postgres");
    }
}
