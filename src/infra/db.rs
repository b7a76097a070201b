use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::AppConfig;

/// Attempts per transactional operation before a conflict is surfaced.
const CONFLICT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.db_idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.db_max_lifetime_seconds))
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Deadlock (`40P01`) or serialization failure (`40001`).
pub fn is_transaction_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|err| err.as_database_error())
        .and_then(|db_err| db_err.code())
        .map_or(false, |code| code == "40P01" || code == "40001")
}

/// Run a transactional operation, starting it over when Postgres aborts it
/// because of a lock conflict. Each attempt must open its own transaction.
pub async fn retry_on_conflict<T, F, Fut>(operation: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(err) if tries < CONFLICT_ATTEMPTS && is_transaction_conflict(&err) => {
                warn!(error = ?err, operation, tries, "transaction conflict, retrying");
                tokio::time::sleep(Duration::from_millis(25 * u64::from(tries))).await;
                tries += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;

    #[test]
    fn plain_errors_are_not_conflicts() {
        assert!(!is_transaction_conflict(&anyhow!("boom")));
        assert!(!is_transaction_conflict(&anyhow::Error::from(sqlx::Error::RowNotFound)));
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_on_conflict("test", || {
            calls.set(calls.get() + 1);
            async { Err(anyhow!("permanent")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn success_is_returned_as_is() {
        let calls = Cell::new(0);
        let value = retry_on_conflict("test", || {
            calls.set(calls.get() + 1);
            async { Ok(7) }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 1);
    }
}
