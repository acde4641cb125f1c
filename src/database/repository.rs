use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};

/// Repositories backed by a Postgres pool that need to group writes
/// into one database transaction.
#[async_trait]
pub trait TransactionalRepository: Send + Sync {
    fn pool(&self) -> &PgPool;

    async fn begin(&self) -> Result<SqlxTransaction<'static, Postgres>, DatabaseError> {
        self.pool().begin().await.map_err(DatabaseError::from_sqlx)
    }
}
