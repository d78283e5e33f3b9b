//! Database transaction utilities
//!
//! Multi-step metadata changes (dataset cascade deletes, experiment removal)
//! run inside a single transaction so a failure part way leaves no half-deleted
//! rows behind.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// A database transaction wrapper that handles commit/rollback explicitly.
///
/// # Example
///
/// ```ignore
/// use exparc_db::TransactionGuard;
///
/// async fn example(pool: &sqlx::PgPool) -> anyhow::Result<()> {
///     let mut tx = TransactionGuard::begin(pool).await?;
///     sqlx::query("DELETE FROM ...").execute(tx.connection()?).await?;
///     tx.commit().await?;
///     Ok(())
/// }
/// ```
pub struct TransactionGuard<'a> {
    transaction: Option<Transaction<'a, Postgres>>,
}

impl<'a> TransactionGuard<'a> {
    /// Begin a new database transaction
    pub async fn begin(pool: &'a PgPool) -> Result<Self> {
        let transaction = pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    /// Connection to run statements on inside the transaction.
    pub fn connection(&mut self) -> Result<&mut PgConnection> {
        self.transaction
            .as_deref_mut()
            .context("Transaction was already committed or rolled back")
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.commit()
                .await
                .context("Failed to commit database transaction")?;
        }
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback()
                .await
                .context("Failed to rollback database transaction")?;
        }
        Ok(())
    }
}

impl<'a> Drop for TransactionGuard<'a> {
    fn drop(&mut self) {
        // sqlx rolls back a dropped transaction when the connection returns to the pool.
        if self.transaction.is_some() {
            tracing::warn!(
                "Transaction was dropped without explicit commit or rollback - rolling back"
            );
        }
    }
}

/// Execute a closure within a database transaction
///
/// Commits if the closure succeeds, rolls back otherwise.
///
/// # Example
///
/// ```ignore
/// use exparc_db::with_transaction;
///
/// async fn example(pool: &sqlx::PgPool) -> anyhow::Result<()> {
///     with_transaction(pool, |tx| Box::pin(async move {
///         sqlx::query("DELETE FROM ...").execute(&mut **tx).await?;
///         sqlx::query("DELETE FROM ...").execute(&mut **tx).await?;
///         Ok::<_, sqlx::Error>(())
///     })).await
/// }
/// ```
pub async fn with_transaction<F, R, E>(pool: &PgPool, f: F) -> Result<R>
where
    F: for<'a> FnOnce(
        &'a mut Transaction<'_, Postgres>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<R, E>> + Send + 'a>,
    >,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    match f(&mut tx).await {
        Ok(result) => {
            tx.commit().await.context("Failed to commit transaction")?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Failed to roll back transaction");
            }
            Err(anyhow::Error::from(e))
        }
    }
}
