//! Transactional session helper. Begins a transaction, runs the closure,
//! commits on Ok and rolls back on Err.

use std::future::Future;
use std::pin::Pin;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tracing::warn;

use crate::error::DbInfraError;

/// Future returned by a session closure; borrows the transaction.
pub type SessionFuture<'c, T> =
    Pin<Box<dyn Future<Output = Result<T, DbInfraError>> + Send + 'c>>;

/// Run `f` inside a transaction owned by this call. On Err the transaction
/// is rolled back best-effort and the closure's error is preserved.
pub async fn with_session<T, F>(db: &DatabaseConnection, f: F) -> Result<T, DbInfraError>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> SessionFuture<'c, T>,
{
    let txn = db.begin().await?;
    let out = f(&txn).await;

    match out {
        Ok(val) => {
            txn.commit().await?;
            Ok(val)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!("session_rollback=failed error={rollback_err}");
            }
            Err(err)
        }
    }
}
