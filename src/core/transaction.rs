//! Transactional create/delete helpers
//!
//! Both helpers open a session, run one statement inside a transaction and
//! commit. The session is released on every exit path: a failed step rolls
//! back, and a cancelled context drops the in-flight work, which discards a
//! connection left inside a transaction.

use super::engine::{Engine, Executor};
use super::error::{DatabaseError, Result};
use super::schema::Entity;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Insert an entity in its own transaction
///
/// # Errors
///
/// Returns [`DatabaseError::Cancelled`] if `ctx` is cancelled first, or the
/// error of the failing step.
pub async fn create(engine: &Engine, ctx: &CancellationToken, entity: &dyn Entity) -> Result<()> {
    cancellable(ctx, async {
        let mut session = engine.new_session().await?;
        session.begin().await?;
        if let Err(e) = session.insert(entity).await {
            let _ = session.rollback().await;
            return Err(e);
        }
        session.commit().await?;
        session.close().await
    })
    .await
}

/// Delete an entity in its own transaction
///
/// Exactly one row must be affected; otherwise the transaction is rolled back
/// and [`DatabaseError::NotFoundOnDelete`] is returned.
pub async fn delete(engine: &Engine, ctx: &CancellationToken, entity: &dyn Entity) -> Result<()> {
    cancellable(ctx, async {
        let mut session = engine.new_session().await?;
        session.begin().await?;
        let affected = match session.delete(entity).await {
            Ok(n) => n,
            Err(e) => {
                let _ = session.rollback().await;
                return Err(e);
            }
        };
        if affected != 1 {
            let _ = session.rollback().await;
            return Err(DatabaseError::NotFoundOnDelete {
                table: engine.map_name(entity.descriptor().name()),
                affected,
            });
        }
        session.commit().await?;
        session.close().await
    })
    .await
}

async fn cancellable<T>(
    ctx: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => {
            debug!("Operation cancelled");
            Err(DatabaseError::Cancelled)
        }
        result = work => result,
    }
}
