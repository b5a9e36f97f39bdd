//! Statement hooks
//!
//! Every statement an [`Engine`](super::engine::Engine) or
//! [`Session`](super::session::Session) runs passes through the attached
//! hooks: `before` is called with the SQL and its parameters, `after` with the
//! elapsed time and the error, if any.

use super::database_types::Driver;
use super::error::DatabaseError;
use super::value::DatabaseValue;
use std::time::Duration;
use tracing::{debug, warn};

/// Statement being executed
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub driver: Driver,
    pub sql: &'a str,
    pub params: &'a [DatabaseValue],
}

/// Observer attached to an engine
pub trait QueryHook: Send + Sync {
    fn before(&self, _ctx: &QueryContext<'_>) {}

    fn after(&self, ctx: &QueryContext<'_>, elapsed: Duration, error: Option<&DatabaseError>);
}

/// Hook emitting one `tracing` event per statement
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl QueryHook for TracingHook {
    fn after(&self, ctx: &QueryContext<'_>, elapsed: Duration, error: Option<&DatabaseError>) {
        let elapsed_us = elapsed.as_micros() as u64;
        match error {
            Some(err) => warn!(
                target: "rust_db_bootstrap::trace",
                driver = %ctx.driver,
                sql = ctx.sql,
                elapsed_us,
                error = %err,
                "Statement failed"
            ),
            None => debug!(
                target: "rust_db_bootstrap::trace",
                driver = %ctx.driver,
                sql = ctx.sql,
                params = ctx.params.len(),
                elapsed_us,
                "Statement finished"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Hook recording every statement it sees
    #[derive(Default)]
    pub(crate) struct RecordingHook {
        pub(crate) statements: Mutex<Vec<String>>,
        pub(crate) failures: Mutex<usize>,
    }

    impl QueryHook for RecordingHook {
        fn before(&self, ctx: &QueryContext<'_>) {
            self.statements.lock().push(ctx.sql.to_string());
        }

        fn after(&self, _ctx: &QueryContext<'_>, _elapsed: Duration, error: Option<&DatabaseError>) {
            if error.is_some() {
                *self.failures.lock() += 1;
            }
        }
    }
}
