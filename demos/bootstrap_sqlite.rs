//! Bootstrap example
//!
//! This example demonstrates the full bring-up sequence:
//! - Reading configuration from `APP_DATABASE_*` variables
//! - Registering tables
//! - Connecting, synchronizing the schema and migrating
//! - Creating and deleting a row transactionally
//!
//! Run with: cargo run --example bootstrap_sqlite
//! Verbose SQL: APP_DATABASE_LOG_SQL=true RUST_LOG=debug cargo run --example bootstrap_sqlite

use rust_db_bootstrap::core::transaction;
use rust_db_bootstrap::prelude::*;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static ACCESS_TOKEN: LazyLock<TableDescriptor> = LazyLock::new(|| {
    TableDescriptor::new("AccessToken")
        .column(
            ColumnDescriptor::new("ID", ColumnType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(ColumnDescriptor::new("UID", ColumnType::BigInt).indexed())
        .column(ColumnDescriptor::new("TokenHash", ColumnType::Varchar(255)).unique())
});

struct AccessToken {
    uid: i64,
    hash: String,
}

impl Entity for AccessToken {
    fn descriptor(&self) -> &TableDescriptor {
        &ACCESS_TOKEN
    }

    fn values(&self) -> Vec<DatabaseValue> {
        // NULL id lets the database assign one
        vec![DatabaseValue::Null, self.uid.into(), self.hash.clone().into()]
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut config = Config::from_env()?;
    if std::env::var_os("APP_DATABASE_PATH").is_none() {
        config = config.with_path(std::env::temp_dir().join("rust_db_bootstrap_demo.db"));
    }

    let mut registry = Registry::new();
    registry.add_tables([ACCESS_TOKEN.clone()]);

    let engine = new_engine(&config, &registry).await?;
    println!("Connected: {:?}", engine);

    let ctx = CancellationToken::new();
    let token = AccessToken {
        uid: 7,
        hash: format!("demo-{}", std::process::id()),
    };
    transaction::create(&engine, &ctx, &token).await?;
    println!("Tokens after create: {}", engine.count(&ACCESS_TOKEN).await?);

    // No id set: the row is matched on its remaining values
    transaction::delete(&engine, &ctx, &token).await?;
    println!("Tokens after delete: {}", engine.count(&ACCESS_TOKEN).await?);
    println!("Pool: {:?}", engine.status());

    Ok(())
}
