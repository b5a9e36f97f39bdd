//! Migration example
//!
//! This example demonstrates the migrator on its own:
//! - Applying migrations in registration order
//! - Inspecting status
//! - Rolling back
//!
//! Run with: cargo run --example migrations

use rust_db_bootstrap::prelude::*;
use rust_db_bootstrap::{MigrationAction, Migrator};
use tracing_subscriber::EnvFilter;

fn migrations() -> Vec<Migration> {
    vec![
        Migration::sql(
            "create-users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        )
        .with_description("users table")
        .with_rollback(MigrationAction::sql("DROP TABLE users")),
        Migration::sql(
            "seed-admin",
            "INSERT INTO users (id, name) VALUES (1, 'admin')",
        )
        .with_rollback(MigrationAction::sql("DELETE FROM users WHERE id = 1")),
        Migration::new(
            "audit-log",
            MigrationAction::func(|engine| {
                Box::pin(async move {
                    engine
                        .exec_batch(
                            "CREATE TABLE audit_log (id INTEGER PRIMARY KEY, entry TEXT);\
                             CREATE INDEX IDX_audit_log_entry ON audit_log (entry);",
                        )
                        .await
                })
            }),
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::temp_dir().join(format!("rust_db_bootstrap_migrations_{}", std::process::id()));
    let config = Config::new(Driver::Sqlite3)
        .with_path(dir.join("app.db"))
        .with_sync_and_migrate(false);
    let engine = new_engine(&config, &Registry::new()).await?;

    let migrations = migrations();
    let migrator = Migrator::new(&engine, &migrations);

    println!("Applied: {:?}", migrator.migrate_to("seed-admin").await?);
    for (id, status) in migrator.status().await? {
        println!("  {:<14} {:?}", id, status);
    }

    println!("Applied: {:?}", migrator.migrate().await?);
    println!("Rolled back: {:?}", migrator.rollback_last().await?);
    println!("Rolled back: {:?}", migrator.rollback_to("create-users").await?);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
