//! Database schema

use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::{debug, info};

/// Initialize the database
pub async fn initialize_database(db_path: &str) -> Result<Pool<Sqlite>> {
    // Create database if it doesn't exist
    if !Sqlite::database_exists(db_path).await? {
        debug!("Creating database at: {}", db_path);
        Sqlite::create_database(db_path).await?;
    }

    // Connect to the database
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(db_path)
        .await?;

    // Run migrations
    info!("Running database migrations");
    create_tables(&pool).await?;

    Ok(pool)
}

/// Create database tables
async fn create_tables(pool: &Pool<Sqlite>) -> Result<()> {
    // Create resolved_links table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolved_links (
            original_url TEXT PRIMARY KEY,
            resolved_url TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            quality TEXT,
            format TEXT NOT NULL,
            headers TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create identity table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identity (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_expires ON resolved_links(expires_at)")
        .execute(pool)
        .await?;

    debug!("Database tables created successfully");
    Ok(())
}
