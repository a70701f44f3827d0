//! Database migrations

use libsql::Connection;

use super::StoreResult;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> StoreResult<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> StoreResult<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Version 1: document records
const V1: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        key TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, key)
    )",
    "INSERT INTO schema_version (version) VALUES (1)",
];

/// Version 2: secondary indexes
///
/// `value` has no declared type so integers keep numeric ordering.
const V2: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS record_indexes (
        collection TEXT NOT NULL,
        index_name TEXT NOT NULL,
        value,
        record_key TEXT NOT NULL,
        PRIMARY KEY (collection, index_name, record_key),
        FOREIGN KEY (collection, record_key)
            REFERENCES records(collection, key) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_record_indexes_value
        ON record_indexes(collection, index_name, value)",
    "INSERT INTO schema_version (version) VALUES (2)",
];

/// Run one migration's statements in a single transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> StoreResult<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for &stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migration_v2_creates_index_table() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = 'record_indexes'
                )",
                (),
            )
            .await
            .unwrap();

        let exists = rows
            .next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0);

        assert!(exists);
    }
}
