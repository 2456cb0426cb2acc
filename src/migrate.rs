use sqlx::SqlitePool;

use crate::error::StoreError;

/// Schema revision recorded in `store_meta.format_version`.
pub const FORMAT_VERSION: i64 = 1;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            byte_size INTEGER NOT NULL,
            format TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `seq` is the insertion order used to break similarity ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES ('format_version', ?)")
        .bind(FORMAT_VERSION.to_string())
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_file_name ON documents(file_name)")
        .execute(pool)
        .await?;

    Ok(())
}
