//! # um-db-sqlite Implementation
//!
//! This crate implements the data mapping between the SQLite relational model
//! and the `um-core` domain models. One [`SqliteRepo`] backs every storage
//! port: users, threads, the vote ledger, the reply tree, reposts and follows.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{error, info};
use um_core::error::AppError;
use um_core::models::{AuthorSummary, Reply, ReplyId, ReplyNode, ThreadId, UserId};

mod follows;
mod replies;
mod reposts;
mod threads;
mod users;
mod votes;

#[derive(Clone)]
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Opens (creating if needed) the database at `url` and applies migrations.
    ///
    /// An in-memory URL gets a single, never-recycled connection so every
    /// query sees the same database.
    pub async fn new(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let in_memory = url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(url, in_memory, "SQLite database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Logs a storage failure and hides its details from callers.
pub(crate) fn db_error(err: sqlx::Error) -> AppError {
    error!(error = %err, "database operation failed");
    AppError::Internal(err.to_string())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}

/// Columns read by [`node_from_row`], for queries over `replies r JOIN users u`.
pub(crate) const NODE_COLUMNS: &str = "r.id AS id, r.thread_id AS thread_id, r.parent_id AS parent_id, \
     r.author_id AS author_id, r.content AS content, r.created_at AS created_at, \
     u.name AS author_name, u.avatar_url AS author_avatar_url";

pub(crate) fn node_from_row(row: &SqliteRow) -> sqlx::Result<ReplyNode> {
    let author_id = UserId(row.try_get("author_id")?);
    Ok(ReplyNode {
        reply: Reply {
            id: ReplyId(row.try_get("id")?),
            thread_id: ThreadId(row.try_get("thread_id")?),
            parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(ReplyId),
            author_id,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        },
        author: AuthorSummary {
            id: author_id,
            name: row.try_get("author_name")?,
            avatar_url: row.try_get("author_avatar_url")?,
        },
    })
}
