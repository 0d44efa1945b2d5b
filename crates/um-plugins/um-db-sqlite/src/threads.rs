use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::info;
use um_core::error::{AppError, Result};
use um_core::models::{
    AuthorSummary, NewThread, Page, PageRequest, Thread, ThreadId, ThreadView, UserId, VoteTarget,
};
use um_core::traits::{ThreadRepo, VoteLedger};

use crate::{db_error, is_foreign_key_violation, SqliteRepo};

const THREAD_COLUMNS: &str = "t.id AS id, t.title AS title, t.content AS content, \
     t.author_id AS author_id, t.created_at AS created_at, \
     u.name AS author_name, u.avatar_url AS author_avatar_url";

fn thread_from_row(row: &SqliteRow) -> sqlx::Result<(Thread, AuthorSummary)> {
    let author_id = UserId(row.try_get("author_id")?);
    Ok((
        Thread {
            id: ThreadId(row.try_get("id")?),
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            author_id,
            created_at: row.try_get("created_at")?,
        },
        AuthorSummary {
            id: author_id,
            name: row.try_get("author_name")?,
            avatar_url: row.try_get("author_avatar_url")?,
        },
    ))
}

impl SqliteRepo {
    /// Batched `get_thread`; ids that do not exist are absent from the map.
    pub(crate) async fn thread_views(&self, ids: &[ThreadId]) -> Result<HashMap<ThreadId, ThreadView>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {THREAD_COLUMNS} FROM threads t JOIN users u ON u.id = t.author_id WHERE t.id IN ("
        ));
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(id.0);
        }
        list.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await.map_err(db_error)?;
        let threads = rows
            .iter()
            .map(thread_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(db_error)?;

        let targets: Vec<VoteTarget> = threads.iter().map(|(t, _)| VoteTarget::Thread(t.id)).collect();
        let mut aggregates = self.aggregates(&targets).await?;

        Ok(threads
            .into_iter()
            .map(|(thread, author)| {
                let votes = aggregates.remove(&VoteTarget::Thread(thread.id)).unwrap_or_default();
                (thread.id, ThreadView { thread, author, votes })
            })
            .collect())
    }
}

#[async_trait]
impl ThreadRepo for SqliteRepo {
    async fn create_thread(&self, thread: NewThread) -> Result<Thread> {
        thread.validate()?;
        let created_at = Utc::now();

        let result = sqlx::query("INSERT INTO threads (title, content, author_id, created_at) VALUES (?, ?, ?, ?)")
            .bind(&thread.title)
            .bind(&thread.content)
            .bind(thread.author_id.0)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    AppError::user_not_found(thread.author_id)
                } else {
                    db_error(err)
                }
            })?;

        let id = ThreadId(result.last_insert_rowid());
        info!(%id, author = %thread.author_id, "thread created");

        Ok(Thread {
            id,
            title: thread.title,
            content: thread.content,
            author_id: thread.author_id,
            created_at,
        })
    }

    async fn get_thread(&self, id: ThreadId) -> Result<ThreadView> {
        let row = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads t JOIN users u ON u.id = t.author_id WHERE t.id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::thread_not_found(id))?;

        let (thread, author) = thread_from_row(&row).map_err(db_error)?;
        let votes = self.aggregate(VoteTarget::Thread(id)).await?;

        Ok(ThreadView { thread, author, votes })
    }

    async fn list_threads(&self, page: PageRequest) -> Result<Page<ThreadView>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let rows = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads t JOIN users u ON u.id = t.author_id \
             ORDER BY t.created_at DESC, t.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let threads = rows
            .iter()
            .map(thread_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(db_error)?;

        let targets: Vec<VoteTarget> = threads.iter().map(|(t, _)| VoteTarget::Thread(t.id)).collect();
        let mut aggregates = self.aggregates(&targets).await?;

        let items = threads
            .into_iter()
            .map(|(thread, author)| {
                let votes = aggregates.remove(&VoteTarget::Thread(thread.id)).unwrap_or_default();
                ThreadView { thread, author, votes }
            })
            .collect();

        Ok(Page::new(page, total, items))
    }
}
