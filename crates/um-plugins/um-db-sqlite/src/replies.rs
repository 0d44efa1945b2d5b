//! Reply forest storage. Every read is scoped to one level of one thread's
//! forest; nothing here walks a whole tree.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};
use um_core::error::{AppError, Result};
use um_core::models::{
    NewReply, Page, PageRequest, ParentRef, ReplyDetail, ReplyId, ReplyNode, ReplyView, ThreadId,
    ThreadSummary, VoteTarget, CHILDREN_PREVIEW_LIMIT,
};
use um_core::traits::{ReplyStore, VoteLedger};

use crate::{db_error, node_from_row, SqliteRepo, NODE_COLUMNS};

/// Message raised by the `replies_parent_same_thread` trigger.
const CROSS_THREAD_PARENT: &str = "parent reply belongs to a different thread";

/// The storage-level cross-thread check surfaces as the same conflict as the store's own.
fn insert_error(err: sqlx::Error) -> AppError {
    let raised_by_trigger = err
        .as_database_error()
        .is_some_and(|db| db.message().contains(CROSS_THREAD_PARENT));
    if raised_by_trigger {
        AppError::invalid_parent(CROSS_THREAD_PARENT)
    } else {
        db_error(err)
    }
}

impl SqliteRepo {
    pub(crate) async fn ensure_thread(&self, id: ThreadId) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM threads WHERE id = ?)")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        if exists {
            Ok(())
        } else {
            Err(AppError::thread_not_found(id))
        }
    }

    async fn fetch_node(&self, id: ReplyId) -> Result<ReplyNode> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM replies r JOIN users u ON u.id = r.author_id WHERE r.id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::reply_not_found(id))?;

        node_from_row(&row).map_err(db_error)
    }

    /// First `CHILDREN_PREVIEW_LIMIT` children of each parent, oldest first,
    /// in one windowed query for the whole page.
    async fn children_previews(&self, parents: &[ReplyId]) -> Result<HashMap<ReplyId, Vec<ReplyNode>>> {
        let mut previews: HashMap<ReplyId, Vec<ReplyNode>> = HashMap::new();
        if parents.is_empty() {
            return Ok(previews);
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT * FROM (\
                SELECT {NODE_COLUMNS}, ROW_NUMBER() OVER (\
                    PARTITION BY r.parent_id ORDER BY r.created_at ASC, r.id ASC\
                ) AS preview_rank \
                FROM replies r JOIN users u ON u.id = r.author_id \
                WHERE r.parent_id IN ("
        ));
        let mut list = query.separated(", ");
        for parent in parents {
            list.push_bind(parent.0);
        }
        list.push_unseparated(")) WHERE preview_rank <= ");
        query.push_bind(CHILDREN_PREVIEW_LIMIT);
        query.push(" ORDER BY parent_id, preview_rank");

        let rows = query.build().fetch_all(&self.pool).await.map_err(db_error)?;
        for row in &rows {
            let node = node_from_row(row).map_err(db_error)?;
            if let Some(parent) = node.reply.parent_id {
                previews.entry(parent).or_default().push(node);
            }
        }

        Ok(previews)
    }
}

#[async_trait]
impl ReplyStore for SqliteRepo {
    async fn create_reply(&self, reply: NewReply) -> Result<ReplyNode> {
        reply.validate()?;
        self.ensure_thread(reply.thread_id).await?;

        if let Some(parent_id) = reply.parent_id {
            let parent_thread: Option<i64> = sqlx::query_scalar("SELECT thread_id FROM replies WHERE id = ?")
                .bind(parent_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            match parent_thread {
                None => return Err(AppError::invalid_parent(format!("parent reply {parent_id} does not exist"))),
                Some(thread) if thread != reply.thread_id.0 => {
                    return Err(AppError::invalid_parent(CROSS_THREAD_PARENT));
                }
                Some(_) => {}
            }
        }

        let result = sqlx::query(
            "INSERT INTO replies (thread_id, parent_id, author_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reply.thread_id.0)
        .bind(reply.parent_id.map(|p| p.0))
        .bind(reply.author_id.0)
        .bind(&reply.content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;

        let id = ReplyId(result.last_insert_rowid());
        info!(%id, thread = %reply.thread_id, parent = ?reply.parent_id, "reply created");

        self.fetch_node(id).await
    }

    async fn list_replies(
        &self,
        thread_id: ThreadId,
        parent_id: Option<ReplyId>,
        page: PageRequest,
    ) -> Result<Page<ReplyView>> {
        self.ensure_thread(thread_id).await?;
        let parent = parent_id.map(|p| p.0);

        // `IS` compares NULL as a value: a NULL parent selects the top level only.
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replies WHERE thread_id = ? AND parent_id IS ?")
            .bind(thread_id.0)
            .bind(parent)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM replies r JOIN users u ON u.id = r.author_id \
             WHERE r.thread_id = ? AND r.parent_id IS ? \
             ORDER BY r.created_at DESC, r.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(thread_id.0)
        .bind(parent)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let nodes = rows
            .iter()
            .map(node_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(db_error)?;

        let ids: Vec<ReplyId> = nodes.iter().map(|n| n.reply.id).collect();
        let mut previews = self.children_previews(&ids).await?;
        let targets: Vec<VoteTarget> = ids.iter().copied().map(VoteTarget::Reply).collect();
        let mut aggregates = self.aggregates(&targets).await?;

        let items = nodes
            .into_iter()
            .map(|node| {
                let id = node.reply.id;
                ReplyView {
                    votes: aggregates.remove(&VoteTarget::Reply(id)).unwrap_or_default(),
                    children: previews.remove(&id).unwrap_or_default(),
                    node,
                }
            })
            .collect();

        debug!(%thread_id, ?parent_id, page = page.page(), total, "listed reply level");
        Ok(Page::new(page, total, items))
    }

    async fn get_reply(&self, id: ReplyId) -> Result<ReplyDetail> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS}, t.title AS thread_title FROM replies r \
             JOIN users u ON u.id = r.author_id \
             JOIN threads t ON t.id = r.thread_id \
             WHERE r.id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::reply_not_found(id))?;

        let node = node_from_row(&row).map_err(db_error)?;
        let thread = ThreadSummary {
            id: node.reply.thread_id,
            title: row.try_get("thread_title").map_err(db_error)?,
        };

        let children = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM replies r JOIN users u ON u.id = r.author_id \
             WHERE r.parent_id = ? ORDER BY r.created_at ASC, r.id ASC"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .iter()
        .map(node_from_row)
        .collect::<sqlx::Result<Vec<_>>>()
        .map_err(db_error)?;

        let votes = self.aggregate(VoteTarget::Reply(id)).await?;

        Ok(ReplyDetail {
            parent: node.reply.parent_id.map(|id| ParentRef { id }),
            thread,
            children_count: children.len() as i64,
            children,
            votes,
            node,
        })
    }
}
