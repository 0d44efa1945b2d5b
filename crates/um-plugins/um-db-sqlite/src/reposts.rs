use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;
use um_core::error::{AppError, Result};
use um_core::models::{
    AuthorSummary, NewRepost, Page, PageRequest, Repost, RepostId, RepostView, ThreadId, UserId,
};
use um_core::traits::{RepostRepo, UserRepo};

use crate::{db_error, is_foreign_key_violation, is_unique_violation, SqliteRepo};

const REPOST_COLUMNS: &str = "p.id AS id, p.user_id AS user_id, p.thread_id AS thread_id, \
     p.comment AS comment, p.created_at AS created_at, \
     u.name AS user_name, u.avatar_url AS user_avatar_url";

fn repost_from_row(row: &SqliteRow) -> sqlx::Result<RepostView> {
    let user_id = UserId(row.try_get("user_id")?);
    Ok(RepostView {
        repost: Repost {
            id: RepostId(row.try_get("id")?),
            user_id,
            thread_id: ThreadId(row.try_get("thread_id")?),
            comment: row.try_get("comment")?,
            created_at: row.try_get("created_at")?,
        },
        user: AuthorSummary {
            id: user_id,
            name: row.try_get("user_name")?,
            avatar_url: row.try_get("user_avatar_url")?,
        },
        thread: None,
    })
}

impl SqliteRepo {
    /// One page of reposts filtered on `column`, newest first.
    async fn repost_page(&self, column: &str, value: i64, page: PageRequest) -> Result<Page<RepostView>> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM reposts WHERE {column} = ?"))
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let items = sqlx::query(&format!(
            "SELECT {REPOST_COLUMNS} FROM reposts p JOIN users u ON u.id = p.user_id \
             WHERE p.{column} = ? ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(value)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .iter()
        .map(repost_from_row)
        .collect::<sqlx::Result<Vec<_>>>()
        .map_err(db_error)?;

        Ok(Page::new(page, total, items))
    }
}

#[async_trait]
impl RepostRepo for SqliteRepo {
    async fn create_repost(&self, repost: NewRepost) -> Result<RepostView> {
        let repost = repost.normalized();
        self.ensure_thread(repost.thread_id).await?;

        let result = sqlx::query("INSERT INTO reposts (user_id, thread_id, comment, created_at) VALUES (?, ?, ?, ?)")
            .bind(repost.user_id.0)
            .bind(repost.thread_id.0)
            .bind(repost.comment.as_deref())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::Conflict("thread already reposted".into())
                } else if is_foreign_key_violation(&err) {
                    AppError::user_not_found(repost.user_id)
                } else {
                    db_error(err)
                }
            })?;

        let id = RepostId(result.last_insert_rowid());
        info!(%id, user = %repost.user_id, thread = %repost.thread_id, "thread reposted");

        let row = sqlx::query(&format!(
            "SELECT {REPOST_COLUMNS} FROM reposts p JOIN users u ON u.id = p.user_id WHERE p.id = ?"
        ))
        .bind(id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let mut view = repost_from_row(&row).map_err(db_error)?;
        view.thread = self.thread_views(&[repost.thread_id]).await?.remove(&repost.thread_id);
        Ok(view)
    }

    async fn reposts_by_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<RepostView>> {
        self.get_user(user_id).await?;
        let mut listing = self.repost_page("user_id", user_id.0, page).await?;

        let thread_ids: Vec<ThreadId> = listing.items.iter().map(|v| v.repost.thread_id).collect();
        let mut threads = self.thread_views(&thread_ids).await?;
        for item in &mut listing.items {
            item.thread = threads.remove(&item.repost.thread_id);
        }

        Ok(listing)
    }

    async fn reposts_by_thread(&self, thread_id: ThreadId, page: PageRequest) -> Result<Page<RepostView>> {
        self.ensure_thread(thread_id).await?;
        self.repost_page("thread_id", thread_id.0, page).await
    }

    async fn delete_repost(&self, id: RepostId, requester: UserId) -> Result<()> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM reposts WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match owner {
            None => return Err(AppError::repost_not_found(id)),
            Some(owner) if owner != requester.0 => {
                return Err(AppError::Forbidden("only the reposting user can delete a repost".into()));
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM reposts WHERE id = ? AND user_id = ?")
            .bind(id.0)
            .bind(requester.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        info!(%id, user = %requester, "repost deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use um_core::traits::VoteLedger;
    use um_core::models::VoteTarget;

    fn first_page() -> PageRequest {
        PageRequest::new(1, 10).unwrap()
    }

    fn new_repost(user_id: UserId, thread_id: ThreadId, comment: Option<&str>) -> NewRepost {
        NewRepost {
            user_id,
            thread_id,
            comment: comment.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn repost_carries_thread_and_aggregate() {
        let repo = memory_repo().await;
        let author = seed_user(&repo, "ada").await;
        let fan = seed_user(&repo, "grace").await;
        let thread = seed_thread(&repo, author, "worth sharing").await;
        repo.upvote(author, VoteTarget::Thread(thread)).await.unwrap();

        let view = repo.create_repost(new_repost(fan, thread, Some("read this"))).await.unwrap();

        assert_eq!(view.repost.user_id, fan);
        assert_eq!(view.repost.comment.as_deref(), Some("read this"));
        assert_eq!(view.user.name, "grace");
        let shared = view.thread.unwrap();
        assert_eq!(shared.thread.id, thread);
        assert_eq!(shared.votes.score, 1);
    }

    #[tokio::test]
    async fn one_repost_per_user_and_thread() {
        let repo = memory_repo().await;
        let user = seed_user(&repo, "ada").await;
        let thread = seed_thread(&repo, user, "t").await;

        repo.create_repost(new_repost(user, thread, None)).await.unwrap();
        let err = repo.create_repost(new_repost(user, thread, Some("again"))).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = repo.create_repost(new_repost(user, ThreadId(404), None)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref kind, _) if kind == "Thread"));
    }

    #[tokio::test]
    async fn blank_comment_is_stored_as_none() {
        let repo = memory_repo().await;
        let user = seed_user(&repo, "ada").await;
        let thread = seed_thread(&repo, user, "t").await;

        let view = repo.create_repost(new_repost(user, thread, Some("   "))).await.unwrap();
        assert_eq!(view.repost.comment, None);
    }

    #[tokio::test]
    async fn listings_by_user_and_by_thread() {
        let repo = memory_repo().await;
        let ada = seed_user(&repo, "ada").await;
        let grace = seed_user(&repo, "grace").await;
        let first = seed_thread(&repo, ada, "first").await;
        let second = seed_thread(&repo, ada, "second").await;

        repo.create_repost(new_repost(grace, first, None)).await.unwrap();
        repo.create_repost(new_repost(grace, second, None)).await.unwrap();
        repo.create_repost(new_repost(ada, first, None)).await.unwrap();

        let by_grace = repo.reposts_by_user(grace, first_page()).await.unwrap();
        assert_eq!(by_grace.total, 2);
        let threads: Vec<ThreadId> = by_grace.items.iter().map(|v| v.thread.as_ref().unwrap().thread.id).collect();
        assert_eq!(threads, [second, first]);

        let on_first = repo.reposts_by_thread(first, first_page()).await.unwrap();
        assert_eq!(on_first.total, 2);
        assert!(on_first.items.iter().all(|v| v.thread.is_none()));

        let paged = repo.reposts_by_thread(first, PageRequest::new(2, 1).unwrap()).await.unwrap();
        assert_eq!((paged.total, paged.items.len()), (2, 1));

        assert!(matches!(
            repo.reposts_by_user(UserId(999), first_page()).await,
            Err(AppError::NotFound(_, _))
        ));
    }

    #[tokio::test]
    async fn only_the_owner_deletes() {
        let repo = memory_repo().await;
        let ada = seed_user(&repo, "ada").await;
        let grace = seed_user(&repo, "grace").await;
        let thread = seed_thread(&repo, ada, "t").await;
        let id = repo.create_repost(new_repost(grace, thread, None)).await.unwrap().repost.id;

        let err = repo.delete_repost(id, ada).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        repo.delete_repost(id, grace).await.unwrap();
        assert!(matches!(repo.delete_repost(id, grace).await, Err(AppError::NotFound(_, _))));

        // Deleting frees the slot for a new repost.
        repo.create_repost(new_repost(grace, thread, None)).await.unwrap();
    }
}
