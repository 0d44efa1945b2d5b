use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::info;
use um_core::error::{AppError, Result};
use um_core::models::{AuthorSummary, Follow, FollowOutcome, FollowStatus, Page, PageRequest, UserId, UserProfile};
use um_core::traits::{FollowRepo, UserRepo};

use crate::{db_error, is_unique_violation, SqliteRepo};

/// Which end of the edge a listing is keyed on.
#[derive(Clone, Copy)]
enum Direction {
    /// Users following the given user.
    Followers,
    /// Users the given user follows.
    Following,
}

impl Direction {
    /// (column matched against the user, column joined to the listed users)
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            Self::Followers => ("following_id", "follower_id"),
            Self::Following => ("follower_id", "following_id"),
        }
    }
}

impl SqliteRepo {
    async fn count_edges(&self, column: &str, user_id: UserId) -> Result<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM follows WHERE {column} = ?"))
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn follow_page(&self, direction: Direction, user_id: UserId, page: PageRequest) -> Result<Page<UserProfile>> {
        self.get_user(user_id).await?;
        let (matched, listed) = direction.columns();

        let total = self.count_edges(matched, user_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT u.id AS id, u.name AS name, u.avatar_url AS avatar_url, u.created_at AS created_at \
             FROM follows f JOIN users u ON u.id = f.{listed} \
             WHERE f.{matched} = ? ORDER BY f.created_at DESC, f.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id.0)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(UserProfile {
                    id: UserId(row.try_get("id")?),
                    name: row.try_get("name")?,
                    avatar_url: row.try_get("avatar_url")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(db_error)?;

        Ok(Page::new(page, total, items))
    }
}

#[async_trait]
impl FollowRepo for SqliteRepo {
    async fn follow(&self, follower: UserId, following: UserId) -> Result<FollowOutcome> {
        let target = self.get_user(following).await?;
        if follower == following {
            return Err(AppError::ValidationError("users cannot follow themselves".into()));
        }

        let created_at = Utc::now();
        sqlx::query("INSERT INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?)")
            .bind(follower.0)
            .bind(following.0)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::Conflict("already following this user".into())
                } else {
                    db_error(err)
                }
            })?;

        info!(%follower, %following, "user followed");
        Ok(FollowOutcome {
            follow: Follow {
                follower_id: follower,
                following: AuthorSummary {
                    id: target.id,
                    name: target.name,
                    avatar_url: target.avatar_url,
                },
                created_at,
            },
            follower_count: self.count_edges("following_id", following).await?,
        })
    }

    async fn unfollow(&self, follower: UserId, following: UserId) -> Result<i64> {
        let removed = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower.0)
            .bind(following.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();

        if removed == 0 {
            return Err(AppError::NotFound("Follow".into(), format!("{follower}->{following}")));
        }

        info!(%follower, %following, "user unfollowed");
        self.count_edges("following_id", following).await
    }

    async fn followers(&self, user_id: UserId, page: PageRequest) -> Result<Page<UserProfile>> {
        self.follow_page(Direction::Followers, user_id, page).await
    }

    async fn following(&self, user_id: UserId, page: PageRequest) -> Result<Page<UserProfile>> {
        self.follow_page(Direction::Following, user_id, page).await
    }

    async fn follow_status(&self, viewer: UserId, target: UserId) -> Result<FollowStatus> {
        self.get_user(target).await?;

        let is_following: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = ? AND following_id = ?)")
                .bind(viewer.0)
                .bind(target.0)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(FollowStatus {
            is_following,
            follower_count: self.count_edges("following_id", target).await?,
            following_count: self.count_edges("follower_id", target).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn first_page() -> PageRequest {
        PageRequest::new(1, 10).unwrap()
    }

    #[tokio::test]
    async fn follow_then_unfollow_updates_counts() {
        let repo = memory_repo().await;
        let ada = seed_user(&repo, "ada").await;
        let grace = seed_user(&repo, "grace").await;
        let linus = seed_user(&repo, "linus").await;

        let outcome = repo.follow(grace, ada).await.unwrap();
        assert_eq!(outcome.follow.following.name, "ada");
        assert_eq!(outcome.follower_count, 1);
        assert_eq!(repo.follow(linus, ada).await.unwrap().follower_count, 2);

        let status = repo.follow_status(grace, ada).await.unwrap();
        assert_eq!(status, FollowStatus { is_following: true, follower_count: 2, following_count: 0 });

        assert_eq!(repo.unfollow(grace, ada).await.unwrap(), 1);
        assert!(!repo.follow_status(grace, ada).await.unwrap().is_following);
    }

    #[tokio::test]
    async fn follow_rejections() {
        let repo = memory_repo().await;
        let ada = seed_user(&repo, "ada").await;
        let grace = seed_user(&repo, "grace").await;

        assert!(matches!(repo.follow(ada, UserId(999)).await, Err(AppError::NotFound(_, _))));
        assert!(matches!(repo.follow(ada, ada).await, Err(AppError::ValidationError(_))));

        repo.follow(ada, grace).await.unwrap();
        assert!(matches!(repo.follow(ada, grace).await, Err(AppError::Conflict(_))));

        assert!(matches!(repo.unfollow(grace, ada).await, Err(AppError::NotFound(_, _))));
    }

    #[tokio::test]
    async fn storage_rejects_self_follow() {
        let repo = memory_repo().await;
        let ada = seed_user(&repo, "ada").await;

        let result = sqlx::query("INSERT INTO follows (follower_id, following_id, created_at) VALUES (?, ?, '2026-01-01T00:00:00+00:00')")
            .bind(ada.0)
            .bind(ada.0)
            .execute(repo.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn followers_and_following_lists() {
        let repo = memory_repo().await;
        let ada = seed_user(&repo, "ada").await;
        let grace = seed_user(&repo, "grace").await;
        let linus = seed_user(&repo, "linus").await;

        repo.follow(grace, ada).await.unwrap();
        repo.follow(linus, ada).await.unwrap();
        repo.follow(ada, linus).await.unwrap();

        let followers = repo.followers(ada, first_page()).await.unwrap();
        assert_eq!(followers.total, 2);
        let ids: Vec<UserId> = followers.items.iter().map(|u| u.id).collect();
        assert_eq!(ids, [linus, grace]);

        let following = repo.following(ada, first_page()).await.unwrap();
        assert_eq!(following.total, 1);
        assert_eq!(following.items[0].name, "linus");

        let paged = repo.followers(ada, PageRequest::new(2, 1).unwrap()).await.unwrap();
        assert_eq!((paged.total, paged.items.len()), (2, 1));

        assert!(matches!(repo.followers(UserId(999), first_page()).await, Err(AppError::NotFound(_, _))));
    }
}
