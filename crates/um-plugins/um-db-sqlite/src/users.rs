use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use um_core::error::{AppError, Result};
use um_core::models::{NewUser, User, UserCredentials, UserId};
use um_core::traits::UserRepo;

use crate::{db_error, is_unique_violation, SqliteRepo};

fn user_from_row(row: &SqliteRow) -> sqlx::Result<User> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserRepo for SqliteRepo {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO users (name, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::Conflict("email already registered".into())
            } else {
                db_error(err)
            }
        })?;

        let id = UserId(result.last_insert_rowid());
        debug!(%id, "user registered");

        Ok(User {
            id,
            name: user.name,
            email: user.email,
            avatar_url: None,
            created_at,
        })
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        let row = sqlx::query("SELECT id, name, email, avatar_url, created_at FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => user_from_row(&row).map_err(db_error),
            None => Err(AppError::user_not_found(id)),
        }
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query(
            "SELECT id, name, email, avatar_url, created_at, password_hash FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|row| {
            Ok(UserCredentials {
                user: user_from_row(&row)?,
                password_hash: row.try_get("password_hash")?,
            })
        })
        .transpose()
        .map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let repo = memory_repo().await;
        seed_user(&repo, "ada").await;

        let err = repo
            .create_user(NewUser {
                name: "other".into(),
                email: "ada@example.com".into(),
                password_hash: "h".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn credentials_round_trip_by_email() {
        let repo = memory_repo().await;
        let id = seed_user(&repo, "grace").await;

        let creds = repo.find_credentials("grace@example.com").await.unwrap().unwrap();
        assert_eq!(creds.user.id, id);
        assert_eq!(creds.password_hash, "not-a-real-hash");

        assert!(repo.find_credentials("nobody@example.com").await.unwrap().is_none());
        assert!(matches!(
            repo.get_user(UserId(404)).await,
            Err(AppError::NotFound(_, _))
        ));
    }
}
