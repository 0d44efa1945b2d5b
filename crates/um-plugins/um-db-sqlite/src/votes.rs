//! Vote ledger over two same-shaped tables, `thread_votes` and `reply_votes`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;
use um_core::error::{AppError, Result};
use um_core::models::{TargetKind, UserId, Vote, VoteAggregate, VoteOutcome, VoteTarget, VoteValue};
use um_core::traits::VoteLedger;

use crate::{db_error, is_foreign_key_violation, SqliteRepo};

/// Table layout of one target kind's ledger.
struct LedgerTable {
    votes: &'static str,
    column: &'static str,
    targets: &'static str,
}

fn ledger(kind: TargetKind) -> LedgerTable {
    match kind {
        TargetKind::Thread => LedgerTable {
            votes: "thread_votes",
            column: "thread_id",
            targets: "threads",
        },
        TargetKind::Reply => LedgerTable {
            votes: "reply_votes",
            column: "reply_id",
            targets: "replies",
        },
    }
}

#[async_trait]
impl VoteLedger for SqliteRepo {
    async fn set_vote(&self, user_id: UserId, target: VoteTarget, value: VoteValue) -> Result<VoteOutcome> {
        let table = ledger(target.kind());
        let now = Utc::now();

        // Single conditional write: inserts only if the target exists, and the
        // (user, target) primary key turns a repeat into an in-place update.
        let upsert = format!(
            "INSERT INTO {votes} (user_id, {column}, value, created_at, updated_at) \
             SELECT ?1, ?2, ?3, ?4, ?4 WHERE EXISTS (SELECT 1 FROM {targets} WHERE id = ?2) \
             ON CONFLICT (user_id, {column}) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at \
             RETURNING value, created_at, updated_at",
            votes = table.votes,
            column = table.column,
            targets = table.targets,
        );

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(&upsert)
            .bind(user_id.0)
            .bind(target.raw_id())
            .bind(i64::from(value))
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    AppError::user_not_found(user_id)
                } else {
                    db_error(err)
                }
            })?
            .ok_or_else(|| AppError::target_not_found(target))?;

        let vote = Vote {
            user_id,
            target,
            value: VoteValue::try_from(row.try_get::<i64, _>("value").map_err(db_error)?)?,
            created_at: row.try_get("created_at").map_err(db_error)?,
            updated_at: row.try_get("updated_at").map_err(db_error)?,
        };

        let aggregate = count_votes(&mut *tx, &table, target.raw_id()).await?;
        tx.commit().await.map_err(db_error)?;

        debug!(%user_id, ?target, value = i64::from(value), score = aggregate.score, "vote recorded");
        Ok(VoteOutcome { vote, aggregate })
    }

    async fn aggregate(&self, target: VoteTarget) -> Result<VoteAggregate> {
        let table = ledger(target.kind());

        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = ?)",
            table.targets
        ))
        .bind(target.raw_id())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        if !exists {
            return Err(AppError::target_not_found(target));
        }

        count_votes(&self.pool, &table, target.raw_id()).await
    }

    async fn aggregates(&self, targets: &[VoteTarget]) -> Result<HashMap<VoteTarget, VoteAggregate>> {
        let mut result: HashMap<VoteTarget, VoteAggregate> =
            targets.iter().map(|t| (*t, VoteAggregate::default())).collect();

        for kind in [TargetKind::Thread, TargetKind::Reply] {
            let ids: Vec<i64> = targets
                .iter()
                .filter(|t| t.kind() == kind)
                .map(VoteTarget::raw_id)
                .collect();
            if ids.is_empty() {
                continue;
            }

            let table = ledger(kind);
            let mut query = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {column} AS target_id, \
                 COALESCE(SUM(value = 1), 0) AS upvotes, COALESCE(SUM(value = -1), 0) AS downvotes \
                 FROM {votes} WHERE {column} IN (",
                column = table.column,
                votes = table.votes,
            ));
            let mut list = query.separated(", ");
            for id in &ids {
                list.push_bind(*id);
            }
            list.push_unseparated(") GROUP BY ");
            query.push(table.column);

            let rows = query.build().fetch_all(&self.pool).await.map_err(db_error)?;
            for row in rows {
                let target = VoteTarget::from_parts(kind, row.try_get("target_id").map_err(db_error)?);
                let aggregate = VoteAggregate::from_counts(
                    row.try_get("upvotes").map_err(db_error)?,
                    row.try_get("downvotes").map_err(db_error)?,
                );
                result.insert(target, aggregate);
            }
        }

        Ok(result)
    }
}

/// `COUNT`/`SUM` over the ledger; never a stored counter.
async fn count_votes<'e, E>(executor: E, table: &LedgerTable, raw_id: i64) -> Result<VoteAggregate>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT COALESCE(SUM(value = 1), 0) AS upvotes, COALESCE(SUM(value = -1), 0) AS downvotes \
         FROM {} WHERE {} = ?",
        table.votes, table.column
    ))
    .bind(raw_id)
    .fetch_one(executor)
    .await
    .map_err(db_error)?;

    Ok(VoteAggregate::from_counts(
        row.try_get("upvotes").map_err(db_error)?,
        row.try_get("downvotes").map_err(db_error)?,
    ))
}
