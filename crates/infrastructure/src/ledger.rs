//! 互动账本的 PostgreSQL 实现
//!
//! 每个方法一个事务：先对目标行加 `FOR UPDATE` 锁，同一目标上的并发操作因此串行，
//! 不同目标互不影响；记录写入与计数调整在同一事务中提交。
//! 部分唯一索引（每用户每目标一条 like、每帖子每 IP 一条 view）作为最后一道约束。

use application::ActivityLedger;
use async_trait::async_trait;
use domain::{
    ActivityKind, ActivityRecord, ClientIp, CommentDraft, LikeOutcome, LikeToggle, Post, PostId,
    RepositoryError, TargetRef, Timestamp, UserId,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::repository::{map_sqlx_err, ActivityRow, PostRow, ACTIVITY_COLUMNS, POST_COLUMNS};

#[derive(Clone)]
pub struct PgActivityLedger {
    pool: PgPool,
}

impl PgActivityLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 锁住目标行，目标不存在时返回 NotFound
async fn lock_target(
    tx: &mut Transaction<'static, Postgres>,
    target: TargetRef,
) -> Result<(), RepositoryError> {
    let sql = match target {
        TargetRef::Post(_) => "SELECT id FROM posts WHERE id = $1 FOR UPDATE",
        TargetRef::Activity(_) => {
            "SELECT id FROM activities WHERE id = $1 AND kind IN ('comment', 'reply') FOR UPDATE"
        }
    };
    sqlx::query_scalar::<_, i64>(sql)
        .bind(target.raw_id())
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;
    Ok(())
}

#[async_trait]
impl ActivityLedger for PgActivityLedger {
    async fn toggle_like(
        &self,
        target: TargetRef,
        actor: UserId,
        now: Timestamp,
    ) -> Result<LikeToggle, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        lock_target(&mut tx, target).await?;

        let column = target.like_column();
        let existing: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM activities WHERE kind = 'like' AND user_id = $1 AND {column} = $2"
        ))
        .bind(actor.0)
        .bind(target.raw_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let outcome = match existing {
            Some(like_id) => {
                sqlx::query("DELETE FROM activities WHERE id = $1")
                    .bind(like_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
                LikeOutcome::Removed
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO activities (kind, user_id, {column}, created_at, updated_at)
                    VALUES ('like', $1, $2, $3, $3)
                    "#
                ))
                .bind(actor.0)
                .bind(target.raw_id())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
                LikeOutcome::Added
            }
        };

        let delta: i64 = match outcome {
            LikeOutcome::Added => 1,
            LikeOutcome::Removed => -1,
        };
        let counter_sql = match target {
            TargetRef::Post(_) => {
                "UPDATE posts SET likes = likes + $2 WHERE id = $1 RETURNING likes"
            }
            TargetRef::Activity(_) => {
                "UPDATE activities SET like_count = like_count + $2 WHERE id = $1 RETURNING like_count"
            }
        };
        let like_count: i64 = sqlx::query_scalar(counter_sql)
            .bind(target.raw_id())
            .bind(delta)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        debug!(liked = ?target, user_id = %actor, like_count, "like toggle committed");

        Ok(LikeToggle {
            outcome,
            like_count,
        })
    }

    async fn append_comment(&self, draft: CommentDraft) -> Result<ActivityRecord, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        match (draft.kind, draft.parent_id, draft.post_id) {
            (ActivityKind::Reply, Some(parent_id), _) => {
                // 父评论必须仍然存在
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM activities WHERE id = $1 AND kind = 'comment' FOR SHARE",
                )
                .bind(parent_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?
                .ok_or(RepositoryError::NotFound)?;
            }
            (_, _, Some(post_id)) => lock_target(&mut tx, TargetRef::Post(post_id)).await?,
            _ => return Err(RepositoryError::NotFound),
        }

        let row = sqlx::query_as::<_, ActivityRow>(&format!(
            r#"
            INSERT INTO activities (kind, user_id, post_id, parent_id, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {ACTIVITY_COLUMNS}
            "#
        ))
        .bind(draft.kind.as_str())
        .bind(draft.user_id.0)
        .bind(draft.post_id.map(|id| id.0))
        .bind(draft.parent_id.map(|id| id.0))
        .bind(&draft.content)
        .bind(draft.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if let Some(post_id) = draft.counted_post() {
            sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = $1")
                .bind(post_id.0)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        ActivityRecord::try_from(row)
    }

    async fn record_view(
        &self,
        post_id: PostId,
        ip: &ClientIp,
        now: Timestamp,
    ) -> Result<Post, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        lock_target(&mut tx, TargetRef::Post(post_id)).await?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO activities (kind, post_id, ip, created_at, updated_at)
            VALUES ('view', $1, $2, $3, $3)
            ON CONFLICT (post_id, ip) WHERE kind = 'view' DO NOTHING
            RETURNING id
            "#,
        )
        .bind(post_id.0)
        .bind(ip.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let row = if inserted.is_some() {
            sqlx::query_as::<_, PostRow>(&format!(
                "UPDATE posts SET views = views + 1 WHERE id = $1 RETURNING {POST_COLUMNS}"
            ))
            .bind(post_id.0)
            .fetch_one(&mut *tx)
            .await
        } else {
            sqlx::query_as::<_, PostRow>(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
            ))
            .bind(post_id.0)
            .fetch_one(&mut *tx)
            .await
        }
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(row.into())
    }
}
