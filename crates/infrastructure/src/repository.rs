use std::sync::Arc;

use application::{ActivityRepository, PostRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ActivityId, ActivityKind, ActivityRecord, NewPost, NewUser, PageRequest, PasswordHash, Post,
    PostId, RepositoryError, TargetRef, ThreadKind, User, UserEmail, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use crate::ledger::PgActivityLedger;

pub(crate) const USER_COLUMNS: &str =
    "id, name, surname, email, password_hash, role, status, created_at, updated_at";
pub(crate) const POST_COLUMNS: &str =
    "id, user_id, label, text, file, views, likes, comment_count, created_at, updated_at";
pub(crate) const ACTIVITY_COLUMNS: &str =
    "id, kind, user_id, post_id, parent_id, ip, content, like_count, created_at, updated_at";

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::Conflict;
        }
        // 引用的帖子/用户/父记录已不存在
        if db.is_foreign_key_violation() {
            return RepositoryError::NotFound;
        }
    }
    if matches!(err, sqlx::Error::RowNotFound) {
        return RepositoryError::NotFound;
    }
    RepositoryError::storage_with_source("database operation failed", err)
}

fn invalid_data(err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::storage(format!("invalid row: {err}"))
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    id: i64,
    name: String,
    surname: String,
    email: String,
    password_hash: String,
    role: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(value.id),
            name: value.name,
            surname: value.surname,
            email: UserEmail::parse(value.email).map_err(invalid_data)?,
            password: PasswordHash::new(value.password_hash).map_err(invalid_data)?,
            role: value.role.parse().map_err(invalid_data)?,
            status: value.status.parse().map_err(invalid_data)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PostRow {
    id: i64,
    user_id: i64,
    label: String,
    text: String,
    file: Option<String>,
    views: i64,
    likes: i64,
    comment_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(value: PostRow) -> Self {
        Post {
            id: PostId(value.id),
            user_id: UserId(value.user_id),
            label: value.label,
            text: value.text,
            file: value.file,
            views: value.views,
            likes: value.likes,
            comment_count: value.comment_count,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ActivityRow {
    id: i64,
    kind: String,
    user_id: Option<i64>,
    post_id: Option<i64>,
    parent_id: Option<i64>,
    ip: Option<String>,
    content: Option<String>,
    like_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityRecord {
    type Error = RepositoryError;

    fn try_from(value: ActivityRow) -> Result<Self, Self::Error> {
        Ok(ActivityRecord {
            id: ActivityId(value.id),
            kind: value.kind.parse::<ActivityKind>().map_err(invalid_data)?,
            user_id: value.user_id.map(UserId),
            post_id: value.post_id.map(PostId),
            parent_id: value.parent_id.map(ActivityId),
            ip: value.ip,
            content: value.content,
            like_count: value.like_count,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (name, surname, email, password_hash, role, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.surname)
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(row)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET name = $2, surname = $3, email = $4, password_hash = $5,
                role = $6, status = $7, updated_at = $8
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id.0)
        .bind(&user.name)
        .bind(&user.surname)
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        User::try_from(row)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(User::try_from)
        .transpose()
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn store_refresh_token(&self, id: UserId, token: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id.0)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: UserId,
        current: &str,
        next: &str,
    ) -> Result<bool, RepositoryError> {
        // 比较与替换在同一条语句内完成，同一令牌的并发刷新只有一个成功
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $3 WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id.0)
        .bind(current)
        .bind(next)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone)]
pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostRepository for PgPostRepository {
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            INSERT INTO posts (user_id, label, text, file, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(post.user_id.0)
        .bind(&post.label)
        .bind(&post.text)
        .bind(post.file.as_deref())
        .bind(post.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    async fn update_content(&self, post: &Post) -> Result<Post, RepositoryError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts SET label = $2, text = $3, file = $4, updated_at = $5
            WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(post.id.0)
        .bind(&post.label)
        .bind(&post.text)
        .bind(post.file.as_deref())
        .bind(post.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>, RepositoryError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.map(Post::from))
    }

    async fn list(&self) -> Result<Vec<Post>, RepositoryError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(Post::from).collect())
    }
}

#[derive(Clone)]
pub struct PgActivityRepository {
    pool: PgPool,
}

impl PgActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityRepository for PgActivityRepository {
    async fn find_by_id(&self, id: ActivityId) -> Result<Option<ActivityRecord>, RepositoryError> {
        sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(ActivityRecord::try_from)
        .transpose()
    }

    async fn count_likes(&self, target: TargetRef) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM activities WHERE kind = 'like' AND {} = $1",
            target.like_column()
        ))
        .bind(target.raw_id())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count.max(0) as u64)
    }

    async fn list_thread(
        &self,
        parent: TargetRef,
        page: PageRequest,
    ) -> Result<(Vec<ActivityRecord>, u64), RepositoryError> {
        let kind = ThreadKind::under(parent).record_kind();
        let column = match parent {
            TargetRef::Post(_) => "post_id",
            TargetRef::Activity(_) => "parent_id",
        };

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM activities WHERE kind = $1 AND {column} = $2"
        ))
        .bind(kind.as_str())
        .bind(parent.raw_id())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            r#"
            SELECT {ACTIVITY_COLUMNS} FROM activities
            WHERE kind = $1 AND {column} = $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(kind.as_str())
        .bind(parent.raw_id())
        .bind(i64::from(page.limit()))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let items = rows
            .into_iter()
            .map(ActivityRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total.max(0) as u64))
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub post_repository: Arc<PgPostRepository>,
    pub activity_repository: Arc<PgActivityRepository>,
    pub ledger: Arc<PgActivityLedger>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            post_repository: Arc::new(PgPostRepository::new(pool.clone())),
            activity_repository: Arc::new(PgActivityRepository::new(pool.clone())),
            ledger: Arc::new(PgActivityLedger::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
