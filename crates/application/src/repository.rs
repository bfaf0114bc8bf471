use async_trait::async_trait;
use domain::{
    ActivityId, ActivityRecord, ClientIp, CommentDraft, LikeToggle, NewPost, NewUser, PageRequest,
    Post, PostId, RepositoryError, TargetRef, Timestamp, User, UserEmail, UserId,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 邮箱重复时返回 `RepositoryError::Conflict`
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;

    /// 覆盖用户当前的刷新令牌
    async fn store_refresh_token(&self, id: UserId, token: &str) -> Result<(), RepositoryError>;

    /// 仅当保存的令牌等于 `current` 时替换为 `next`，返回是否替换
    async fn rotate_refresh_token(
        &self,
        id: UserId,
        current: &str,
        next: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError>;
    /// 只写入 label/text/file，计数字段归 [`ActivityLedger`] 维护
    async fn update_content(&self, post: &Post) -> Result<Post, RepositoryError>;
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>, RepositoryError>;
    /// 按创建时间倒序
    async fn list(&self) -> Result<Vec<Post>, RepositoryError>;
}

/// 互动记录的只读查询
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn find_by_id(&self, id: ActivityId) -> Result<Option<ActivityRecord>, RepositoryError>;

    /// 当前指向目标的 like 记录数
    async fn count_likes(&self, target: TargetRef) -> Result<u64, RepositoryError>;

    /// `TargetRef::Post` 列出帖子的评论，`TargetRef::Activity` 列出评论的回复。
    /// 按 (created_at, id) 升序，返回当前页和总数。
    async fn list_thread(
        &self,
        parent: TargetRef,
        page: PageRequest,
    ) -> Result<(Vec<ActivityRecord>, u64), RepositoryError>;
}

/// 互动账本：每个方法都是一个原子工作单元。
///
/// 记录的增删与对应计数的调整要么一起提交，要么一起回滚；
/// 同一目标上的并发调用按顺序执行，不同目标之间互不阻塞。
#[async_trait]
pub trait ActivityLedger: Send + Sync {
    /// 目标不存在时返回 `RepositoryError::NotFound`
    async fn toggle_like(
        &self,
        target: TargetRef,
        actor: UserId,
        now: Timestamp,
    ) -> Result<LikeToggle, RepositoryError>;

    async fn append_comment(&self, draft: CommentDraft) -> Result<ActivityRecord, RepositoryError>;

    /// 每个 (帖子, IP) 只计一次浏览，返回计数后的帖子
    async fn record_view(
        &self,
        post_id: PostId,
        ip: &ClientIp,
        now: Timestamp,
    ) -> Result<Post, RepositoryError>;
}
