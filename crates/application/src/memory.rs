//! 进程内存储实现
//!
//! 用于测试和不依赖数据库的本地运行。账本操作先取得目标的区域锁，
//! 再在一次写锁内完成记录与计数的全部修改，中途没有挂起点，
//! 因此对外表现为原子的工作单元。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use domain::{
    ActivityId, ActivityKind, ActivityRecord, ClientIp, CommentDraft, LikeOutcome, LikeToggle,
    NewPost, NewUser, PageRequest, Post, PostId, RepositoryError, TargetRef, ThreadKind, Timestamp,
    User, UserEmail, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::error;

use crate::repository::{ActivityLedger, ActivityRepository, PostRepository, UserRepository};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    posts: BTreeMap<PostId, Post>,
    activities: BTreeMap<ActivityId, ActivityRecord>,
    likes: HashMap<(TargetRef, UserId), ActivityId>,
    views: HashMap<(PostId, String), ActivityId>,
    refresh_tokens: HashMap<UserId, String>,
    last_user_id: i64,
    last_post_id: i64,
    last_activity_id: i64,
}

impl Tables {
    fn next_activity_id(&mut self) -> ActivityId {
        self.last_activity_id += 1;
        ActivityId(self.last_activity_id)
    }

    fn target_exists(&self, target: TargetRef) -> bool {
        match target {
            TargetRef::Post(id) => self.posts.contains_key(&id),
            TargetRef::Activity(id) => self.activities.get(&id).is_some_and(|record| {
                matches!(record.kind, ActivityKind::Comment | ActivityKind::Reply)
            }),
        }
    }

    /// 调整目标上的点赞计数并返回新值。计数变为负数说明与 like 记录不一致，
    /// 此时不做任何修改并返回存储错误。
    fn adjust_likes(&mut self, target: TargetRef, delta: i64) -> Result<i64, RepositoryError> {
        let counter = match target {
            TargetRef::Post(id) => self.posts.get_mut(&id).map(|post| &mut post.likes),
            TargetRef::Activity(id) => self
                .activities
                .get_mut(&id)
                .map(|record| &mut record.like_count),
        }
        .ok_or(RepositoryError::NotFound)?;
        let next = *counter + delta;
        if next < 0 {
            error!(liked = ?target, current = *counter, delta, "like counter would go negative");
            return Err(RepositoryError::storage("like counter out of sync with like records"));
        }
        *counter = next;
        Ok(next)
    }
}

/// 按目标划分的锁，不同目标的工作单元互不等待。
/// 最后一个持有者释放时移除该目标的条目。
#[derive(Default)]
struct TargetLocks {
    regions: StdMutex<HashMap<TargetRef, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    async fn acquire(&self, target: TargetRef) -> RegionGuard<'_> {
        let region = self
            .regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target)
            .or_default()
            .clone();
        RegionGuard {
            guard: Some(region.lock_owned().await),
            target,
            locks: self,
        }
    }

    fn release(&self, target: TargetRef) {
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        if regions
            .get(&target)
            .is_some_and(|region| Arc::strong_count(region) == 1)
        {
            regions.remove(&target);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct RegionGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    target: TargetRef,
    locks: &'a TargetLocks,
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        // 先释放互斥锁，等待者持有的 Arc 会阻止条目被移除
        drop(self.guard.take());
        self.locks.release(self.target);
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    locks: TargetLocks,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryStorage {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(RepositoryError::Conflict);
        }
        tables.last_user_id += 1;
        let stored = User {
            id: UserId(tables.last_user_id),
            name: user.name,
            surname: user.surname,
            email: user.email,
            password: user.password,
            role: user.role,
            status: user.status,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        tables.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|existing| existing.id != user.id && existing.email == user.email)
        {
            return Err(RepositoryError::Conflict);
        }
        let slot = tables.users.get_mut(&user.id).ok_or(RepositoryError::NotFound)?;
        *slot = user.clone();
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|user| &user.email == email).cloned())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn store_refresh_token(&self, id: UserId, token: &str) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        tables.refresh_tokens.insert(id, token.to_owned());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: UserId,
        current: &str,
        next: &str,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.refresh_tokens.get_mut(&id) {
            Some(stored) if stored.as_str() == current => {
                *stored = next.to_owned();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PostRepository for MemoryStorage {
    async fn create(&self, post: NewPost) -> Result<Post, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&post.user_id) {
            return Err(RepositoryError::NotFound);
        }
        tables.last_post_id += 1;
        let stored = Post {
            id: PostId(tables.last_post_id),
            user_id: post.user_id,
            label: post.label,
            text: post.text,
            file: post.file,
            views: 0,
            likes: 0,
            comment_count: 0,
            created_at: post.created_at,
            updated_at: post.created_at,
        };
        tables.posts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_content(&self, post: &Post) -> Result<Post, RepositoryError> {
        let mut tables = self.tables.write().await;
        let stored = tables.posts.get_mut(&post.id).ok_or(RepositoryError::NotFound)?;
        stored.label = post.label.clone();
        stored.text = post.text.clone();
        stored.file = post.file.clone();
        stored.updated_at = post.updated_at;
        Ok(stored.clone())
    }

    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>, RepositoryError> {
        Ok(self.tables.read().await.posts.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Post>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables.posts.values().cloned().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts)
    }
}

#[async_trait]
impl ActivityRepository for MemoryStorage {
    async fn find_by_id(&self, id: ActivityId) -> Result<Option<ActivityRecord>, RepositoryError> {
        Ok(self.tables.read().await.activities.get(&id).cloned())
    }

    async fn count_likes(&self, target: TargetRef) -> Result<u64, RepositoryError> {
        let tables = self.tables.read().await;
        let count = tables
            .likes
            .keys()
            .filter(|(liked, _)| *liked == target)
            .count();
        Ok(count as u64)
    }

    async fn list_thread(
        &self,
        parent: TargetRef,
        page: PageRequest,
    ) -> Result<(Vec<ActivityRecord>, u64), RepositoryError> {
        let kind = ThreadKind::under(parent).record_kind();
        let tables = self.tables.read().await;
        let mut thread: Vec<&ActivityRecord> = tables
            .activities
            .values()
            .filter(|record| record.kind == kind)
            .filter(|record| match parent {
                TargetRef::Post(post_id) => record.post_id == Some(post_id),
                TargetRef::Activity(comment_id) => record.parent_id == Some(comment_id),
            })
            .collect();
        thread.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let total = thread.len() as u64;
        let items = thread
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }
}

#[async_trait]
impl ActivityLedger for MemoryStorage {
    async fn toggle_like(
        &self,
        target: TargetRef,
        actor: UserId,
        now: Timestamp,
    ) -> Result<LikeToggle, RepositoryError> {
        let _region = self.locks.acquire(target).await;
        let mut tables = self.tables.write().await;
        if !tables.target_exists(target) {
            return Err(RepositoryError::NotFound);
        }

        let existing = tables.likes.get(&(target, actor)).copied();
        let delta = if existing.is_some() { -1 } else { 1 };
        let like_count = tables.adjust_likes(target, delta)?;

        let outcome = match existing {
            Some(like_id) => {
                tables.likes.remove(&(target, actor));
                tables.activities.remove(&like_id);
                LikeOutcome::Removed
            }
            None => {
                let id = tables.next_activity_id();
                let (post_id, parent_id) = match target {
                    TargetRef::Post(post_id) => (Some(post_id), None),
                    TargetRef::Activity(activity_id) => (None, Some(activity_id)),
                };
                tables.activities.insert(
                    id,
                    ActivityRecord {
                        id,
                        kind: ActivityKind::Like,
                        user_id: Some(actor),
                        post_id,
                        parent_id,
                        ip: None,
                        content: None,
                        like_count: 0,
                        created_at: now,
                        updated_at: now,
                    },
                );
                tables.likes.insert((target, actor), id);
                LikeOutcome::Added
            }
        };

        Ok(LikeToggle {
            outcome,
            like_count,
        })
    }

    async fn append_comment(&self, draft: CommentDraft) -> Result<ActivityRecord, RepositoryError> {
        let region = match (draft.kind, draft.parent_id, draft.post_id) {
            (ActivityKind::Reply, Some(parent), _) => TargetRef::Activity(parent),
            (_, _, Some(post_id)) => TargetRef::Post(post_id),
            _ => return Err(RepositoryError::NotFound),
        };
        let _region = self.locks.acquire(region).await;
        let mut tables = self.tables.write().await;
        if !tables.target_exists(region) {
            return Err(RepositoryError::NotFound);
        }

        let id = tables.next_activity_id();
        let record = ActivityRecord {
            id,
            kind: draft.kind,
            user_id: Some(draft.user_id),
            post_id: draft.post_id,
            parent_id: draft.parent_id,
            ip: None,
            content: Some(draft.content.clone()),
            like_count: 0,
            created_at: draft.created_at,
            updated_at: draft.created_at,
        };
        tables.activities.insert(id, record.clone());

        if let Some(post_id) = draft.counted_post() {
            let post = tables.posts.get_mut(&post_id).ok_or(RepositoryError::NotFound)?;
            post.comment_count += 1;
        }
        Ok(record)
    }

    async fn record_view(
        &self,
        post_id: PostId,
        ip: &ClientIp,
        now: Timestamp,
    ) -> Result<Post, RepositoryError> {
        let _region = self.locks.acquire(TargetRef::Post(post_id)).await;
        let mut tables = self.tables.write().await;
        if !tables.posts.contains_key(&post_id) {
            return Err(RepositoryError::NotFound);
        }

        let key = (post_id, ip.as_str().to_owned());
        if !tables.views.contains_key(&key) {
            let id = tables.next_activity_id();
            tables.activities.insert(
                id,
                ActivityRecord {
                    id,
                    kind: ActivityKind::View,
                    user_id: None,
                    post_id: Some(post_id),
                    parent_id: None,
                    ip: Some(key.1.clone()),
                    content: None,
                    like_count: 0,
                    created_at: now,
                    updated_at: now,
                },
            );
            tables.views.insert(key, id);
            if let Some(post) = tables.posts.get_mut(&post_id) {
                post.views += 1;
            }
        }

        tables
            .posts
            .get(&post_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}
