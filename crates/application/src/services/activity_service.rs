use std::sync::Arc;

use domain::{
    ActivityId, ActivityKind, ActivityRecord, Actor, ClientIp, CommentDraft, DomainError,
    LikeOutcome, LikeToggle, Notification, Page, PageRequest, Post, PostId, TargetKind, TargetRef,
    ThreadKind,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    clock::Clock,
    error::ApplicationError,
    notifier::Notifier,
    repository::{ActivityLedger, ActivityRepository, PostRepository},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleLikeResponse {
    pub message: String,
    pub liked: bool,
    pub like_count: i64,
}

impl From<LikeToggle> for ToggleLikeResponse {
    fn from(toggle: LikeToggle) -> Self {
        Self {
            message: toggle.outcome.message().to_owned(),
            liked: toggle.outcome == LikeOutcome::Added,
            like_count: toggle.like_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentCreated {
    pub message: String,
    pub activity: ActivityRecord,
}

/// 解析后的互动目标
enum Target {
    Post(Post),
    Record(ActivityRecord),
}

pub struct ActivityServiceDependencies {
    pub post_repository: Arc<dyn PostRepository>,
    pub activity_repository: Arc<dyn ActivityRepository>,
    pub ledger: Arc<dyn ActivityLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct ActivityService {
    deps: ActivityServiceDependencies,
}

impl ActivityService {
    pub fn new(deps: ActivityServiceDependencies) -> Self {
        Self { deps }
    }

    /// 切换点赞。只有帖子被他人新点赞时才通知作者。
    pub async fn toggle_like(
        &self,
        kind: TargetKind,
        target_id: i64,
        actor: &Actor,
    ) -> Result<ToggleLikeResponse, ApplicationError> {
        let target = self.resolve(kind, target_id).await?;
        let now = self.deps.clock.now();

        let toggle = self
            .deps
            .ledger
            .toggle_like(kind.target_ref(target_id), actor.user_id, now)
            .await
            .map_err(ApplicationError::not_found_as(kind.not_found()))?;

        info!(
            target_kind = %kind,
            target_id,
            user_id = %actor.user_id,
            outcome = ?toggle.outcome,
            like_count = toggle.like_count,
            "like toggled"
        );

        if let (Target::Post(post), LikeOutcome::Added) = (&target, toggle.outcome) {
            if !post.is_owned_by(actor.user_id) {
                let report = self
                    .deps
                    .notifier
                    .notify(post.user_id, Notification::new_like(post, actor, now))
                    .await;
                debug!(post_id = %post.id, delivered = report.delivered, "like notification sent");
            }
        }

        Ok(toggle.into())
    }

    /// 在帖子下评论，或回复评论/回复。回复一律挂到根评论。
    pub async fn create_comment_or_reply(
        &self,
        kind: TargetKind,
        target_id: i64,
        actor: &Actor,
        content: String,
    ) -> Result<CommentCreated, ApplicationError> {
        let target = self.resolve(kind, target_id).await?;
        let now = self.deps.clock.now();

        let draft = match &target {
            Target::Post(post) => CommentDraft::on_post(post, actor.user_id, content, now)?,
            Target::Record(record) => CommentDraft::reply_to(record, actor.user_id, content, now)?,
        };

        let record = self
            .deps
            .ledger
            .append_comment(draft)
            .await
            .map_err(ApplicationError::not_found_as(kind.not_found()))?;

        info!(
            activity_id = %record.id,
            kind = %record.kind,
            target_kind = %kind,
            target_id,
            user_id = %actor.user_id,
            "comment recorded"
        );

        if let Target::Post(post) = &target {
            if !post.is_owned_by(actor.user_id) {
                let report = self
                    .deps
                    .notifier
                    .notify(
                        post.user_id,
                        Notification::new_comment(post, &record, actor, now),
                    )
                    .await;
                debug!(post_id = %post.id, delivered = report.delivered, "comment notification sent");
            }
        }

        let message = match record.kind {
            ActivityKind::Reply => "Reply added",
            _ => "Comment added",
        };
        Ok(CommentCreated {
            message: message.to_owned(),
            activity: record,
        })
    }

    pub async fn like_count(&self, kind: TargetKind, target_id: i64) -> Result<u64, ApplicationError> {
        self.resolve(kind, target_id).await?;
        let count = self
            .deps
            .activity_repository
            .count_likes(kind.target_ref(target_id))
            .await?;
        Ok(count)
    }

    /// 分页列出帖子的评论或评论的回复，按创建时间升序
    pub async fn comments_and_replies(
        &self,
        parent_id: i64,
        thread: ThreadKind,
        page: PageRequest,
    ) -> Result<Page<ActivityRecord>, ApplicationError> {
        let parent = match thread {
            ThreadKind::Comments => {
                let post = self.find_post(PostId(parent_id)).await?;
                TargetRef::Post(post.id)
            }
            ThreadKind::Replies => {
                let comment = self
                    .find_record(ActivityId(parent_id), ActivityKind::Comment)
                    .await?
                    .ok_or(DomainError::CommentNotFound)?;
                TargetRef::Activity(comment.id)
            }
        };

        let (items, total) = self
            .deps
            .activity_repository
            .list_thread(parent, page)
            .await?;
        Ok(Page::new(items, total, page))
    }

    /// 每个 IP 只计一次浏览，返回最新的帖子
    pub async fn view_once_per_ip(
        &self,
        post_id: PostId,
        ip: &ClientIp,
    ) -> Result<Post, ApplicationError> {
        let now = self.deps.clock.now();
        let post = self
            .deps
            .ledger
            .record_view(post_id, ip, now)
            .await
            .map_err(ApplicationError::not_found_as(DomainError::PostNotFound))?;
        debug!(post_id = %post.id, ip = %ip, views = post.views, "post viewed");
        Ok(post)
    }

    async fn resolve(&self, kind: TargetKind, target_id: i64) -> Result<Target, ApplicationError> {
        match kind.record_kind() {
            None => Ok(Target::Post(self.find_post(PostId(target_id)).await?)),
            Some(record_kind) => self
                .find_record(ActivityId(target_id), record_kind)
                .await?
                .map(Target::Record)
                .ok_or_else(|| kind.not_found().into()),
        }
    }

    async fn find_post(&self, id: PostId) -> Result<Post, ApplicationError> {
        self.deps
            .post_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::PostNotFound.into())
    }

    /// 判别值不符的记录视为不存在
    async fn find_record(
        &self,
        id: ActivityId,
        kind: ActivityKind,
    ) -> Result<Option<ActivityRecord>, ApplicationError> {
        let record = self.deps.activity_repository.find_by_id(id).await?;
        Ok(record.filter(|record| record.kind == kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::MemoryStorage;
    use crate::notifier::{DeliveryReport, MockNotifier};
    use chrono::Utc;
    use crate::repository::UserRepository;
    use domain::{NewPost, NewUser, NotificationKind, PasswordHash, UserEmail, UserRole};

    struct Fixture {
        storage: Arc<MemoryStorage>,
        owner: Actor,
        fan: Actor,
        post: Post,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let mut actors = Vec::new();
        for (name, email) in [("Owner", "owner@example.com"), ("Fan", "fan@example.com")] {
            let user = UserRepository::create(
                storage.as_ref(),
                NewUser::register(
                    name,
                    "Test",
                    UserEmail::parse(email).unwrap(),
                    PasswordHash::new("hash").unwrap(),
                    Utc::now(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
            actors.push(Actor::new(user.id, UserRole::User, name));
        }
        let fan = actors.pop().unwrap();
        let owner = actors.pop().unwrap();
        let post = PostRepository::create(
            storage.as_ref(),
            NewPost::new(owner.user_id, "Lake", "still water", None, Utc::now()).unwrap(),
        )
        .await
        .unwrap();
        Fixture {
            storage,
            owner,
            fan,
            post,
        }
    }

    fn service(storage: Arc<MemoryStorage>, notifier: MockNotifier) -> ActivityService {
        ActivityService::new(ActivityServiceDependencies {
            post_repository: storage.clone(),
            activity_repository: storage.clone(),
            ledger: storage,
            notifier: Arc::new(notifier),
            clock: Arc::new(SystemClock),
        })
    }

    #[tokio::test]
    async fn like_by_other_user_notifies_owner_once() {
        let fx = fixture().await;
        let owner_id = fx.owner.user_id;
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(move |user_id, notification| {
                *user_id == owner_id && notification.kind == NotificationKind::NewLike
            })
            .times(1)
            .returning(|_, _| DeliveryReport { delivered: 1, failed: 0 });
        let service = service(fx.storage, notifier);

        let added = service.toggle_like(TargetKind::Post, fx.post.id.0, &fx.fan).await.unwrap();
        assert!(added.liked);
        assert_eq!(added.like_count, 1);
        assert_eq!(added.message, "Like added");

        // 取消点赞不通知
        let removed = service.toggle_like(TargetKind::Post, fx.post.id.0, &fx.fan).await.unwrap();
        assert!(!removed.liked);
        assert_eq!(removed.like_count, 0);
        assert_eq!(removed.message, "Like removed");
    }

    #[tokio::test]
    async fn liking_own_post_sends_nothing() {
        let fx = fixture().await;
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();
        let service = service(fx.storage, notifier);

        let response = service.toggle_like(TargetKind::Post, fx.post.id.0, &fx.owner).await.unwrap();
        assert!(response.liked);
    }

    #[tokio::test]
    async fn liking_comment_keeps_post_counter_untouched() {
        let fx = fixture().await;
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| DeliveryReport::default());
        let service = service(fx.storage.clone(), notifier);

        let comment = service
            .create_comment_or_reply(TargetKind::Post, fx.post.id.0, &fx.fan, "hi".into())
            .await
            .unwrap()
            .activity;
        let response = service
            .toggle_like(TargetKind::Comment, comment.id.0, &fx.owner)
            .await
            .unwrap();

        assert_eq!(response.like_count, 1);
        assert_eq!(service.like_count(TargetKind::Comment, comment.id.0).await.unwrap(), 1);
        assert_eq!(service.like_count(TargetKind::Post, fx.post.id.0).await.unwrap(), 0);
        let post = PostRepository::find_by_id(fx.storage.as_ref(), fx.post.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.likes, 0);
    }

    #[tokio::test]
    async fn kind_mismatch_is_not_found() {
        let fx = fixture().await;
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| DeliveryReport::default());
        let service = service(fx.storage, notifier);

        let comment = service
            .create_comment_or_reply(TargetKind::Post, fx.post.id.0, &fx.fan, "hi".into())
            .await
            .unwrap()
            .activity;

        let err = service
            .toggle_like(TargetKind::Reply, comment.id.0, &fx.fan)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::ReplyNotFound)));

        let err = service
            .toggle_like(TargetKind::Post, 999, &fx.fan)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::PostNotFound)));
    }

    #[tokio::test]
    async fn comment_notifies_owner_and_reply_does_not() {
        let fx = fixture().await;
        let owner_id = fx.owner.user_id;
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(move |user_id, notification| {
                *user_id == owner_id && notification.kind == NotificationKind::NewComment
            })
            .times(1)
            .returning(|_, _| DeliveryReport { delivered: 1, failed: 0 });
        let service = service(fx.storage.clone(), notifier);

        let created = service
            .create_comment_or_reply(TargetKind::Post, fx.post.id.0, &fx.fan, "  lovely  ".into())
            .await
            .unwrap();
        assert_eq!(created.message, "Comment added");
        assert_eq!(created.activity.content.as_deref(), Some("lovely"));

        let reply = service
            .create_comment_or_reply(TargetKind::Comment, created.activity.id.0, &fx.fan, "more".into())
            .await
            .unwrap();
        assert_eq!(reply.message, "Reply added");
        assert_eq!(reply.activity.parent_id, Some(created.activity.id));

        let post = PostRepository::find_by_id(fx.storage.as_ref(), fx.post.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.comment_count, 1);
    }

    #[tokio::test]
    async fn reply_to_reply_attaches_to_root() {
        let fx = fixture().await;
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| DeliveryReport::default());
        let service = service(fx.storage, notifier);

        let root = service
            .create_comment_or_reply(TargetKind::Post, fx.post.id.0, &fx.fan, "root".into())
            .await
            .unwrap()
            .activity;
        let first = service
            .create_comment_or_reply(TargetKind::Comment, root.id.0, &fx.owner, "first".into())
            .await
            .unwrap()
            .activity;
        let nested = service
            .create_comment_or_reply(TargetKind::Reply, first.id.0, &fx.fan, "nested".into())
            .await
            .unwrap()
            .activity;

        assert_eq!(nested.parent_id, Some(root.id));
        let page = service
            .comments_and_replies(root.id.0, ThreadKind::Replies, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.meta.total_items, 2);
        assert_eq!(page.items[0].id, first.id);
        assert_eq!(page.items[1].id, nested.id);
    }

    #[tokio::test]
    async fn blank_comment_is_rejected_before_storage() {
        let fx = fixture().await;
        let service = service(fx.storage.clone(), MockNotifier::new());

        let err = service
            .create_comment_or_reply(TargetKind::Post, fx.post.id.0, &fx.fan, "   ".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { field: "content", .. })
        ));
        let page = service
            .comments_and_replies(fx.post.id.0, ThreadKind::Comments, PageRequest::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn comments_page_through_in_creation_order() {
        let fx = fixture().await;
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| DeliveryReport::default());
        let service = service(fx.storage, notifier);

        for i in 0..12 {
            service
                .create_comment_or_reply(TargetKind::Post, fx.post.id.0, &fx.fan, format!("c{i}"))
                .await
                .unwrap();
        }

        let third = service
            .comments_and_replies(fx.post.id.0, ThreadKind::Comments, PageRequest::new(3, 5))
            .await
            .unwrap();
        assert_eq!(third.meta.total_items, 12);
        assert_eq!(third.meta.total_pages, 3);
        let contents: Vec<_> = third
            .items
            .iter()
            .map(|record| record.content.clone().unwrap())
            .collect();
        assert_eq!(contents, vec!["c10", "c11"]);

        let err = service
            .comments_and_replies(999, ThreadKind::Comments, PageRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::PostNotFound)));
    }

    #[tokio::test]
    async fn views_are_counted_once_per_ip() {
        let fx = fixture().await;
        let service = service(fx.storage, MockNotifier::new());
        let ip = ClientIp::new("192.0.2.1");

        assert_eq!(service.view_once_per_ip(fx.post.id, &ip).await.unwrap().views, 1);
        assert_eq!(service.view_once_per_ip(fx.post.id, &ip).await.unwrap().views, 1);

        let err = service
            .view_once_per_ip(PostId(404), &ip)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::PostNotFound)));
    }
}
