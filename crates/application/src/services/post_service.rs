use std::sync::Arc;

use domain::{Actor, DomainError, NewPost, Notification, Post, PostChanges, PostId};
use tracing::{debug, info};

use crate::{
    broadcaster::Broadcaster, clock::Clock, error::ApplicationError, repository::PostRepository,
};

#[derive(Debug, Clone)]
pub struct CreatePostRequest {
    pub label: String,
    pub text: String,
    pub file: Option<String>,
}

pub struct PostServiceDependencies {
    pub post_repository: Arc<dyn PostRepository>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub clock: Arc<dyn Clock>,
}

pub struct PostService {
    deps: PostServiceDependencies,
}

impl PostService {
    pub fn new(deps: PostServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn list_posts(&self) -> Result<Vec<Post>, ApplicationError> {
        Ok(self.deps.post_repository.list().await?)
    }

    /// 创建后向所有在线连接广播 `new_post`
    pub async fn create_post(
        &self,
        actor: &Actor,
        request: CreatePostRequest,
    ) -> Result<Post, ApplicationError> {
        let now = self.deps.clock.now();
        let draft = NewPost::new(actor.user_id, request.label, request.text, request.file, now)?;
        let post = self.deps.post_repository.create(draft).await?;
        info!(post_id = %post.id, user_id = %actor.user_id, "post created");

        let report = self
            .deps
            .broadcaster
            .broadcast_all(Notification::new_post(&post, now))
            .await;
        debug!(post_id = %post.id, delivered = report.delivered, failed = report.failed, "new post broadcast");

        Ok(post)
    }

    pub async fn update_post(
        &self,
        actor: &Actor,
        post_id: PostId,
        changes: PostChanges,
    ) -> Result<Post, ApplicationError> {
        let mut post = self
            .deps
            .post_repository
            .find_by_id(post_id)
            .await?
            .ok_or(DomainError::PostNotFound)?;

        if !post.can_be_edited_by(actor) {
            return Err(DomainError::InsufficientPermissions.into());
        }

        post.apply_changes(changes, self.deps.clock.now())?;
        let updated = self
            .deps
            .post_repository
            .update_content(&post)
            .await
            .map_err(ApplicationError::not_found_as(DomainError::PostNotFound))?;
        info!(post_id = %updated.id, user_id = %actor.user_id, "post updated");
        Ok(updated)
    }
}
