//! 服务端推送给 WebSocket 客户端的通知
//!
//! 线上格式：`{ "type", "message", "data", "timestamp" }`，timestamp 为 RFC 3339。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::activity::ActivityRecord;
use crate::post::Post;
use crate::user::Actor;
use crate::value_objects::{Timestamp, UserId};

const EXCERPT_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    NewLike,
    NewComment,
    NewPost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub data: Value,
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn welcome(user_id: UserId, now: Timestamp) -> Self {
        Self {
            kind: NotificationKind::Welcome,
            message: "Welcome to the WebSocket server!".to_owned(),
            data: json!({ "userId": user_id }),
            timestamp: now,
        }
    }

    pub fn new_like(post: &Post, liked_by: &Actor, now: Timestamp) -> Self {
        Self {
            kind: NotificationKind::NewLike,
            message: "Your post received a new like!".to_owned(),
            data: json!({
                "postId": post.id,
                "likedBy": {
                    "userId": liked_by.user_id,
                    "username": liked_by.name,
                },
            }),
            timestamp: now,
        }
    }

    pub fn new_comment(
        post: &Post,
        comment: &ActivityRecord,
        commented_by: &Actor,
        now: Timestamp,
    ) -> Self {
        let excerpt = excerpt(comment.content.as_deref().unwrap_or_default());
        Self {
            kind: NotificationKind::NewComment,
            message: format!("Your post received a new comment: \"{}\"", excerpt),
            data: json!({
                "postId": post.id,
                "commentId": comment.id,
                "excerpt": excerpt,
                "commentedBy": {
                    "userId": commented_by.user_id,
                    "username": commented_by.name,
                },
            }),
            timestamp: now,
        }
    }

    pub fn new_post(post: &Post, now: Timestamp) -> Self {
        Self {
            kind: NotificationKind::NewPost,
            message: format!("New post: {}", post.label),
            data: json!({
                "postId": post.id,
                "label": post.label,
                "authorId": post.user_id,
            }),
            timestamp: now,
        }
    }
}

fn excerpt(content: &str) -> String {
    if content.chars().count() <= EXCERPT_LEN {
        content.to_owned()
    } else {
        let mut cut: String = content.chars().take(EXCERPT_LEN).collect();
        cut.push('…');
        cut
    }
}
