//! 互动记录：点赞、评论、回复、浏览
//!
//! 所有互动共享一张表，通过 `kind` 区分。评论/回复之间的父子关系只通过
//! [`ActivityId`] 引用，回复永远挂在根评论下，不会形成多层嵌套。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::post::Post;
use crate::value_objects::{ActivityId, PostId, Timestamp, UserId};

const MAX_CONTENT_LEN: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Like,
    Comment,
    Reply,
    View,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Like => "like",
            ActivityKind::Comment => "comment",
            ActivityKind::Reply => "reply",
            ActivityKind::View => "view",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "like" => Ok(ActivityKind::Like),
            "comment" => Ok(ActivityKind::Comment),
            "reply" => Ok(ActivityKind::Reply),
            "view" => Ok(ActivityKind::View),
            other => Err(DomainError::invalid_argument(
                "kind",
                format!("unknown activity kind '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: ActivityId,
    pub kind: ActivityKind,
    /// 浏览记录是匿名的，其余种类都有作者
    pub user_id: Option<UserId>,
    pub post_id: Option<PostId>,
    pub parent_id: Option<ActivityId>,
    #[serde(skip)]
    pub ip: Option<String>,
    pub content: Option<String>,
    /// 仅评论/回复维护，等于指向它的 like 记录数
    pub like_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ActivityRecord {
    /// 回复一条记录时新回复应挂载的根评论
    pub fn root_comment_id(&self) -> Option<ActivityId> {
        match self.kind {
            ActivityKind::Comment => Some(self.id),
            ActivityKind::Reply => self.parent_id,
            ActivityKind::Like | ActivityKind::View => None,
        }
    }
}

/// 可以被点赞、评论的目标种类。
///
/// 每个变体自带存储中的判别值和点赞记录使用的外键列，
/// 调用方不再按字符串分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Post,
    Comment,
    Reply,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::Comment => "comment",
            TargetKind::Reply => "reply",
        }
    }

    /// 目标记录在 activities 表中的判别值，帖子不在该表中
    pub fn record_kind(&self) -> Option<ActivityKind> {
        match self {
            TargetKind::Post => None,
            TargetKind::Comment => Some(ActivityKind::Comment),
            TargetKind::Reply => Some(ActivityKind::Reply),
        }
    }

    pub fn target_ref(&self, id: i64) -> TargetRef {
        match self {
            TargetKind::Post => TargetRef::Post(PostId(id)),
            TargetKind::Comment | TargetKind::Reply => TargetRef::Activity(ActivityId(id)),
        }
    }

    pub fn not_found(&self) -> DomainError {
        match self {
            TargetKind::Post => DomainError::PostNotFound,
            TargetKind::Comment => DomainError::CommentNotFound,
            TargetKind::Reply => DomainError::ReplyNotFound,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "post" => Ok(TargetKind::Post),
            "comment" => Ok(TargetKind::Comment),
            "reply" => Ok(TargetKind::Reply),
            _ => Err(DomainError::invalid_argument(
                "type",
                r#"valid types are "post", "comment", "reply""#,
            )),
        }
    }
}

/// 已解析的目标引用，同时用作单目标串行化的锁键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Post(PostId),
    Activity(ActivityId),
}

impl TargetRef {
    /// like 记录中引用该目标的列
    pub fn like_column(&self) -> &'static str {
        match self {
            TargetRef::Post(_) => "post_id",
            TargetRef::Activity(_) => "parent_id",
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            TargetRef::Post(id) => id.0,
            TargetRef::Activity(id) => id.0,
        }
    }
}

/// 分页列表的种类：帖子下的评论，或评论下的回复。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKind {
    Comments,
    Replies,
}

impl ThreadKind {
    /// 挂在帖子下的是评论，挂在评论下的是回复
    pub fn under(parent: TargetRef) -> Self {
        match parent {
            TargetRef::Post(_) => ThreadKind::Comments,
            TargetRef::Activity(_) => ThreadKind::Replies,
        }
    }

    pub fn record_kind(&self) -> ActivityKind {
        match self {
            ThreadKind::Comments => ActivityKind::Comment,
            ThreadKind::Replies => ActivityKind::Reply,
        }
    }
}

impl FromStr for ThreadKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "comment" => Ok(ThreadKind::Comments),
            "reply" => Ok(ThreadKind::Replies),
            _ => Err(DomainError::invalid_argument(
                "type",
                r#"valid types are "comment", "reply""#,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeOutcome {
    Added,
    Removed,
}

impl LikeOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            LikeOutcome::Added => "Like added",
            LikeOutcome::Removed => "Like removed",
        }
    }
}

/// 一次点赞切换的结果，`like_count` 为事务提交后的计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeToggle {
    pub outcome: LikeOutcome,
    pub like_count: i64,
}

/// 待写入的评论或回复。创建时即完成父引用规范化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub kind: ActivityKind,
    pub user_id: UserId,
    pub post_id: Option<PostId>,
    pub parent_id: Option<ActivityId>,
    pub content: String,
    pub created_at: Timestamp,
}

impl CommentDraft {
    pub fn on_post(
        post: &Post,
        author: UserId,
        content: impl Into<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            kind: ActivityKind::Comment,
            user_id: author,
            post_id: Some(post.id),
            parent_id: None,
            content: parse_content(content.into())?,
            created_at: now,
        })
    }

    /// 回复一条回复时继承其根评论，回复永远只有一层
    pub fn reply_to(
        target: &ActivityRecord,
        author: UserId,
        content: impl Into<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let root = target.root_comment_id().ok_or(DomainError::CommentNotFound)?;
        Ok(Self {
            kind: ActivityKind::Reply,
            user_id: author,
            post_id: target.post_id,
            parent_id: Some(root),
            content: parse_content(content.into())?,
            created_at: now,
        })
    }

    /// 需要调整计数的帖子：只有直接评论帖子时才增加 commentCount
    pub fn counted_post(&self) -> Option<PostId> {
        match self.kind {
            ActivityKind::Comment => self.post_id,
            _ => None,
        }
    }
}

fn parse_content(value: String) -> Result<String, DomainError> {
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(DomainError::invalid_argument("content", "cannot be empty"));
    }
    if value.chars().count() > MAX_CONTENT_LEN {
        return Err(DomainError::invalid_argument("content", "too long"));
    }
    Ok(value)
}
