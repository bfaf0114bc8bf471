use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::user::Actor;
use crate::value_objects::{PostId, Timestamp, UserId};

const MAX_LABEL_LEN: usize = 255;

/// 图片帖子。`likes`、`comment_count`、`views` 是派生计数，
/// 只能随互动记录的创建/删除在同一事务内调整。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    pub label: String,
    pub text: String,
    pub file: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub comment_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Post {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// 只有作者或管理员可以编辑
    pub fn can_be_edited_by(&self, actor: &Actor) -> bool {
        actor.is_admin() || self.is_owned_by(actor.user_id)
    }

    /// 应用编辑，空白字段保持原值
    pub fn apply_changes(&mut self, changes: PostChanges, now: Timestamp) -> Result<(), DomainError> {
        if let Some(label) = changes.label.filter(|v| !v.trim().is_empty()) {
            self.label = parse_label(label)?;
        }
        if let Some(text) = changes.text.filter(|v| !v.trim().is_empty()) {
            self.text = text;
        }
        if let Some(file) = changes.file.filter(|v| !v.trim().is_empty()) {
            self.file = Some(file);
        }
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostChanges {
    pub label: Option<String>,
    pub text: Option<String>,
    pub file: Option<String>,
}

/// 尚未持久化的帖子，计数从零开始。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub user_id: UserId,
    pub label: String,
    pub text: String,
    pub file: Option<String>,
    pub created_at: Timestamp,
}

impl NewPost {
    pub fn new(
        user_id: UserId,
        label: impl Into<String>,
        text: impl Into<String>,
        file: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(DomainError::invalid_argument("text", "cannot be empty"));
        }
        Ok(Self {
            user_id,
            label: parse_label(label.into())?,
            text,
            file: file.filter(|v| !v.trim().is_empty()),
            created_at: now,
        })
    }
}

fn parse_label(value: String) -> Result<String, DomainError> {
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(DomainError::invalid_argument("label", "cannot be empty"));
    }
    if value.chars().count() > MAX_LABEL_LEN {
        return Err(DomainError::invalid_argument("label", "too long"));
    }
    Ok(value)
}
