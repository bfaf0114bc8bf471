use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(DomainError::invalid_argument(
                "role",
                format!("unknown role '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub surname: String,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// 空白字段保持原值
    pub fn update_profile(
        &mut self,
        name: Option<String>,
        surname: Option<String>,
        email: Option<UserEmail>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if let Some(name) = non_blank(name) {
            self.name = parse_name("name", name)?;
        }
        if let Some(surname) = non_blank(surname) {
            self.surname = parse_name("surname", surname)?;
        }
        if let Some(email) = email {
            self.email = email;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn set_password(&mut self, password: PasswordHash, now: Timestamp) {
        self.password = password;
        self.updated_at = now;
    }
}

/// 尚未持久化的用户，ID 由存储层分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub surname: String,
    pub email: UserEmail,
    pub password: PasswordHash,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: Timestamp,
}

impl NewUser {
    /// 注册即激活，角色默认为普通用户
    pub fn register(
        name: impl Into<String>,
        surname: impl Into<String>,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            name: parse_name("name", name.into())?,
            surname: parse_name("surname", surname.into())?,
            email,
            password,
            role: UserRole::User,
            status: UserStatus::Active,
            created_at: now,
        })
    }
}

/// 通过令牌认证的请求发起者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: UserRole,
    pub name: String,
}

impl Actor {
    pub fn new(user_id: UserId, role: UserRole, name: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            name: name.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_name(field: &'static str, value: String) -> Result<String, DomainError> {
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(DomainError::invalid_argument(field, "cannot be empty"));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::invalid_argument(field, "too long"));
    }
    Ok(value)
}
