//! 登录令牌签发
//!
//! 登录返回一对令牌：短期的访问令牌和长期的刷新令牌。刷新令牌保存在用户上，
//! 每次刷新都换发新的一对，旧的刷新令牌随即失效。

use domain::{User, UserId};
use serde::Serialize;
use thiserror::Error;

use crate::gate::TokenError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait TokenIssuer: Send + Sync {
    fn issue_access(&self, user: &User) -> Result<String, TokenError>;
    fn issue_refresh(&self, user_id: UserId) -> Result<String, TokenError>;
    fn verify_refresh(&self, token: &str) -> Result<UserId, TokenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RefreshTokenError {
    #[error("Refresh token is required")]
    Missing,
    #[error("Invalid refresh token")]
    Invalid,
    #[error("Refresh token expired")]
    Expired,
}

impl From<TokenError> for RefreshTokenError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => RefreshTokenError::Expired,
            TokenError::Malformed(_) | TokenError::Signing(_) => RefreshTokenError::Invalid,
        }
    }
}
