use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::gate::TokenError;
use crate::password::PasswordHasherError;
use crate::tokens::RefreshTokenError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("authentication failed")]
    Authentication,
    #[error("authorization failed")]
    Authorization,
    #[error("refresh rejected: {0}")]
    RefreshToken(#[from] RefreshTokenError),
    #[error("token issuance failed: {0}")]
    TokenIssuance(TokenError),
}

impl ApplicationError {
    /// 存储层的 NotFound 转换为指定的领域错误，其余保持不变
    pub(crate) fn not_found_as(
        not_found: DomainError,
    ) -> impl FnOnce(RepositoryError) -> ApplicationError {
        move |err| match err {
            RepositoryError::NotFound => ApplicationError::Domain(not_found),
            other => ApplicationError::Repository(other),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
