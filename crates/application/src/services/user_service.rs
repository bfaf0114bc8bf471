use std::sync::Arc;

use domain::{
    Actor, DomainError, NewUser, RepositoryError, User, UserEmail, UserId, UserStatus,
};
use tracing::{info, warn};

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::{check_plaintext, PasswordHasher},
    repository::UserRepository,
    tokens::{RefreshTokenError, TokenIssuer, TokenPair},
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub name: String,
    pub surname: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub email: String,
    pub password: String,
}

/// 缺省或空白字段保持原值；修改密码时两次输入必须一致
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

/// 登录成功后的用户与令牌
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: TokenPair,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub token_issuer: Arc<dyn TokenIssuer>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email)?;
        check_plaintext(&request.password)?;

        if self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .is_some()
        {
            return Err(DomainError::UserAlreadyExists.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let user = NewUser::register(
            request.name,
            request.surname,
            email,
            password_hash,
            self.deps.clock.now(),
        )?;

        let stored = self
            .deps
            .user_repository
            .create(user)
            .await
            .map_err(conflict_as_duplicate)?;
        info!(user_id = %stored.id, "user registered");
        Ok(stored)
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email).map_err(|_| ApplicationError::Authentication)?;
        let user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .ok_or(ApplicationError::Authentication)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            warn!(user_id = %user.id, "login with wrong password");
            return Err(ApplicationError::Authentication);
        }

        if user.status != UserStatus::Active {
            warn!(user_id = %user.id, "login to inactive account");
            return Err(ApplicationError::Authentication);
        }

        Ok(user)
    }

    /// 校验凭据并签发新的令牌对，保存刷新令牌
    pub async fn login(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<LoginOutcome, ApplicationError> {
        let user = self.authenticate(request).await?;
        let tokens = self.issue_pair(&user)?;
        self.deps
            .user_repository
            .store_refresh_token(user.id, &tokens.refresh_token)
            .await?;
        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome { user, tokens })
    }

    /// 用刷新令牌换发新的令牌对，旧的刷新令牌不能再次使用
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApplicationError> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(RefreshTokenError::Missing.into());
        }

        let user_id = self
            .deps
            .token_issuer
            .verify_refresh(refresh_token)
            .map_err(RefreshTokenError::from)?;
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .filter(|user| user.status == UserStatus::Active)
            .ok_or(RefreshTokenError::Invalid)?;

        let tokens = self.issue_pair(&user)?;
        let rotated = self
            .deps
            .user_repository
            .rotate_refresh_token(user.id, refresh_token, &tokens.refresh_token)
            .await?;
        if !rotated {
            warn!(user_id = %user.id, "stale refresh token presented");
            return Err(RefreshTokenError::Invalid.into());
        }

        info!(user_id = %user.id, "tokens refreshed");
        Ok(tokens)
    }

    fn issue_pair(&self, user: &User) -> Result<TokenPair, ApplicationError> {
        let issuer = &self.deps.token_issuer;
        Ok(TokenPair {
            access_token: issuer
                .issue_access(user)
                .map_err(ApplicationError::TokenIssuance)?,
            refresh_token: issuer
                .issue_refresh(user.id)
                .map_err(ApplicationError::TokenIssuance)?,
        })
    }

    pub async fn profile(&self, user_id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        request: UpdateProfileRequest,
    ) -> Result<User, ApplicationError> {
        let mut user = self.profile(user_id).await?;
        let now = self.deps.clock.now();

        let email = match request.email.filter(|value| !value.trim().is_empty()) {
            Some(value) => Some(UserEmail::parse(value)?),
            None => None,
        };
        user.update_profile(request.name, request.surname, email, now)?;

        if let Some(password) = request.password.filter(|value| !value.is_empty()) {
            if request.confirm_password.as_deref() != Some(password.as_str()) {
                return Err(DomainError::invalid_argument(
                    "confirmPassword",
                    "passwords do not match",
                )
                .into());
            }
            check_plaintext(&password)?;
            let hash = self.deps.password_hasher.hash(&password).await?;
            user.set_password(hash, now);
        }

        let updated = self
            .deps
            .user_repository
            .update(user)
            .await
            .map_err(conflict_as_duplicate)?;
        info!(user_id = %updated.id, "profile updated");
        Ok(updated)
    }

    /// 仅管理员可用
    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<User>, ApplicationError> {
        if !actor.is_admin() {
            return Err(ApplicationError::Authorization);
        }
        Ok(self.deps.user_repository.list().await?)
    }
}

fn conflict_as_duplicate(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::Conflict => DomainError::UserAlreadyExists.into(),
        RepositoryError::NotFound => DomainError::UserNotFound.into(),
        other => other.into(),
    }
}
