//! JWT 认证模块
//!
//! 签发与校验访问令牌和刷新令牌；同一个 [`JwtService`] 同时服务 HTTP Bearer 鉴权
//! 和 WebSocket 准入（通过 [`TokenVerifier`]），并作为 [`TokenIssuer`] 供登录与刷新使用。

use application::{TokenError, TokenIssuer, TokenPair, TokenVerifier};
use axum::http::{header, HeaderMap};
use config::JwtConfig;
use domain::{Actor, User, UserId, UserRole};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i64,
    pub role: UserRole,
    pub name: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 刷新令牌只携带用户；`jti` 保证每次签发的令牌都不同
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub user_id: i64,
    pub jti: String,
    pub exp: i64,
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Actor::new(UserId(claims.user_id), claims.role, claims.name)
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());
        let refresh_encoding_key = EncodingKey::from_secret(config.refresh_secret.as_ref());
        let refresh_decoding_key = DecodingKey::from_secret(config.refresh_secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
            refresh_encoding_key,
            refresh_decoding_key,
        }
    }

    /// 生成访问令牌
    pub fn generate_token(&self, user: &User) -> Result<String, TokenError> {
        let claims = Claims {
            user_id: user.id.0,
            role: user.role,
            name: user.name.clone(),
            exp: expires_at(self.config.expiration_minutes),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, user_id = %user.id, "token generation failed");
            TokenError::Signing(err.to_string())
        })
    }

    /// 生成刷新令牌，使用独立的密钥和有效期
    pub fn generate_refresh_token(&self, user_id: UserId) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            user_id: user_id.0,
            jti: uuid::Uuid::new_v4().to_string(),
            exp: expires_at(self.config.refresh_expiration_minutes),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding_key).map_err(
            |err| {
                tracing::error!(error = %err, %user_id, "refresh token generation failed");
                TokenError::Signing(err.to_string())
            },
        )
    }

    /// 验证并解析访问令牌
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|token_data| token_data.claims)
            .map_err(token_error)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(
            token,
            &self.refresh_decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map(|token_data| token_data.claims)
        .map_err(token_error)
    }

    /// 从 `Authorization: Bearer` 头中取出调用者。
    /// 缺失返回 401，无效或过期返回 403。
    pub fn extract_actor_from_headers(&self, headers: &HeaderMap) -> Result<Actor, ApiError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        self.verify_token(token).map(Actor::from).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            ApiError::forbidden("Invalid token")
        })
    }
}

fn expires_at(minutes: i64) -> i64 {
    (chrono::Utc::now() + chrono::Duration::minutes(minutes)).timestamp()
}

fn token_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed(err.to_string()),
    }
}

impl TokenVerifier for JwtService {
    fn verify(&self, token: &str) -> Result<Actor, TokenError> {
        self.verify_token(token).map(Actor::from)
    }
}

impl TokenIssuer for JwtService {
    fn issue_access(&self, user: &User) -> Result<String, TokenError> {
        self.generate_token(user)
    }

    fn issue_refresh(&self, user_id: UserId) -> Result<String, TokenError> {
        self.generate_refresh_token(user_id)
    }

    fn verify_refresh(&self, token: &str) -> Result<UserId, TokenError> {
        self.verify_refresh_token(token)
            .map(|claims| UserId(claims.user_id))
    }
}

/// 登录响应结构
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: User,
}
