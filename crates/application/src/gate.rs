//! WebSocket 准入校验
//!
//! 连接在注册进 [`SessionRegistry`](crate::session::SessionRegistry) 之前必须
//! 出示有效令牌。被拒绝的连接以策略违规（1008）关闭，并附带原因文本。

use std::sync::Arc;

use domain::Actor;
use thiserror::Error;
use tracing::warn;

/// RFC 6455 的 Policy Violation 关闭码
pub const POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// 令牌校验器，HTTP 鉴权与 WebSocket 准入共用
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Actor, TokenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("Authentication required")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
}

impl GateRejection {
    pub fn close_code(&self) -> u16 {
        POLICY_VIOLATION
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GateRejection::MissingToken => "Authentication required",
            GateRejection::InvalidToken => "Invalid token",
        }
    }
}

#[derive(Clone)]
pub struct TokenGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl TokenGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// 空白令牌与缺失等同
    pub fn check(&self, token: Option<&str>) -> Result<Actor, GateRejection> {
        let token = match token.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => {
                warn!("websocket handshake without token");
                return Err(GateRejection::MissingToken);
            }
        };

        self.verifier.verify(token).map_err(|err| {
            warn!(error = %err, "websocket handshake with invalid token");
            GateRejection::InvalidToken
        })
    }
}
