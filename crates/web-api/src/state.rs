use std::{net::IpAddr, sync::Arc};

use application::{
    ActivityService, Clock, PostService, SessionRegistry, TokenGate, UserService,
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub post_service: Arc<PostService>,
    pub activity_service: Arc<ActivityService>,
    pub jwt_service: Arc<JwtService>,
    pub token_gate: TokenGate,
    pub sessions: Arc<SessionRegistry>,
    pub clock: Arc<dyn Clock>,
    /// 允许设置转发头的反向代理地址
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl AppState {
    /// WebSocket 准入与 HTTP 鉴权共用同一个 JWT 服务
    pub fn new(
        user_service: Arc<UserService>,
        post_service: Arc<PostService>,
        activity_service: Arc<ActivityService>,
        jwt_service: Arc<JwtService>,
        sessions: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let token_gate = TokenGate::new(jwt_service.clone());
        Self {
            user_service,
            post_service,
            activity_service,
            jwt_service,
            token_gate,
            sessions,
            clock,
            trusted_proxies: Arc::from(Vec::new()),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }
}
