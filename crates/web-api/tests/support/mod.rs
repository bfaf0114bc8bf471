#![allow(dead_code)]

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use application::{
    ActivityService, ActivityServiceDependencies, MemoryStorage, PasswordHasher,
    PasswordHasherError, PostService, PostServiceDependencies, SessionBroadcaster,
    SessionNotifier, SessionRegistry, SystemClock, UserRepository, UserService,
    UserServiceDependencies,
};
use async_trait::async_trait;
use domain::{NewUser, PasswordHash, UserEmail, UserRole};
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 测试中不跑 bcrypt
struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::Hashing(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

pub struct TestUser {
    pub id: i64,
    pub token: String,
    pub refresh_token: String,
}

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "integration-test-secret-at-least-32-bytes".to_string(),
        expiration_minutes: 10,
        refresh_secret: "integration-refresh-secret-at-least-32-bytes".to_string(),
        refresh_expiration_minutes: 60,
    }
}

/// 基于内存存储启动的完整服务
pub struct TestServer {
    pub addr: SocketAddr,
    pub storage: Arc<MemoryStorage>,
    pub sessions: Arc<SessionRegistry>,
    pub jwt: Arc<JwtService>,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// 直接面向客户端，不信任任何转发头
    pub async fn spawn() -> Self {
        Self::spawn_with_proxies(Vec::new()).await
    }

    /// 本机视为反向代理，测试可以通过转发头模拟不同的客户端
    pub async fn spawn_behind_proxy() -> Self {
        Self::spawn_with_proxies(vec![IpAddr::from([127, 0, 0, 1])]).await
    }

    async fn spawn_with_proxies(trusted_proxies: Vec<IpAddr>) -> Self {
        let jwt = Arc::new(JwtService::new(jwt_config()));
        let storage = Arc::new(MemoryStorage::new());
        let sessions = Arc::new(SessionRegistry::new(16));
        let clock = Arc::new(SystemClock);

        let user_service = UserService::new(UserServiceDependencies {
            user_repository: storage.clone(),
            password_hasher: Arc::new(PlainHasher),
            token_issuer: jwt.clone(),
            clock: clock.clone(),
        });
        let post_service = PostService::new(PostServiceDependencies {
            post_repository: storage.clone(),
            broadcaster: Arc::new(SessionBroadcaster::new(sessions.clone())),
            clock: clock.clone(),
        });
        let activity_service = ActivityService::new(ActivityServiceDependencies {
            post_repository: storage.clone(),
            activity_repository: storage.clone(),
            ledger: storage.clone(),
            notifier: Arc::new(SessionNotifier::new(sessions.clone())),
            clock: clock.clone(),
        });
        let state = AppState::new(
            Arc::new(user_service),
            Arc::new(post_service),
            Arc::new(activity_service),
            jwt.clone(),
            sessions.clone(),
            clock,
        )
        .with_trusted_proxies(trusted_proxies);
        let app = router(state, &["*".to_string()]);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
        });

        Self {
            addr,
            storage,
            sessions,
            jwt,
            client: Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// 通过 HTTP 注册并登录
    pub async fn signup(&self, name: &str) -> TestUser {
        let email = format!("{}@example.com", name.to_lowercase());
        let response = self
            .client
            .post(self.url("/api/users/register"))
            .json(&json!({
                "name": name,
                "surname": "Tester",
                "email": email,
                "password": "secret-pass",
            }))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 201);

        let login: Value = self
            .client
            .post(self.url("/api/users/login"))
            .json(&json!({ "email": email, "password": "secret-pass" }))
            .send()
            .await
            .expect("login")
            .json()
            .await
            .expect("login json");

        TestUser {
            id: login["user"]["id"].as_i64().expect("user id"),
            token: login["accessToken"].as_str().expect("token").to_string(),
            refresh_token: login["refreshToken"]
                .as_str()
                .expect("refresh token")
                .to_string(),
        }
    }

    /// 管理员无法通过注册产生，直接写入存储
    pub async fn seed_admin(&self) -> TestUser {
        let mut new_user = NewUser::register(
            "Root",
            "Admin",
            UserEmail::parse("root@example.com").unwrap(),
            PasswordHash::new("plain:secret-pass").unwrap(),
            chrono::Utc::now(),
        )
        .unwrap();
        new_user.role = UserRole::Admin;
        let user = UserRepository::create(self.storage.as_ref(), new_user)
            .await
            .unwrap();

        TestUser {
            id: user.id.0,
            token: self.jwt.generate_token(&user).unwrap(),
            refresh_token: String::new(),
        }
    }

    pub async fn create_post(&self, author: &TestUser, label: &str) -> Value {
        let response = self
            .client
            .post(self.url("/api/posts"))
            .bearer_auth(&author.token)
            .json(&json!({ "label": label, "text": "posted from tests", "file": "uploads/a.png" }))
            .send()
            .await
            .expect("create post");
        assert_eq!(response.status(), 201);
        response.json().await.expect("post json")
    }

    pub async fn connect(&self, user: &TestUser) -> WsStream {
        let (mut ws, _) = connect_async(self.ws_url(Some(&user.token)))
            .await
            .expect("ws connect");
        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "welcome");
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// 读取下一条文本消息并解析为 JSON
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for websocket message")
            .expect("websocket closed")
            .expect("websocket error");
        if let TungsteniteMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("notification json");
        }
    }
}

/// 在给定时间内没有任何文本消息
pub async fn expect_silence(ws: &mut WsStream, millis: u64) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) =
        timeout(Duration::from_millis(millis), ws.next()).await
    {
        panic!("unexpected notification: {}", text.as_str());
    }
}

/// 轮询直到注册表中的连接数达到预期
pub async fn wait_for_connections(sessions: &SessionRegistry, expected: usize) {
    for _ in 0..50 {
        if sessions.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sessions.connection_count().await, expected);
}
