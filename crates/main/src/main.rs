//! 主应用程序入口
//!
//! 加载配置、连接数据库、组装服务并启动 Axum Web API。

use std::{net::SocketAddr, sync::Arc};

use application::{
    ActivityService, ActivityServiceDependencies, Clock, PostService, PostServiceDependencies,
    SessionBroadcaster, SessionNotifier, SessionRegistry, SystemClock, UserService,
    UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(database = config.database.redacted_url(), "连接数据库");

    let infrastructure = Infrastructure::connect(InfrastructureConfig::from(&config)).await?;
    let storage = infrastructure.storage.clone();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(SessionRegistry::new(config.realtime.outbound_buffer));

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let user_service = UserService::new(UserServiceDependencies {
        user_repository: storage.user_repository.clone(),
        password_hasher: infrastructure.password_hasher.clone(),
        token_issuer: jwt_service.clone(),
        clock: clock.clone(),
    });

    let post_service = PostService::new(PostServiceDependencies {
        post_repository: storage.post_repository.clone(),
        broadcaster: Arc::new(SessionBroadcaster::new(sessions.clone())),
        clock: clock.clone(),
    });

    let activity_service = ActivityService::new(ActivityServiceDependencies {
        post_repository: storage.post_repository.clone(),
        activity_repository: storage.activity_repository.clone(),
        ledger: storage.ledger.clone(),
        notifier: Arc::new(SessionNotifier::new(sessions.clone())),
        clock: clock.clone(),
    });

    let state = AppState::new(
        Arc::new(user_service),
        Arc::new(post_service),
        Arc::new(activity_service),
        jwt_service,
        sessions,
        clock,
    )
    .with_trusted_proxies(config.server.trusted_proxies.clone());

    let app = router(state, &config.server.cors_origins);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("服务器启动在 http://{}", address);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("收到退出信号，停止服务");
}
