use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, Extensions, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use application::{
    AuthenticateUserRequest, CommentCreated, CreatePostRequest, LoginOutcome,
    RegisterUserRequest, ToggleLikeResponse, TokenPair, UpdateProfileRequest,
};
use domain::{
    ActivityRecord, DomainError, Page, PageRequest, Post, PostChanges, PostId, TargetKind,
    ThreadKind, User,
};

use crate::{
    auth::LoginResponse, client_ip::client_ip, error::ApiError, state::AppState,
    ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    name: String,
    surname: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfilePayload {
    name: Option<String>,
    surname: Option<String>,
    email: Option<String>,
    password: Option<String>,
    confirm_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatePostPayload {
    label: String,
    text: String,
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatePostPayload {
    label: Option<String>,
    text: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    content: String,
}

/// 非法的分页参数回退到默认值，因此按原始字符串接收
#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LikeCountResponse {
    like_count: u64,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register_user))
        .route("/users/login", post(login_user))
        .route("/users/refresh", post(refresh_tokens))
        .route("/users/me", get(get_profile).put(update_profile))
        .route("/users", get(list_users))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(view_post).put(update_post))
        .route("/activity/{kind}/{id}/like", post(toggle_like))
        .route("/activity/{kind}/{id}/comment", post(create_comment))
        .route("/activity/{kind}/{id}/likeCount", get(like_count))
        // 实际顺序为 /{parentId}/{type}/comments，同一位置的路由参数必须同名
        .route("/activity/{kind}/{id}/comments", get(list_thread))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| DomainError::invalid_argument("id", "must be an integer").into())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            name: payload.name,
            surname: payload.surname,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let LoginOutcome { user, tokens } = state
        .user_service
        .login(AuthenticateUserRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok(Json(LoginResponse { tokens, user }))
}

async fn refresh_tokens(
    State(state): State<AppState>,
    Json(payload): Json<RefreshPayload>,
) -> Result<Json<TokenPair>, ApiError> {
    let refresh_token = payload.refresh_token.unwrap_or_default();
    Ok(Json(state.user_service.refresh(&refresh_token).await?))
}

async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    Ok(Json(state.user_service.profile(actor.user_id).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfilePayload>,
) -> Result<Json<User>, ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    let user = state
        .user_service
        .update_profile(
            actor.user_id,
            UpdateProfileRequest {
                name: payload.name,
                surname: payload.surname,
                email: payload.email,
                password: payload.password,
                confirm_password: payload.confirm_password,
            },
        )
        .await?;

    Ok(Json(user))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    Ok(Json(state.user_service.list_users(&actor).await?))
}

async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, ApiError> {
    Ok(Json(state.post_service.list_posts().await?))
}

async fn view_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Json<Post>, ApiError> {
    let post_id = PostId(parse_id(&id)?);
    let ip = client_ip(&headers, &extensions, &state.trusted_proxies);
    Ok(Json(state.activity_service.view_once_per_ip(post_id, &ip).await?))
}

async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePostPayload>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    let post = state
        .post_service
        .create_post(
            &actor,
            CreatePostRequest {
                label: payload.label,
                text: payload.text,
                file: payload.file,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePostPayload>,
) -> Result<Json<Post>, ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    let post_id = PostId(parse_id(&id)?);
    let post = state
        .post_service
        .update_post(
            &actor,
            post_id,
            PostChanges {
                label: payload.label,
                text: payload.text,
                file: payload.file,
            },
        )
        .await?;

    Ok(Json(post))
}

async fn toggle_like(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ToggleLikeResponse>, ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    let kind: TargetKind = kind.parse()?;
    let response = state
        .activity_service
        .toggle_like(kind, parse_id(&id)?, &actor)
        .await?;

    Ok(Json(response))
}

async fn create_comment(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<CommentPayload>,
) -> Result<(StatusCode, Json<CommentCreated>), ApiError> {
    let actor = state.jwt_service.extract_actor_from_headers(&headers)?;
    let kind: TargetKind = kind.parse()?;
    let created = state
        .activity_service
        .create_comment_or_reply(kind, parse_id(&id)?, &actor, payload.content)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn like_count(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<LikeCountResponse>, ApiError> {
    state.jwt_service.extract_actor_from_headers(&headers)?;
    let kind: TargetKind = kind.parse()?;
    let like_count = state.activity_service.like_count(kind, parse_id(&id)?).await?;

    Ok(Json(LikeCountResponse { like_count }))
}

async fn list_thread(
    State(state): State<AppState>,
    Path((parent_id, thread)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<ActivityRecord>>, ApiError> {
    let thread: ThreadKind = thread.parse()?;
    let page = PageRequest::from_raw(query.page.as_deref(), query.limit.as_deref());
    let items = state
        .activity_service
        .comments_and_replies(parse_id(&parent_id)?, thread, page)
        .await?;

    Ok(Json(items))
}

/// 令牌在升级时校验一次；被拒绝的连接只收到一个关闭帧
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let admission = state.token_gate.check(query.token.as_deref());
    ws.on_upgrade(move |socket| async move {
        match admission {
            Ok(actor) => WebSocketConnection::new(socket, state, actor).run().await,
            Err(rejection) => WebSocketConnection::reject(socket, rejection).await,
        }
    })
}
