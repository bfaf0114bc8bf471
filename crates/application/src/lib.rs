//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：点赞/评论/浏览账本、帖子与用户管理，
//! 以及实时推送所需的会话注册表、准入校验、定向通知和全体广播。
//! 存储、密码哈希、令牌签发等外部能力都以 trait 的形式在此声明。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod gate;
pub mod memory;
pub mod notifier;
pub mod password;
pub mod repository;
pub mod services;
pub mod session;
pub mod tokens;

pub use broadcaster::{Broadcaster, SessionBroadcaster};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use gate::{GateRejection, TokenError, TokenGate, TokenVerifier, POLICY_VIOLATION};
pub use memory::MemoryStorage;
pub use notifier::{DeliveryReport, Notifier, SessionNotifier};
pub use password::{PasswordHasher, PasswordHasherError};
pub use repository::{ActivityLedger, ActivityRepository, PostRepository, UserRepository};
pub use services::{
    ActivityService, ActivityServiceDependencies, AuthenticateUserRequest, CommentCreated,
    CreatePostRequest, LoginOutcome, PostService, PostServiceDependencies, RegisterUserRequest,
    ToggleLikeResponse, UpdateProfileRequest, UserService, UserServiceDependencies,
};
pub use session::{Admission, AdmissionState, DeliveryError, SessionHandle, SessionRegistry};
pub use tokens::{RefreshTokenError, TokenIssuer, TokenPair};
