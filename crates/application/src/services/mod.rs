mod activity_service;
mod post_service;
mod user_service;

pub use activity_service::{
    ActivityService, ActivityServiceDependencies, CommentCreated, ToggleLikeResponse,
};
pub use post_service::{CreatePostRequest, PostService, PostServiceDependencies};
pub use user_service::{
    AuthenticateUserRequest, LoginOutcome, RegisterUserRequest, UpdateProfileRequest, UserService,
    UserServiceDependencies,
};
