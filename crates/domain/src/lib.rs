//! 社交发帖系统核心领域模型
//!
//! 包含用户、帖子、互动记录（点赞/评论/回复/浏览）、实时通知等核心实体，
//! 以及相关的业务规则。本 crate 不做任何 I/O。

pub mod activity;
pub mod errors;
pub mod notification;
pub mod pagination;
pub mod post;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use activity::*;
pub use errors::*;
pub use notification::*;
pub use pagination::*;
pub use post::*;
pub use user::*;
pub use value_objects::*;
