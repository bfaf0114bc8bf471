//! 定向推送：把通知投递给某个用户当前的全部连接

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Notification, UserId};
use tracing::{debug, warn};

use crate::session::{SessionHandle, SessionRegistry};

/// 一次扇出的投递结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// 尽力投递，失败只记日志，不影响调用方
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, notification: Notification) -> DeliveryReport;
}

pub struct SessionNotifier {
    registry: Arc<SessionRegistry>,
}

impl SessionNotifier {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Notifier for SessionNotifier {
    async fn notify(&self, user_id: UserId, notification: Notification) -> DeliveryReport {
        let handles = self.registry.connections_for(user_id).await;
        if handles.is_empty() {
            debug!(user_id = %user_id, kind = ?notification.kind, "recipient offline, dropping notification");
            return DeliveryReport::default();
        }
        fan_out(&handles, &notification)
    }
}

/// 逐个连接 `try_send`，单个连接失败不影响其它连接
pub(crate) fn fan_out(handles: &[SessionHandle], notification: &Notification) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for handle in handles {
        match handle.deliver(notification.clone()) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                warn!(
                    connection_id = %handle.connection_id(),
                    user_id = %handle.user_id(),
                    error = %err,
                    "notification delivery failed"
                );
                report.failed += 1;
            }
        }
    }
    report
}
